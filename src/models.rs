use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::usage::{UsageKind, UsageLimits, UsageStatus};

/// Stored account. Serialized as-is into the `users` tree; never returned
/// directly to clients (see [`UserProfile`]).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    /// Recording ids owned by this user, oldest first.
    #[serde(default)]
    pub recordings: Vec<String>,
    #[serde(default)]
    pub audio_submissions_count: u32,
    #[serde(default)]
    pub total_chat_messages_count: u32,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub is_verified: bool,
    pub verification_token: Option<String>,
    #[serde(default = "default_subscription_status")]
    pub subscription_status: String,
    pub subscription_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_subscription_status() -> String {
    "none".to_string()
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            password_hash: password_hash.into(),
            recordings: vec![],
            audio_submissions_count: 0,
            total_chat_messages_count: 0,
            is_premium: false,
            is_verified: false,
            verification_token: Some(Uuid::new_v4().simple().to_string()),
            subscription_status: default_subscription_status(),
            subscription_end_date: None,
            cancel_at_period_end: false,
            stripe_customer_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn owns_recording(&self, recording_id: &str) -> bool {
        self.recordings.iter().any(|id| id == recording_id)
    }

    pub fn usage_count(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::AudioSubmission => self.audio_submissions_count,
            UsageKind::ChatMessage => self.total_chat_messages_count,
        }
    }

    pub fn usage_count_mut(&mut self, kind: UsageKind) -> &mut u32 {
        match kind {
            UsageKind::AudioSubmission => &mut self.audio_submissions_count,
            UsageKind::ChatMessage => &mut self.total_chat_messages_count,
        }
    }
}

/// Where the raw answer audio lives: the `audio` tree, keyed by recording id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudioRef {
    pub mime_type: String,
    pub size: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(rename = "_id")]
    pub id: String,
    pub question: String,
    pub industry: Option<String>,
    pub transcription: String,
    pub analysis: String,
    pub date: DateTime<Utc>,
    pub audio: AudioRef,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct ChatTurn {
    pub user: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(user: Speaker, text: impl Into<String>) -> Self {
        Self {
            user,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Follow-up conversation attached to one recording (one document per recording).
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub recording_id: String,
    pub messages: Vec<ChatTurn>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// JWT claims for both access and refresh tokens; `sub` is the user id.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Client-facing view of a [`User`].
#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub is_premium: bool,
    pub is_verified: bool,
    pub subscription_status: String,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub recordings: Vec<String>,
    pub audio_submissions_count: u32,
    pub total_chat_messages_count: u32,
    pub audio_usage: UsageStatus,
    pub chat_usage: UsageStatus,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user: &User, limits: &UsageLimits) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            is_premium: user.is_premium,
            is_verified: user.is_verified,
            subscription_status: user.subscription_status.clone(),
            subscription_end_date: user.subscription_end_date,
            cancel_at_period_end: user.cancel_at_period_end,
            recordings: user.recordings.clone(),
            audio_submissions_count: user.audio_submissions_count,
            total_chat_messages_count: user.total_chat_messages_count,
            audio_usage: limits.status(user, UsageKind::AudioSubmission),
            chat_usage: limits.status(user, UsageKind::ChatMessage),
            created_at: user.created_at,
        }
    }
}
