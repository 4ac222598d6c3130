//! Per-tier quotas for audio submissions and chat messages.
//!
//! Limits are plain data from [`crate::config::Config`]; the storage layer
//! calls [`UsageLimits::reserve`] inside a transaction so the check and the
//! increment are one atomic step.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum UsageKind {
    AudioSubmission,
    ChatMessage,
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageKind::AudioSubmission => write!(f, "audio submission"),
            UsageKind::ChatMessage => write!(f, "chat message"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} limit reached")]
pub struct LimitReached(pub UsageKind);

/// Limits for one tier; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub audio_submissions: Option<u32>,
    pub chat_messages: Option<u32>,
}

impl TierLimits {
    pub const UNBOUNDED: TierLimits = TierLimits {
        audio_submissions: None,
        chat_messages: None,
    };

    pub fn get(&self, kind: UsageKind) -> Option<u32> {
        match kind {
            UsageKind::AudioSubmission => self.audio_submissions,
            UsageKind::ChatMessage => self.chat_messages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            free: TierLimits {
                audio_submissions: Some(3),
                chat_messages: Some(10),
            },
            premium: TierLimits::UNBOUNDED,
        }
    }
}

impl UsageLimits {
    pub fn limit_for(&self, user: &User, kind: UsageKind) -> Option<u32> {
        let tier = if user.is_premium { &self.premium } else { &self.free };
        tier.get(kind)
    }

    pub fn status(&self, user: &User, kind: UsageKind) -> UsageStatus {
        let used = user.usage_count(kind);
        let limit = self.limit_for(user, kind);
        let remaining = limit.map(|l| l.saturating_sub(used));
        let allowed = remaining.map_or(true, |r| r > 0);
        UsageStatus {
            allowed,
            used,
            limit,
            remaining,
            is_premium: user.is_premium,
            requires_upgrade: !allowed,
        }
    }

    /// Counts one more use of `kind` if the user is still below the limit.
    pub fn reserve(&self, user: &mut User, kind: UsageKind) -> Result<(), LimitReached> {
        if let Some(limit) = self.limit_for(user, kind) {
            if user.usage_count(kind) >= limit {
                return Err(LimitReached(kind));
            }
        }
        let count = user.usage_count_mut(kind);
        *count = count.saturating_add(1);
        Ok(())
    }

    /// Gives back a reservation whose work did not complete.
    pub fn release(user: &mut User, kind: UsageKind) {
        let count = user.usage_count_mut(kind);
        *count = count.saturating_sub(1);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatus {
    pub allowed: bool,
    pub used: u32,
    /// `null` for unbounded tiers.
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub is_premium: bool,
    pub requires_upgrade: bool,
}
