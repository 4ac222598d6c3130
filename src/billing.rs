//! Subscription billing.
//!
//! - Webhook authentication: `Stripe-Signature: t=<unix>,v1=<hex>` where the
//!   signature is HMAC-SHA256 of `"<t>.<raw body>"` keyed by the endpoint secret.
//! - Event parsing for `customer.subscription.*` events.
//! - [`BillingProvider`]: the few customer API calls the server needs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::config::StripeSettings;
use crate::storage::SubscriptionUpdate;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed webhook.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or malformed signature header")]
    MalformedHeader,

    #[error("timestamp outside the tolerance window")]
    StaleTimestamp,

    #[error("no signatures found matching the expected signature for payload")]
    SignatureMismatch,

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("payment provider not configured")]
    NotConfigured,

    #[error("payment provider request failed: {0}")]
    RequestFailed(String),

    #[error("payment provider error: HTTP {status}: {body}")]
    Api { status: u16, body: String },
}

/// Checks `header` against `payload` signed with `secret` at time `now`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = vec![];
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::StaleTimestamp);
    }

    let matches = signatures.iter().any(|signature| {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        // constant-time comparison
        signed_payload_mac(secret, timestamp, payload)
            .verify_slice(&expected)
            .is_ok()
    });

    if matches {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mac = signed_payload_mac(secret, timestamp, payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub customer: String,
    pub status: String,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

impl Subscription {
    pub fn to_update(&self) -> SubscriptionUpdate {
        SubscriptionUpdate {
            status: self.status.clone(),
            current_period_end: self
                .current_period_end
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            cancel_at_period_end: self.cancel_at_period_end,
        }
    }
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// The subscription carried by `customer.subscription.*` events; `None`
    /// for every other event type.
    pub fn subscription(&self) -> Result<Option<Subscription>, WebhookError> {
        match self.kind.as_str() {
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => serde_json::from_value(self.data.object.clone())
                .map(Some)
                .map_err(|e| WebhookError::InvalidPayload(e.to_string())),
            _ => Ok(None),
        }
    }
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Email of a customer, `None` if the customer is deleted or has none.
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError>;

    /// Finds the customer for `email` (tagging it with `user_id`) or creates one.
    async fn ensure_customer(&self, email: &str, user_id: &str) -> Result<String, BillingError>;
}

#[derive(Debug, Deserialize)]
struct Customer {
    id: String,
    #[serde(default)]
    deleted: bool,
    email: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

/// Stripe REST API client (form-encoded requests, bearer secret key).
pub struct StripeClient {
    client: reqwest::Client,
    settings: StripeSettings,
}

impl StripeClient {
    pub fn new(settings: StripeSettings, timeout: Duration) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::RequestFailed(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn secret_key(&self) -> Result<&str, BillingError> {
        self.settings
            .secret_key
            .as_deref()
            .ok_or(BillingError::NotConfigured)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BillingError> {
        let response = request
            .bearer_auth(self.secret_key()?)
            .send()
            .await
            .map_err(|e| BillingError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| BillingError::RequestFailed(e.to_string()))
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError> {
        let customer: Customer = self
            .send(self.client.get(self.url(&format!("customers/{customer_id}"))))
            .await?;
        if customer.deleted {
            return Ok(None);
        }
        Ok(customer.email)
    }

    async fn ensure_customer(&self, email: &str, user_id: &str) -> Result<String, BillingError> {
        let existing: CustomerList = self
            .send(
                self.client
                    .get(self.url("customers"))
                    .query(&[("email", email), ("limit", "1")]),
            )
            .await?;

        if let Some(customer) = existing.data.into_iter().next() {
            if customer.metadata.get("userId").map(String::as_str) != Some(user_id) {
                let updated: Customer = self
                    .send(
                        self.client
                            .post(self.url(&format!("customers/{}", customer.id)))
                            .form(&[("metadata[userId]", user_id)]),
                    )
                    .await?;
                return Ok(updated.id);
            }
            return Ok(customer.id);
        }

        let created: Customer = self
            .send(
                self.client
                    .post(self.url("customers"))
                    .form(&[("email", email), ("metadata[userId]", user_id)]),
            )
            .await?;
        Ok(created.id)
    }
}
