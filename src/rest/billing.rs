use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Extension, Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{AppState, CurrentUser, MessageResponse};
use crate::billing::{verify_signature, WebhookError, WebhookEvent};
use crate::error::AppError;
use crate::models::User;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerResponse {
    pub stripe_customer_id: String,
}

fn webhook_error(err: WebhookError) -> AppError {
    warn!(error = %err, "webhook rejected");
    AppError::BadRequest(format!("Webhook Error: {err}"))
}

/// Finds the user a payment customer belongs to: the stored link first, then
/// the customer's email at the provider (linking it for next time).
async fn resolve_customer(state: &AppState, customer_id: &str) -> Result<Option<User>, AppError> {
    if let Some(user) = state.storage.find_user_by_customer(customer_id)? {
        return Ok(Some(user));
    }
    let Some(email) = state.billing.customer_email(customer_id).await? else {
        return Ok(None);
    };
    let Some(user) = state
        .storage
        .find_user_by_email(&email.trim().to_lowercase())?
    else {
        return Ok(None);
    };
    Ok(Some(state.storage.link_customer(&user.id, customer_id)?))
}

#[utoipa::path(
    post,
    path = "/stripe/stripe-webhook",
    tag = "billing",
    request_body(content = String, description = "Raw event JSON signed in the Stripe-Signature header"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Bad signature or payload", body = MessageResponse)
    )
)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let secret = state
        .config
        .stripe
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Internal("STRIPE_WEBHOOK_SECRET is not configured".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| webhook_error(WebhookError::MalformedHeader))?;
    verify_signature(&body, signature, secret, Utc::now().timestamp()).map_err(webhook_error)?;

    let event = WebhookEvent::parse(&body).map_err(webhook_error)?;
    let Some(subscription) = event.subscription().map_err(webhook_error)? else {
        info!(event_id = %event.id, kind = %event.kind, "unhandled webhook event");
        return Ok(Json(WebhookAck { received: true }));
    };

    match resolve_customer(&state, &subscription.customer).await? {
        Some(user) => {
            let updated = state
                .storage
                .apply_subscription(&user.id, &subscription.to_update())?;
            info!(
                event_id = %event.id,
                kind = %event.kind,
                user_id = %updated.id,
                status = %updated.subscription_status,
                premium = updated.is_premium,
                "subscription synchronized"
            );
        }
        None => warn!(
            event_id = %event.id,
            customer = %subscription.customer,
            "no user for subscription customer"
        ),
    }

    Ok(Json(WebhookAck { received: true }))
}

#[utoipa::path(
    post,
    path = "/stripe/create-stripe-customer",
    tag = "billing",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Customer found or created and linked to the caller", body = CustomerResponse),
        (status = 500, description = "Payment provider unavailable", body = MessageResponse)
    )
)]
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<CustomerResponse>, AppError> {
    let customer_id = state.billing.ensure_customer(&user.email, &user.id).await?;
    state.storage.link_customer(&user.id, &customer_id)?;

    info!(user_id = %user.id, customer = %customer_id, "payment customer linked");
    Ok(Json(CustomerResponse {
        stripe_customer_id: customer_id,
    }))
}
