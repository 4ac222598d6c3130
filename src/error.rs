use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::ai::AiError;
use crate::billing::BillingError;
use crate::storage::StorageError;
use crate::usage::{LimitReached, UsageKind};

/// Error returned by every handler. Always rendered as `{"message": ...}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// Quota exhausted; the body also carries `requiresUpgrade: true`.
    #[error("{0}")]
    UpgradeRequired(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn limit_reached(limit: LimitReached) -> Self {
        let message = match limit.0 {
            UsageKind::AudioSubmission => {
                "Free audio submission limit reached. Please upgrade to premium."
            }
            UsageKind::ChatMessage => {
                "Free chat message limit reached. Please upgrade to premium."
            }
        };
        AppError::UpgradeRequired(message.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::UpgradeRequired(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Multipart(e) => e.status(),
            AppError::Storage(StorageError::UserExists) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::NotFound(_) | StorageError::UserNotFound) => {
                StatusCode::NOT_FOUND
            }
            AppError::Storage(StorageError::LimitReached(_)) => StatusCode::FORBIDDEN,
            AppError::Internal(_)
            | AppError::Storage(_)
            | AppError::Ai(_)
            | AppError::Billing(_)
            | AppError::Token(_)
            | AppError::Hash(_)
            | AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Quota failures coming out of a storage transaction
        if let AppError::Storage(StorageError::LimitReached(limit)) = self {
            return AppError::limit_reached(limit).into_response();
        }

        let status = self.status();
        let body = match &self {
            AppError::UpgradeRequired(message) => {
                json!({ "message": message, "requiresUpgrade": true })
            }
            AppError::Multipart(e) => json!({ "message": e.body_text() }),
            _ if status.is_server_error() => {
                error!(error = %self, "request failed");
                json!({ "message": "Internal server error" })
            }
            _ => json!({ "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
