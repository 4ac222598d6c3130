//! REST API layer using Axum.
//!
//! Routes:
//! - `/auth/*`: registration, login, token refresh, email verification, profile.
//! - `/api/*`: answer transcription and analysis, recordings, follow-up chat,
//!   usage checks, notes. All behind the bearer-token middleware.
//! - `/stripe/*`: subscription webhook and customer linking.
//! - `/health`, `/api-docs/openapi.json`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

use crate::ai::{ChatCompletion, SpeechToText};
use crate::auth::validate_jwt;
use crate::billing::BillingProvider;
use crate::config::Config;
use crate::error::AppError;
use crate::models::User;
use crate::storage::Storage;

pub mod auth;
pub mod billing;
pub mod chat;
pub mod notes;
pub mod recordings;

/// Room for multipart boundaries and the text fields on top of the audio limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared app state for REST handlers.
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    pub speech: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn ChatCompletion>,
    pub billing: Arc<dyn BillingProvider>,
}

/// The authenticated caller, inserted by [`auth_middleware`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// JSON request body; rejections become [`AppError::BadRequest`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Missing token: 401. Invalid or expired token, or a deleted user: 403.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))?;

    let claims = validate_jwt(token, state.config.jwt_secret.as_bytes())
        .map_err(|_| AppError::Forbidden("Invalid or expired token".to_string()))?;

    let user = state
        .storage
        .get_user(&claims.sub)?
        .ok_or_else(|| AppError::Forbidden("User not found".to_string()))?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    match HeaderValue::from_str(&config.client_origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            warn!(origin = %config.client_origin, "invalid CLIENT_ORIGIN, cross-origin requests disabled");
            cors
        }
    }
}

/// Create the Axum router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes + MULTIPART_OVERHEAD);

    let protected = Router::new()
        .route("/auth/check", get(auth::check))
        .route("/auth/profile", get(auth::profile))
        .route("/api/profile", get(auth::profile))
        .route(
            "/api/transcribe",
            post(recordings::transcribe).layer(upload_limit),
        )
        .route("/api/recordings", get(recordings::list))
        .route(
            "/api/recordings/:id",
            get(recordings::get_recording).delete(recordings::delete_recording),
        )
        .route("/api/recordings/:id/audio", get(recordings::audio))
        .route("/api/sessions/:id", get(recordings::session))
        .route("/api/check-audio-limit", get(recordings::check_audio_limit))
        .route("/api/check-chat-limit", get(chat::check_chat_limit))
        .route("/api/chat", post(chat::chat))
        .route("/api/generate-questions", post(chat::generate_questions))
        .route("/api/notes", post(notes::create_note).get(notes::list_notes))
        .route(
            "/api/notes/:id",
            put(notes::update_note).delete(notes::delete_note),
        )
        .route(
            "/stripe/create-stripe-customer",
            post(billing::create_customer),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify-email", get(auth::verify_email))
        .route("/stripe/stripe-webhook", post(billing::webhook))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config)),
        )
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Interview coach API is healthy".to_string(),
    })
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::register,
        auth::login,
        auth::refresh_token,
        auth::logout,
        auth::verify_email,
        auth::check,
        auth::profile,
        recordings::transcribe,
        recordings::list,
        recordings::get_recording,
        recordings::delete_recording,
        recordings::audio,
        recordings::session,
        recordings::check_audio_limit,
        chat::chat,
        chat::check_chat_limit,
        chat::generate_questions,
        notes::create_note,
        notes::list_notes,
        notes::update_note,
        notes::delete_note,
        billing::webhook,
        billing::create_customer,
    ),
    components(schemas(
        HealthResponse,
        MessageResponse,
        auth::Credentials,
        auth::LoginResponse,
        auth::RefreshRequest,
        auth::AccessTokenResponse,
        auth::CheckResponse,
        recordings::TranscribeForm,
        recordings::TranscribeResponse,
        recordings::SessionResponse,
        chat::ChatRequest,
        chat::ChatResponse,
        chat::GenerateQuestionsRequest,
        chat::GenerateQuestionsResponse,
        notes::NoteRequest,
        notes::NoteCreated,
        billing::WebhookAck,
        billing::CustomerResponse,
        crate::models::UserProfile,
        crate::models::Recording,
        crate::models::AudioRef,
        crate::models::ChatTurn,
        crate::models::Speaker,
        crate::models::Note,
        crate::usage::UsageStatus,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Accounts and tokens"),
        (name = "recordings", description = "Answer transcription and analysis"),
        (name = "chat", description = "Follow-up coaching chat"),
        (name = "notes", description = "Personal notes"),
        (name = "billing", description = "Subscriptions")
    )
)]
pub struct ApiDoc;
