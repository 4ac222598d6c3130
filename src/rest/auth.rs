use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use super::{AppState, CurrentUser, JsonBody, MessageResponse};
use crate::auth::{create_jwt, hash_password, validate_jwt, verify_password};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{User, UserProfile};

const REFRESH_COOKIE: &str = "refreshToken";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Deserialize, ToSchema)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckResponse {
    pub message: String,
    pub user: UserProfile,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Token issued at registration.
    pub token: Option<String>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AppError> {
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn invalid_credentials() -> AppError {
    AppError::BadRequest("Invalid credentials".to_string())
}

fn refresh_cookie(token: &str, config: &Config) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE}={token}; HttpOnly; Path=/auth; Max-Age={}; SameSite=Strict",
        config.refresh_token_ttl_secs
    );
    if config.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cleared_cookie(config: &Config) -> String {
    let mut cookie = format!("{REFRESH_COOKIE}=; HttpOnly; Path=/auth; Max-Age=0; SameSite=Strict");
    if config.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 201, description = "User created", body = MessageResponse),
        (status = 400, description = "Invalid input or email taken", body = MessageResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<Credentials>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let email = normalize_email(&payload.email);
    validate_credentials(&email, &payload.password)?;

    if state.storage.find_user_by_email(&email)?.is_some() {
        return Err(AppError::BadRequest("User already exists".to_string()));
    }

    let cost = state.config.bcrypt_cost;
    let password = payload.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password, cost)).await??;

    // The email index is checked again inside the insert transaction
    let user = User::new(email, hash);
    state.storage.create_user(&user)?;

    info!(user_id = %user.id, "user registered");
    debug!(
        user_id = %user.id,
        token = user.verification_token.as_deref().unwrap_or_default(),
        "email verification token issued"
    );
    Ok((
        StatusCode::CREATED,
        MessageResponse::new("User created successfully"),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Tokens issued; refresh token also set as an HttpOnly cookie", body = LoginResponse),
        (status = 400, description = "Invalid credentials", body = MessageResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    let user = state
        .storage
        .find_user_by_email(&email)?
        .ok_or_else(invalid_credentials)?;

    let password = payload.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await?
        .unwrap_or(false);
    if !valid {
        return Err(invalid_credentials());
    }

    let config = &state.config;
    let access_token = create_jwt(
        &user.id,
        config.jwt_secret.as_bytes(),
        config.access_token_ttl_secs,
    )?;
    let refresh_token = create_jwt(
        &user.id,
        config.jwt_refresh_secret.as_bytes(),
        config.refresh_token_ttl_secs,
    )?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        AppendHeaders([(header::SET_COOKIE, refresh_cookie(&refresh_token, config))]),
        Json(LoginResponse {
            access_token,
            refresh_token,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    tag = "auth",
    request_body(content = RefreshRequest, description = "Optional when the refreshToken cookie is sent"),
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "No refresh token", body = MessageResponse),
        (status = 403, description = "Invalid or expired refresh token", body = MessageResponse)
    )
)]
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Json<AccessTokenResponse>, AppError> {
    let from_body = body.and_then(|Json(request)| request.refresh_token);
    let token = cookie_value(&headers, REFRESH_COOKIE)
        .map(str::to_string)
        .or(from_body)
        .ok_or_else(|| AppError::Unauthorized("Refresh token required".to_string()))?;

    let config = &state.config;
    let claims = validate_jwt(&token, config.jwt_refresh_secret.as_bytes())
        .map_err(|_| AppError::Forbidden("Invalid or expired refresh token".to_string()))?;
    let user = state
        .storage
        .get_user(&claims.sub)?
        .ok_or_else(|| AppError::Forbidden("User not found".to_string()))?;

    let access_token = create_jwt(
        &user.id,
        config.jwt_secret.as_bytes(),
        config.access_token_ttl_secs,
    )?;
    Ok(Json(AccessTokenResponse { access_token }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses((status = 200, description = "Refresh cookie cleared", body = MessageResponse))
)]
pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        AppendHeaders([(header::SET_COOKIE, cleared_cookie(&state.config))]),
        MessageResponse::new("Logged out successfully"),
    )
}

#[utoipa::path(
    get,
    path = "/auth/verify-email",
    tag = "auth",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Unknown or missing token", body = MessageResponse)
    )
)]
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    let token = query
        .token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Verification token required".to_string()))?;

    let user = state
        .storage
        .verify_email(token.trim())?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired verification token".to_string()))?;

    info!(user_id = %user.id, "email verified");
    Ok(MessageResponse::new("Email verified successfully"))
}

#[utoipa::path(
    get,
    path = "/auth/check",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Token is valid", body = CheckResponse),
        (status = 401, description = "No token", body = MessageResponse),
        (status = 403, description = "Invalid token", body = MessageResponse)
    )
)]
pub async fn check(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<CheckResponse> {
    Json(CheckResponse {
        message: "Token is valid".to_string(),
        user: UserProfile::new(&user, &state.config.limits),
    })
}

#[utoipa::path(
    get,
    path = "/auth/profile",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Profile of the caller", body = UserProfile))
)]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<UserProfile> {
    Json(UserProfile::new(&user, &state.config.limits))
}
