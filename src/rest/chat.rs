use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;

use super::recordings::owned_recording;
use super::{AppState, CurrentUser, JsonBody, MessageResponse};
use crate::ai::AiError;
use crate::error::AppError;
use crate::models::{ChatTurn, Speaker};
use crate::prompts::{self, AnswerContext};
use crate::usage::{UsageKind, UsageStatus};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub recording_id: String,
    /// Overrides the stored question.
    pub question: Option<String>,
    /// Overrides the stored transcription.
    pub transcription: Option<String>,
    /// Overrides the stored analysis.
    pub analysis: Option<String>,
    #[serde(default)]
    pub input: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub messages: Vec<ChatTurn>,
    /// `null` when the caller's tier is unbounded.
    pub remaining_messages: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuestionsRequest {
    #[serde(default)]
    pub job_description: String,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateQuestionsResponse {
    pub questions: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    security(("bearer_auth" = [])),
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Coach reply and the updated conversation", body = ChatResponse),
        (status = 400, description = "Empty input", body = MessageResponse),
        (status = 403, description = "Chat message limit reached (requiresUpgrade)", body = MessageResponse),
        (status = 404, description = "Recording not found or not owned", body = MessageResponse),
        (status = 500, description = "Completion failed; the message is not counted", body = MessageResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let recording = owned_recording(&state, &user, &request.recording_id)?;
    let input = request.input.trim();
    if input.is_empty() {
        return Err(AppError::BadRequest("Message input is required".to_string()));
    }

    let history = state
        .storage
        .get_chat(&recording.id)?
        .map(|chat| chat.messages)
        .unwrap_or_default();

    let limits = &state.config.limits;
    let reserved = state
        .storage
        .reserve_usage(&user.id, UsageKind::ChatMessage, limits)?;

    let context = AnswerContext {
        question: non_empty(&request.question).unwrap_or(&recording.question),
        transcription: non_empty(&request.transcription).unwrap_or(&recording.transcription),
        analysis: non_empty(&request.analysis).unwrap_or(&recording.analysis),
    };
    let reply = match state
        .llm
        .complete(&prompts::chat_messages(context, &history, input))
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            error!(user_id = %user.id, recording_id = %recording.id, error = %e, "chat completion failed");
            release_chat_message(&state, &user.id);
            return Err(e.into());
        }
    };

    // The recording may have been deleted while the completion was running
    let chat = match state.storage.append_chat(
        &recording.id,
        &[
            ChatTurn::new(Speaker::User, input),
            ChatTurn::new(Speaker::Bot, reply.clone()),
        ],
    ) {
        Ok(chat) => chat,
        Err(e) => {
            release_chat_message(&state, &user.id);
            return Err(e.into());
        }
    };

    let remaining_messages = limits.status(&reserved, UsageKind::ChatMessage).remaining;
    info!(
        user_id = %user.id,
        recording_id = %recording.id,
        used = reserved.total_chat_messages_count,
        "chat message answered"
    );
    Ok(Json(ChatResponse {
        reply,
        messages: chat.messages,
        remaining_messages,
    }))
}

fn release_chat_message(state: &AppState, user_id: &str) {
    if let Err(e) = state.storage.release_usage(user_id, UsageKind::ChatMessage) {
        error!(%user_id, error = %e, "failed to release chat reservation");
    }
}

#[utoipa::path(
    get,
    path = "/api/check-chat-limit",
    tag = "chat",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Chat message usage", body = UsageStatus))
)]
pub async fn check_chat_limit(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<UsageStatus> {
    Json(state.config.limits.status(&user, UsageKind::ChatMessage))
}

#[utoipa::path(
    post,
    path = "/api/generate-questions",
    tag = "chat",
    security(("bearer_auth" = [])),
    request_body = GenerateQuestionsRequest,
    responses(
        (status = 200, description = "Interview questions for the job description", body = GenerateQuestionsResponse),
        (status = 400, description = "Empty job description", body = MessageResponse)
    )
)]
pub async fn generate_questions(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<GenerateQuestionsRequest>,
) -> Result<Json<GenerateQuestionsResponse>, AppError> {
    let description = request.job_description.trim();
    if description.is_empty() {
        return Err(AppError::BadRequest("Job description is required".to_string()));
    }

    let reply = state
        .llm
        .complete(&prompts::question_messages(description))
        .await?;
    let questions = prompts::parse_questions(&reply);
    if questions.is_empty() {
        return Err(AiError::EmptyResponse.into());
    }

    info!(user_id = %user.id, count = questions.len(), "questions generated");
    Ok(Json(GenerateQuestionsResponse { questions }))
}
