use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{AppState, CurrentUser, MessageResponse};
use crate::ai::AudioClip;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{AudioRef, ChatTurn, Recording, User};
use crate::prompts;
use crate::usage::{LimitReached, UsageKind, UsageStatus};

/// Multipart body of `POST /api/transcribe`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct TranscribeForm {
    #[schema(value_type = String, format = Binary)]
    audio: Vec<u8>,
    question: String,
    industry: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct TranscribeResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub transcription: String,
    pub analysis: String,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub recording: Recording,
    pub messages: Vec<ChatTurn>,
}

struct Upload {
    clip: AudioClip,
    question: String,
    industry: Option<String>,
}

/// Reads the `audio`, `question` and `industry` fields, enforcing the MIME
/// allow-list and the size limit on the audio part.
async fn read_upload(config: &Config, multipart: &mut Multipart) -> Result<Upload, AppError> {
    let mut clip = None;
    let mut question = None;
    let mut industry = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let mime_type = field.content_type().unwrap_or_default().to_string();
                if !config.is_allowed_audio_type(&mime_type) {
                    return Err(AppError::BadRequest(format!(
                        "Unsupported audio format '{mime_type}'"
                    )));
                }
                let file_name = field.file_name().unwrap_or("answer").to_string();
                let bytes = field.bytes().await?;
                if bytes.len() > config.max_upload_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "Audio file exceeds the {} byte limit",
                        config.max_upload_bytes
                    )));
                }
                clip = Some(AudioClip {
                    bytes: bytes.to_vec(),
                    mime_type,
                    file_name,
                });
            }
            "question" => question = Some(field.text().await?),
            "industry" => industry = Some(field.text().await?),
            _ => {}
        }
    }

    let clip = clip
        .filter(|clip| !clip.bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("No audio file uploaded".to_string()))?;
    let question = question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("Question is required".to_string()))?;
    let industry = industry
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty());

    Ok(Upload {
        clip,
        question,
        industry,
    })
}

/// Looks up a recording the caller owns; anything else is a 404.
pub(super) fn owned_recording(
    state: &AppState,
    user: &User,
    recording_id: &str,
) -> Result<Recording, AppError> {
    let not_found = || AppError::NotFound("Recording not found".to_string());
    if !user.owns_recording(recording_id) {
        return Err(not_found());
    }
    state.storage.get_recording(recording_id)?.ok_or_else(not_found)
}

#[utoipa::path(
    post,
    path = "/api/transcribe",
    tag = "recordings",
    security(("bearer_auth" = [])),
    request_body(content = TranscribeForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Answer transcribed, analyzed and saved", body = TranscribeResponse),
        (status = 400, description = "Missing field or unsupported audio format", body = MessageResponse),
        (status = 403, description = "Audio submission limit reached (requiresUpgrade)", body = MessageResponse),
        (status = 413, description = "Audio file too large", body = MessageResponse),
        (status = 500, description = "Transcription or analysis failed", body = MessageResponse)
    )
)]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, AppError> {
    let limits = &state.config.limits;

    // Refuse before reading the upload or calling any external service
    if !limits.status(&user, UsageKind::AudioSubmission).allowed {
        return Err(AppError::limit_reached(LimitReached(
            UsageKind::AudioSubmission,
        )));
    }

    let upload = read_upload(&state.config, &mut multipart).await?;

    let transcription = state.speech.transcribe(&upload.clip).await.map_err(|e| {
        error!(user_id = %user.id, error = %e, "transcription failed");
        e
    })?;

    let analysis = state
        .llm
        .complete(&prompts::analysis_messages(
            &upload.question,
            upload.industry.as_deref(),
            &transcription,
        ))
        .await
        .map_err(|e| {
            error!(user_id = %user.id, error = %e, "answer analysis failed");
            e
        })?;

    let recording = Recording {
        id: Uuid::new_v4().to_string(),
        question: upload.question,
        industry: upload.industry,
        transcription,
        analysis,
        date: Utc::now(),
        audio: AudioRef {
            mime_type: upload.clip.mime_type.clone(),
            size: upload.clip.bytes.len(),
        },
    };
    // Reserves the submission atomically; a concurrent request may have used it up
    let updated = state
        .storage
        .save_recording(&user.id, &recording, &upload.clip.bytes, limits)?;

    info!(
        user_id = %user.id,
        recording_id = %recording.id,
        bytes = recording.audio.size,
        submissions = updated.audio_submissions_count,
        "recording saved"
    );
    Ok(Json(TranscribeResponse {
        id: recording.id,
        transcription: recording.transcription,
        analysis: recording.analysis,
    }))
}

#[utoipa::path(
    get,
    path = "/api/recordings",
    tag = "recordings",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Caller's recordings, newest first", body = [Recording]))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<Recording>>, AppError> {
    Ok(Json(state.storage.recordings_for(&user)?))
}

#[utoipa::path(
    get,
    path = "/api/recordings/{id}",
    tag = "recordings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Recording id")),
    responses(
        (status = 200, description = "The recording", body = Recording),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Recording>, AppError> {
    Ok(Json(owned_recording(&state, &user, &id)?))
}

#[utoipa::path(
    get,
    path = "/api/recordings/{id}/audio",
    tag = "recordings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Recording id")),
    responses(
        (status = 200, description = "Raw audio with its original content type"),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn audio(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let recording = owned_recording(&state, &user, &id)?;
    let bytes = state
        .storage
        .get_audio(&recording.id)?
        .ok_or_else(|| AppError::NotFound("Audio not found".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, recording.audio.mime_type)],
        bytes.to_vec(),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    tag = "recordings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Recording id")),
    responses(
        (status = 200, description = "Recording with its chat history", body = SessionResponse),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn session(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let recording = owned_recording(&state, &user, &id)?;
    let messages = state
        .storage
        .get_chat(&recording.id)?
        .map(|chat| chat.messages)
        .unwrap_or_default();
    Ok(Json(SessionResponse {
        recording,
        messages,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/recordings/{id}",
    tag = "recordings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Recording id")),
    responses(
        (status = 200, description = "Recording, audio and chat deleted", body = MessageResponse),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn delete_recording(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.storage.delete_recording(&user.id, &id)?;
    info!(user_id = %user.id, recording_id = %id, "recording deleted");
    Ok(MessageResponse::new("Recording deleted successfully"))
}

#[utoipa::path(
    get,
    path = "/api/check-audio-limit",
    tag = "recordings",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Audio submission usage", body = UsageStatus))
)]
pub async fn check_audio_limit(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<UsageStatus> {
    Json(
        state
            .config
            .limits
            .status(&user, UsageKind::AudioSubmission),
    )
}
