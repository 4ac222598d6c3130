use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AppState, CurrentUser, JsonBody, MessageResponse};
use crate::error::AppError;
use crate::models::Note;

#[derive(Deserialize, ToSchema)]
pub struct NoteRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl NoteRequest {
    fn validated(&self) -> Result<(&str, &str), AppError> {
        let title = self.title.trim();
        let content = self.content.trim();
        if title.is_empty() || content.is_empty() {
            return Err(AppError::BadRequest(
                "Title and content are required".to_string(),
            ));
        }
        Ok((title, content))
    }
}

#[derive(Serialize, ToSchema)]
pub struct NoteCreated {
    pub message: String,
    pub note: Note,
}

fn note_not_found() -> AppError {
    AppError::NotFound("Note not found".to_string())
}

#[utoipa::path(
    post,
    path = "/api/notes",
    tag = "notes",
    security(("bearer_auth" = [])),
    request_body = NoteRequest,
    responses(
        (status = 201, description = "Note created", body = NoteCreated),
        (status = 400, description = "Empty title or content", body = MessageResponse)
    )
)]
pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<NoteRequest>,
) -> Result<(StatusCode, Json<NoteCreated>), AppError> {
    let (title, content) = request.validated()?;
    let note = state.storage.create_note(&user.id, title, content)?;
    Ok((
        StatusCode::CREATED,
        Json(NoteCreated {
            message: "Note created successfully".to_string(),
            note,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/notes",
    tag = "notes",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Caller's notes, oldest first", body = [Note]))
)]
pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<Note>>, AppError> {
    Ok(Json(state.storage.list_notes(&user.id)?))
}

#[utoipa::path(
    put,
    path = "/api/notes/{id}",
    tag = "notes",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Note id")),
    request_body = NoteRequest,
    responses(
        (status = 200, description = "Updated note", body = Note),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn update_note(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<NoteRequest>,
) -> Result<Json<Note>, AppError> {
    let (title, content) = request.validated()?;
    state
        .storage
        .update_note(&user.id, &id, title, content)?
        .map(Json)
        .ok_or_else(note_not_found)
}

#[utoipa::path(
    delete,
    path = "/api/notes/{id}",
    tag = "notes",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note deleted", body = MessageResponse),
        (status = 404, description = "Not found or not owned", body = MessageResponse)
    )
)]
pub async fn delete_note(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.storage.delete_note(&user.id, &id)? {
        return Err(note_not_found());
    }
    Ok(MessageResponse::new("Note deleted successfully"))
}
