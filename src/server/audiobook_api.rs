use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::json;

use super::{ApiJson, AppState};
use crate::error::{ApiError, Result};
use crate::jobs::audiobook::AudiobookRequest;
use crate::logging;

/// POST /api/audiobook/generate: accept a long-form synthesis job
pub async fn generate(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AudiobookRequest>,
) -> Result<Json<serde_json::Value>> {
    let id = state.audiobooks.submit(
        &state.board,
        &state.engines.kokoro,
        &state.outputs,
        req,
        &logging::current_request_id(),
    )?;
    Ok(Json(json!({ "job_id": id, "status": "started" })))
}

/// POST /api/audiobook/generate-from-file
///
/// Multipart: a `file` part (txt/md/pdf/epub/docx) plus optional fields
/// mirroring the JSON request. Extracted chapter structure carries through
/// to the job.
pub async fn generate_from_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut fields: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            file_name = field.file_name().map(String::from);
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid file upload: {}", e)))?
                    .to_vec(),
            );
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Invalid '{}' field: {}", name, e)))?;
            // Numeric knobs arrive as strings in multipart; keep them typed
            let value = if let Ok(n) = text.parse::<i64>() {
                json!(n)
            } else if let Ok(n) = text.parse::<f64>() {
                json!(n)
            } else {
                json!(text)
            };
            fields.insert(name, value);
        }
    }

    let file_name =
        file_name.ok_or_else(|| ApiError::BadRequest("A document file is required".to_string()))?;
    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::BadRequest("A document file is required".to_string()))?;

    let extractors = std::sync::Arc::clone(&state.extractors);
    let doc_name = file_name.clone();
    let document =
        tokio::task::spawn_blocking(move || extractors.extract(&doc_name, &file_bytes)).await??;

    fields.insert("text".to_string(), json!(document.text));
    fields.insert("chapters".to_string(), json!(document.chapters));
    if !fields.contains_key("title") {
        let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&file_name);
        fields.insert("title".to_string(), json!(stem));
    }
    let req: AudiobookRequest = super::parse_request(serde_json::Value::Object(fields))?;

    let id = state.audiobooks.submit(
        &state.board,
        &state.engines.kokoro,
        &state.outputs,
        req,
        &logging::current_request_id(),
    )?;
    Ok(Json(json!({ "job_id": id, "status": "started" })))
}

/// GET /api/audiobook/status/{id}
pub async fn status(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let job = state
        .audiobooks
        .status(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Audiobook job '{}' not found", id)))?;
    Ok(Json(json!(job)))
}

/// POST /api/audiobook/cancel/{id}
pub async fn cancel(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let job = state.audiobooks.cancel(&id)?;
    Ok(Json(json!({ "job_id": id, "status": job.status })))
}

/// GET /api/audiobook/list
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "jobs": state.audiobooks.list() }))
}

/// DELETE /api/audiobook/{id}
pub async fn delete(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    state.audiobooks.delete(&id)?;
    Ok(Json(json!({ "status": "ok", "deleted": id })))
}
