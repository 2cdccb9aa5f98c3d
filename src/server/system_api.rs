use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiJson, AppState};
use crate::alignment::WordAlignmentRequest;
use crate::error::{ApiError, Result};
use crate::system;

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "mimikastudio" }))
}

/// GET /api/system/info
pub async fn system_info(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let device = system::device_probe().await;

    let models: serde_json::Map<String, serde_json::Value> = state
        .models
        .catalog()
        .into_iter()
        .map(|m| {
            (
                m.name.to_string(),
                json!({
                    "engine": m.engine,
                    "repo": m.repo,
                    "mode": m.mode,
                    "description": m.description,
                }),
            )
        })
        .collect();

    Ok(Json(json!({
        "service": "mimikastudio",
        "version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "runtime": "rust",
        "device": device,
        "models": models,
        "folders": system::folders(&state.paths),
    })))
}

/// GET /api/system/stats
pub async fn system_stats() -> Result<Json<serde_json::Value>> {
    let mut stats = tokio::task::spawn_blocking(system::resource_stats).await?;
    stats.gpu = system::gpu_stats().await;
    Ok(Json(json!(stats)))
}

/// GET /api/system/folders
pub async fn system_folders(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "folders": system::folders(&state.paths) }))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_lines() -> usize {
    500
}

/// GET /api/system/logs
pub async fn system_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>> {
    let log_dir = state.paths.log_dir().to_path_buf();
    let (lines, sources) =
        tokio::task::spawn_blocking(move || system::read_log_tail(&log_dir, query.max_lines))
            .await?;
    Ok(Json(json!({
        "lines": lines,
        "line_count": lines.len(),
        "sources": sources,
        "generated_at": chrono::Local::now().to_rfc3339(),
    })))
}

/// GET /api/system/logs/export: merged tail as a downloadable text file
pub async fn export_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Response> {
    let log_dir = state.paths.log_dir().to_path_buf();
    let (file_name, bytes) =
        tokio::task::spawn_blocking(move || system::export_log_text(&log_dir, query.max_lines.max(2000)))
            .await??;

    attachment_response(&file_name, "text/plain; charset=utf-8", bytes)
}

/// GET /api/system/diagnostics/export: zip bundle of the log directory
pub async fn export_diagnostics(State(state): State<AppState>) -> Result<Response> {
    let log_dir = state.paths.log_dir().to_path_buf();
    let (file_name, bytes) =
        tokio::task::spawn_blocking(move || system::build_diagnostics_zip(&log_dir)).await??;

    attachment_response(&file_name, "application/zip", bytes)
}

fn attachment_response(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<Response> {
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(axum::body::Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("response build failed: {}", e)))
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default = "default_jobs_limit")]
    pub limit: usize,
}

fn default_jobs_limit() -> usize {
    200
}

/// GET /api/jobs: live jobs plus terminal history, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Json<serde_json::Value> {
    let jobs = state.board.snapshot(query.limit);
    Json(json!({ "jobs": jobs }))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let job = state
        .board
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Job '{}' not found", id)))?;
    Ok(Json(json!(job)))
}

/// GET /api/pregenerated: the full showcase catalog
pub async fn pregenerated(State(state): State<AppState>) -> Json<serde_json::Value> {
    let samples: Vec<serde_json::Value> = state
        .pregen
        .list(None)
        .into_iter()
        .map(|row| {
            let url = row.url();
            let mut value = json!(row);
            value["url"] = json!(url);
            value
        })
        .collect();
    Json(json!({ "samples": samples }))
}

/// GET /api/samples/{engine}
pub async fn engine_samples(
    Path(engine): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let samples: Vec<serde_json::Value> = state
        .pregen
        .list(Some(&engine))
        .into_iter()
        .map(|row| {
            let url = row.url();
            let mut value = json!(row);
            value["url"] = json!(url);
            value
        })
        .collect();
    Json(json!({ "samples": samples }))
}

/// GET /api/pdf/list: documents available in the PDF drop folder
pub async fn pdf_list(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let pdf_dir = state.paths.pdf_dir().to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        let mut files: Vec<serde_json::Value> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&pdf_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_lowercase();
                if !matches!(ext.as_str(), "pdf" | "epub" | "docx" | "txt" | "md") {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                files.push(json!({
                    "name": name,
                    "url": format!("/pdf/{}", name),
                    "size_bytes": size,
                }));
            }
        }
        files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        files
    })
    .await?;
    Ok(Json(json!({ "files": files })))
}

/// POST /api/pdf/extract-text: multi-format document extraction
pub async fn extract_text(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name().unwrap_or_default() == "file" {
            file_name = field.file_name().map(String::from);
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid file upload: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let file_name =
        file_name.ok_or_else(|| ApiError::BadRequest("A document file is required".to_string()))?;
    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::BadRequest("A document file is required".to_string()))?;

    let extractors = std::sync::Arc::clone(&state.extractors);
    let name = file_name.clone();
    let document =
        tokio::task::spawn_blocking(move || extractors.extract(&name, &file_bytes)).await??;

    Ok(Json(json!({
        "file_name": file_name,
        "text": document.text,
        "chars": document.text.chars().count(),
        "chapters": document.chapters,
    })))
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "settings": state.settings.all(),
        "updated_at": state.settings.last_updated(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdateRequest {
    pub key: String,
    pub value: String,
}

/// PUT /api/settings: upsert one key
pub async fn update_setting(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SettingsUpdateRequest>,
) -> Result<Json<serde_json::Value>> {
    if req.key.trim().is_empty() {
        return Err(ApiError::BadRequest("Setting key cannot be empty".to_string()));
    }
    state.settings.set(req.key.trim(), &req.value)?;
    Ok(Json(json!({ "status": "ok", "key": req.key.trim() })))
}

/// GET /api/outputs and /api/voice-clone/audio/list
///
/// Enumerate generated artifacts with on-demand size/duration metadata;
/// `engine` narrows to one back-end.
#[derive(Debug, Deserialize)]
pub struct OutputsQuery {
    pub engine: Option<String>,
}

pub async fn list_outputs(
    State(state): State<AppState>,
    Query(query): Query<OutputsQuery>,
) -> Result<Json<serde_json::Value>> {
    let outputs = std::sync::Arc::clone(&state.outputs);
    let files =
        tokio::task::spawn_blocking(move || outputs.list(query.engine.as_deref())).await?;
    let count = files.len();
    Ok(Json(json!({ "audio_files": files, "count": count })))
}

/// GET /api/settings/output-folder
pub async fn get_output_folder(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "path": state.paths.outputs_dir(),
        "env_override": state.paths.outputs_env_override(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct OutputFolderRequest {
    pub path: String,
}

/// PUT /api/settings/output-folder
///
/// Creates the directory, swaps the live static mount, and persists the
/// choice. Refused with the effective path when `MIMIKA_OUTPUT_DIR` pins it.
pub async fn set_output_folder(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OutputFolderRequest>,
) -> Result<Json<serde_json::Value>> {
    let trimmed = req.path.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(
            "Output folder path cannot be empty".to_string(),
        ));
    }
    if state.paths.outputs_env_override() {
        return Err(ApiError::BadRequest(format!(
            "Output folder is pinned by MIMIKA_OUTPUT_DIR ({})",
            state.paths.outputs_dir().display()
        )));
    }

    let target = crate::config::expand_user(trimmed);
    let resolved = state
        .paths
        .set_outputs_dir(&target)
        .map_err(|e| ApiError::BadRequest(format!("Cannot use output folder: {}", e)))?;
    state
        .settings
        .set(crate::settings::OUTPUT_FOLDER_KEY, &resolved.display().to_string())?;

    tracing::info!(path = %resolved.display(), "Output folder retargeted");
    Ok(Json(json!({ "status": "ok", "output_folder": resolved })))
}

/// POST /api/word-alignment: map expected words onto recognized timings
pub async fn word_alignment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<WordAlignmentRequest>,
) -> Result<Json<serde_json::Value>> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text cannot be empty".to_string()));
    }
    let audio_path = state.outputs.resolve_audio_url(&req.audio_url)?;

    let alignment = std::sync::Arc::clone(&state.alignment);
    let words = tokio::task::spawn_blocking(move || {
        alignment.align(&req.text, &audio_path, &req.language)
    })
    .await??;

    let count = words.len();
    Ok(Json(json!({ "words": words, "count": count })))
}
