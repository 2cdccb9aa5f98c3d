use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use super::AppState;
use crate::error::Result;
use crate::models::download::StartOutcome;

/// GET /api/models/status: the full catalog with readiness and downloads
pub async fn models_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let models = state.models.clone();
    let downloads = state.downloads.clone();

    // Snapshot probing walks the cache directories
    let rows = tokio::task::spawn_blocking(move || {
        models
            .catalog()
            .into_iter()
            .map(|m| {
                let downloaded = models.is_downloaded(&m);
                let snapshot = models.snapshot_path(&m);
                let download = downloads.status_for(m.download_key());
                json!({
                    "name": m.name,
                    "engine": m.engine,
                    "repo": m.repo,
                    "size_gb": m.size_gb,
                    "mode": m.mode,
                    "quantization": m.quantization,
                    "speakers": m.speakers,
                    "acquisition": m.acquisition,
                    "description": m.description,
                    "downloaded": downloaded,
                    "snapshot_path": snapshot,
                    "download": download,
                })
            })
            .collect::<Vec<_>>()
    })
    .await?;

    Ok(Json(json!({
        "models": rows,
        "dicta": state.downloads.dicta_status(),
    })))
}

/// POST /api/models/{name}/download: 202 with the download kicked off
pub async fn download_model(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let outcome = state.downloads.start(&state.models, &name)?;
    let status = match outcome {
        StartOutcome::Started | StartOutcome::AlreadyInProgress => StatusCode::ACCEPTED,
        StartOutcome::AlreadyDownloaded => StatusCode::OK,
    };
    Ok((
        status,
        Json(json!({ "model": name, "detail": outcome.message() })),
    ))
}

/// DELETE /api/models/{name}: drop the cached snapshot directory
pub async fn delete_model(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let models = state.models.clone();
    let downloads = state.downloads.clone();
    tokio::task::spawn_blocking(move || downloads.delete(&models, &name)).await??;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/models/dicta/download: fetch the Hebrew phonemizer
pub async fn dicta_download(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let outcome = state.downloads.start_dicta(state.paths.dicta_model_dir());
    let status = match outcome {
        StartOutcome::Started | StartOutcome::AlreadyInProgress => StatusCode::ACCEPTED,
        StartOutcome::AlreadyDownloaded => StatusCode::OK,
    };
    Ok((status, Json(json!({ "detail": outcome.message() }))))
}

/// GET /api/models/dicta/status
pub async fn dicta_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "dicta": state.downloads.dicta_status() }))
}
