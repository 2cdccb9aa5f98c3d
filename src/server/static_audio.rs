use axum::{
    extract::{Path, State},
    http::header,
    response::Response,
    Json,
};
use serde_json::json;

use super::AppState;
use crate::error::{ApiError, Result};

/// Media types for artifacts served from the outputs directory
///
/// A fixed map instead of system mime probing keeps sandboxed app builds
/// from touching protected mime.types files.
fn media_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4b" => "audio/mp4",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn sanitize(file_name: &str) -> Result<&str> {
    if file_name.is_empty() || file_name.contains("..") || file_name.contains(['/', '\\']) {
        return Err(ApiError::BadRequest(format!(
            "Invalid file name '{}'",
            file_name
        )));
    }
    Ok(file_name)
}

/// GET /audio/{file}
///
/// Reads through the path service on every request, so retargeting the
/// output folder takes effect without a restart.
pub async fn serve_audio(
    Path(file_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let file_name = sanitize(&file_name)?.to_string();
    let path = state.paths.outputs_dir().join(&file_name);

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("Audio file not found: {}", file_name)))?;

    Response::builder()
        .header(header::CONTENT_TYPE, media_type(&file_name))
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::ACCEPT_RANGES, "bytes")
        .body(axum::body::Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("response build failed: {}", e)))
}

/// DELETE /audio/{file}: grammar-validated artifact deletion
pub async fn delete_audio(
    Path(file_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let file_name = sanitize(&file_name)?.to_string();
    let outputs = std::sync::Arc::clone(&state.outputs);
    tokio::task::spawn_blocking(move || outputs.delete(&file_name)).await??;
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_map() {
        assert_eq!(media_type("a.wav"), "audio/wav");
        assert_eq!(media_type("a.mp3"), "audio/mpeg");
        assert_eq!(media_type("a.M4B"), "audio/mp4");
        assert_eq!(media_type("a.vtt"), "text/vtt");
        assert_eq!(media_type("a.unknown"), "application/octet-stream");
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert!(sanitize("ok-file.wav").is_ok());
        assert!(sanitize("../etc/passwd").is_err());
        assert!(sanitize("a/b.wav").is_err());
        assert!(sanitize("").is_err());
    }
}
