use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::Response,
    Json,
};
use serde_json::json;

use super::AppState;
use crate::engines::EngineId;
use crate::error::{ApiError, Result};

fn engine_from_path(raw: &str) -> Result<EngineId> {
    EngineId::parse(raw).ok_or_else(|| ApiError::NotFound(format!("Unknown engine '{}'", raw)))
}

fn require_clone_engine(engine: EngineId) -> Result<()> {
    if engine.is_clone_engine() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Engine '{}' does not manage voice samples",
            engine
        )))
    }
}

/// GET /api/voices/custom: merged view across clone engines, dedup by name
pub async fn custom_voices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let voices = state.voices.list();
    Json(json!({ "voices": voices }))
}

/// GET /api/voice-samples: the shipped default samples only
pub async fn voice_samples(State(state): State<AppState>) -> Json<serde_json::Value> {
    let voices: Vec<_> = state
        .voices
        .list()
        .into_iter()
        .filter(|v| v.source == crate::voices::VoiceSource::Default)
        .collect();
    Json(json!({ "voices": voices }))
}

/// GET /api/{engine}/voices
///
/// Clone engines list the shared sample pool; preset engines list their
/// fixed voice tables.
pub async fn list_engine_voices(
    Path(engine): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    let value = match engine {
        EngineId::Kokoro => json!({ "voices": state.engines.kokoro.voices() }),
        EngineId::Supertonic => json!({ "voices": state.engines.supertonic.voices() }),
        EngineId::Cosyvoice3 => json!({ "voices": state.engines.cosyvoice3.voices() }),
        EngineId::Qwen3 | EngineId::Chatterbox | EngineId::Indextts2 => {
            json!({ "voices": state.voices.list() })
        }
    };
    Ok(Json(value))
}

/// POST /api/{engine}/voices: multipart upload of a new voice sample
pub async fn upload_voice(
    Path(engine): Path<String>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    require_clone_engine(engine)?;

    let mut name: Option<String> = None;
    let mut transcript: Option<String> = None;
    let mut audio: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => {
                name = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid 'name' field: {}", e))
                })?)
            }
            "transcript" => {
                transcript = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid 'transcript' field: {}", e))
                })?)
            }
            "file" | "audio" => {
                audio = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            ApiError::BadRequest(format!("Invalid audio upload: {}", e))
                        })?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| ApiError::BadRequest("Field 'name' is required".to_string()))?;
    let audio =
        audio.ok_or_else(|| ApiError::BadRequest("An audio file is required".to_string()))?;

    let voices = std::sync::Arc::clone(&state.voices);
    let voice = tokio::task::spawn_blocking(move || {
        voices.save_upload(&name, &audio, transcript.as_deref())
    })
    .await??;

    tracing::info!(voice = %voice.0.name, engine = %engine, "Voice sample uploaded");
    Ok(Json(json!({
        "status": "ok",
        "voice": voice.0,
        "duration_secs": voice.1,
    })))
}

/// PUT /api/{engine}/voices/{name}
///
/// Multipart parts, all optional: `new_name` renames, `transcript`
/// replaces the transcript, `file`/`audio` replaces the audio.
pub async fn update_voice(
    Path((engine, name)): Path<(String, String)>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    require_clone_engine(engine)?;

    let mut new_name: Option<String> = None;
    let mut transcript: Option<String> = None;
    let mut audio: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "new_name" => {
                new_name = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid 'new_name' field: {}", e))
                })?)
            }
            "transcript" => {
                transcript = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid 'transcript' field: {}", e))
                })?)
            }
            "file" | "audio" => {
                audio = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            ApiError::BadRequest(format!("Invalid audio upload: {}", e))
                        })?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    if new_name.is_none() && transcript.is_none() && audio.is_none() {
        return Err(ApiError::BadRequest(
            "Provide new_name, transcript or an audio file".to_string(),
        ));
    }

    let voices = std::sync::Arc::clone(&state.voices);
    let info = tokio::task::spawn_blocking(move || {
        let mut current = name;
        if let Some(bytes) = audio {
            voices.replace_audio(&current, &bytes)?;
        }
        if let Some(text) = transcript {
            voices.replace_transcript(&current, &text)?;
        }
        if let Some(next) = new_name {
            let renamed = voices.rename(&current, &next)?;
            current = renamed.name;
        }
        voices.get(&current)
    })
    .await??;

    Ok(Json(json!({ "status": "ok", "voice": info })))
}

/// GET /api/{engine}/voices/{name}
pub async fn get_voice(
    Path((engine, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    require_clone_engine(engine)?;

    let voice = state.voices.get(&name)?;
    Ok(Json(json!({ "voice": voice })))
}

/// DELETE /api/{engine}/voices/{name}
pub async fn delete_voice(
    Path((engine, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    require_clone_engine(engine)?;

    state.voices.delete(&name)?;
    Ok(Json(json!({ "status": "ok", "deleted": name })))
}

/// GET /api/{engine}/voices/{name}/audio: raw WAV bytes of a stored sample
pub async fn voice_audio(
    Path((engine, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response> {
    let engine = engine_from_path(&engine)?;
    require_clone_engine(engine)?;

    let voice = state.voices.get(&name)?;
    let bytes = tokio::fs::read(&voice.audio_path).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}.wav\"", voice.name),
        )
        .body(axum::body::Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("response build failed: {}", e)))
}

/// GET /api/{engine}/languages
pub async fn engine_languages(
    Path(engine): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    let languages = match engine {
        EngineId::Kokoro => vec!["en-GB"],
        EngineId::Qwen3 => state.engines.qwen3.get_languages(),
        EngineId::Chatterbox => state.engines.chatterbox.get_languages(),
        EngineId::Supertonic => state.engines.supertonic.get_languages(),
        EngineId::Cosyvoice3 => state.engines.cosyvoice3.get_languages(),
        EngineId::Indextts2 => vec!["en", "zh"],
    };
    Ok(Json(json!({ "languages": languages })))
}

/// GET /api/{engine}/speakers: preset speakers (Qwen3 custom mode only)
pub async fn engine_speakers(
    Path(engine): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    match engine {
        EngineId::Qwen3 => Ok(Json(json!({ "speakers": state.engines.qwen3.get_speakers() }))),
        _ => Err(ApiError::BadRequest(format!(
            "Engine '{}' has no preset speakers",
            engine
        ))),
    }
}

/// GET /api/{engine}/info
pub async fn engine_info(
    Path(engine): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let engine = engine_from_path(&engine)?;
    let info = match engine {
        EngineId::Kokoro => state.engines.kokoro.get_info(),
        EngineId::Qwen3 => state.engines.qwen3.get_info(),
        EngineId::Chatterbox => state.engines.chatterbox.get_info(),
        EngineId::Supertonic => state.engines.supertonic.get_info(),
        EngineId::Cosyvoice3 => state.engines.cosyvoice3.get_info(),
        EngineId::Indextts2 => state.engines.indextts2.get_info(),
    };
    Ok(Json(info))
}
