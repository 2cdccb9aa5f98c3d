use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::{parse_request, ApiJson, AppState};
use crate::engines::{EngineId, GenerationOutput};
use crate::error::{ApiError, Result};
use crate::jobs::{queue, JobKind, JobRecord, JobStatus};
use crate::logging;
use crate::streaming;

/// Record a finished synchronous generation in the shared history
#[allow(clippy::too_many_arguments)]
fn record_sync_job(
    state: &AppState,
    kind: JobKind,
    engine: EngineId,
    mode: &str,
    chars: usize,
    voice: Option<String>,
    speaker: Option<String>,
    language: Option<String>,
    output: &GenerationOutput,
) {
    let mut record = JobRecord::new(kind, engine.as_str(), mode, &logging::current_request_id());
    record.status = JobStatus::Completed;
    record.chars = chars;
    record.voice = voice;
    record.speaker = speaker;
    record.language = language;
    record.output_path = Some(output.output_path.clone());
    record.audio_url = Some(output.audio_url.clone());
    state.board.record_terminal(record);

    tracing::info!(
        engine = %engine,
        mode = %mode,
        chars = chars,
        output = %output.output_path.display(),
        duration_secs = output.duration_secs,
        "Generation completed"
    );
}

fn output_response(engine: EngineId, output: &GenerationOutput) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "engine": engine.as_str(),
        "file_name": output.file_name,
        "audio_url": output.audio_url,
        "duration_secs": output.duration_secs,
        "sample_rate": output.sample_rate,
        "chunks": output.chunks,
    }))
}

/// POST /api/{engine}/generate
///
/// The body is the engine's own parameter record; Qwen3 additionally honors
/// `enqueue: true`, answering immediately with a job id.
pub async fn generate(
    Path(engine): Path<String>,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<serde_json::Value>,
) -> Result<Response> {
    use axum::response::IntoResponse;

    let engine = EngineId::parse(&engine)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown engine '{}'", engine)))?;

    let response = match engine {
        EngineId::Kokoro => {
            let req: crate::engines::kokoro::KokoroRequest = parse_request(body)?;
            let adapter = Arc::clone(&state.engines.kokoro);
            let chars = req.text.trim().len();
            let voice = req.voice.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                JobKind::Tts,
                engine,
                "tts",
                chars,
                Some(voice),
                None,
                None,
                &output,
            );
            output_response(engine, &output).into_response()
        }
        EngineId::Qwen3 => {
            let req: crate::engines::qwen3::Qwen3Request = parse_request(body)?;
            if req.enqueue {
                let job_id = queue::enqueue_qwen3(
                    &state.board,
                    &state.engines.qwen3,
                    req,
                    &logging::current_request_id(),
                )?;
                return Ok(Json(json!({"job_id": job_id, "status": "started"})).into_response());
            }
            let adapter = Arc::clone(&state.engines.qwen3);
            let chars = req.text.trim().len();
            let voice = req.voice_name.clone();
            let speaker = req.speaker.clone();
            let language = req.language.clone();
            let mode = req.mode.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                if mode == "clone" {
                    JobKind::VoiceClone
                } else {
                    JobKind::Tts
                },
                engine,
                &mode,
                chars,
                voice,
                speaker,
                Some(language),
                &output,
            );
            output_response(engine, &output).into_response()
        }
        EngineId::Chatterbox => {
            let req: crate::engines::chatterbox::ChatterboxRequest = parse_request(body)?;
            let adapter = Arc::clone(&state.engines.chatterbox);
            let chars = req.text.trim().len();
            let voice = req.voice_name.clone();
            let language = req.language.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                JobKind::VoiceClone,
                engine,
                "clone",
                chars,
                Some(voice),
                None,
                Some(language),
                &output,
            );
            output_response(engine, &output).into_response()
        }
        EngineId::Supertonic => {
            let req: crate::engines::supertonic::SupertonicRequest = parse_request(body)?;
            let adapter = Arc::clone(&state.engines.supertonic);
            let chars = req.text.trim().len();
            let voice = req.voice.clone();
            let language = req.language.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                JobKind::Tts,
                engine,
                "tts",
                chars,
                Some(voice),
                None,
                Some(language),
                &output,
            );
            output_response(engine, &output).into_response()
        }
        EngineId::Cosyvoice3 => {
            let req: crate::engines::cosyvoice3::CosyVoice3Request = parse_request(body)?;
            let adapter = Arc::clone(&state.engines.cosyvoice3);
            let chars = req.text.trim().len();
            let voice = req.voice.clone();
            let language = req.language.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                JobKind::Tts,
                engine,
                "tts",
                chars,
                Some(voice),
                None,
                Some(language),
                &output,
            );
            output_response(engine, &output).into_response()
        }
        EngineId::Indextts2 => {
            let req: crate::engines::indextts2::IndexTts2Request = parse_request(body)?;
            let adapter = Arc::clone(&state.engines.indextts2);
            let chars = req.text.trim().len();
            let voice = req.voice_name.clone();
            let worker = req.clone();
            let output =
                tokio::task::spawn_blocking(move || adapter.generate(&worker)).await??;
            record_sync_job(
                &state,
                JobKind::VoiceClone,
                engine,
                "clone",
                chars,
                Some(voice),
                None,
                None,
                &output,
            );
            output_response(engine, &output).into_response()
        }
    };

    Ok(response)
}

/// POST /api/qwen3/generate/stream: chunked PCM L16 response
pub async fn qwen3_stream(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<crate::engines::qwen3::Qwen3Request>,
) -> Result<Response> {
    streaming::qwen3_pcm_response(
        Arc::clone(&state.engines.qwen3),
        Arc::clone(&state.board),
        req,
        logging::current_request_id(),
    )
    .await
}
