use std::sync::Arc;

use super::{JobBoard, JobKind, JobRecord, JobStatus};
use crate::engines::qwen3::{Qwen3Adapter, Qwen3Mode, Qwen3Request};
use crate::error::Result;

/// Accept a Qwen3 request for background processing
///
/// Validation runs eagerly on the caller's path, exactly like the
/// synchronous endpoint: a missing model (409), unknown voice (404) or bad
/// parameter (400) fails here and nothing is enqueued. On success the job id
/// comes back immediately and a worker drives
/// `started → processing → completed|failed`.
pub fn enqueue_qwen3(
    board: &Arc<JobBoard>,
    adapter: &Arc<Qwen3Adapter>,
    req: Qwen3Request,
    request_id: &str,
) -> Result<String> {
    // The plan is only built to fail fast; its scratch reference is dropped
    // right away and the worker rebuilds its own.
    let plan = adapter.prepare(&req)?;
    let mode = plan.mode;
    let model_name = plan.model_name;
    drop(plan);

    let mut record = JobRecord::new(
        match mode {
            Qwen3Mode::Clone => JobKind::VoiceClone,
            Qwen3Mode::Custom => JobKind::Tts,
        },
        "qwen3",
        mode.as_str(),
        request_id,
    );
    record.chars = req.text.trim().len();
    record.voice = req.voice_name.clone();
    record.speaker = req.speaker.clone();
    record.language = Some(req.language.clone());
    record.model = Some(model_name.to_string());
    record.title = match mode {
        Qwen3Mode::Clone => format!(
            "Clone: {}",
            req.voice_name.as_deref().unwrap_or("voice")
        ),
        Qwen3Mode::Custom => format!("Speaker: {}", req.speaker.as_deref().unwrap_or("preset")),
    };
    let job_id = record.id.clone();
    board.insert_live(record);

    tracing::info!(
        job_id = %job_id,
        engine = "qwen3",
        mode = %mode.as_str(),
        chars = req.text.trim().len(),
        "Job enqueued"
    );

    let board = Arc::clone(board);
    let adapter = Arc::clone(adapter);
    let worker_id = job_id.clone();
    tokio::task::spawn_blocking(move || {
        board.update_live(&worker_id, |r| r.status = JobStatus::Processing);

        match adapter.generate(&req) {
            Ok(output) => {
                board.finish(&worker_id, JobStatus::Completed, |r| {
                    r.output_path = Some(output.output_path.clone());
                    r.audio_url = Some(output.audio_url.clone());
                });
                tracing::info!(
                    job_id = %worker_id,
                    output = %output.output_path.display(),
                    duration_secs = output.duration_secs,
                    "Job completed"
                );
            }
            Err(e) => {
                let message = e.to_string();
                board.finish(&worker_id, JobStatus::Failed, |r| {
                    r.error = Some(message.clone());
                });
                tracing::error!(job_id = %worker_id, error = %message, "Job failed");
            }
        }
    });

    Ok(job_id)
}
