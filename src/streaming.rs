use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::Response;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::config::constants::NORMALIZED_SAMPLE_RATE;
use crate::engines::qwen3::{Qwen3Adapter, Qwen3Request};
use crate::error::{ApiError, Result};
use crate::jobs::{JobBoard, JobKind, JobRecord, JobStatus};

/// Build the streaming PCM response for a Qwen3 request
///
/// Validation and reference preparation happen before the response starts,
/// so parameter errors still come back as a proper error envelope. After
/// that a producer task feeds mono s16le frames through a bounded channel;
/// if the client disconnects the channel closes, the producer stops at the
/// next chunk, and the scratch reference is removed by its guard.
pub async fn qwen3_pcm_response(
    adapter: Arc<Qwen3Adapter>,
    board: Arc<JobBoard>,
    req: Qwen3Request,
    request_id: String,
) -> Result<Response> {
    let plan = {
        let adapter = Arc::clone(&adapter);
        let req = req.clone();
        tokio::task::spawn_blocking(move || adapter.prepare(&req)).await??
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<std::result::Result<Bytes, String>>(8);

    let mode = plan.mode;
    let voice = req.voice_name.clone();
    let speaker = req.speaker.clone();
    let language = req.language.clone();
    let chars = req.text.trim().len();
    let model_name = plan.model_name;
    tokio::task::spawn_blocking(move || {
        let mut sent_bytes = 0usize;
        let mut sink = |frame: Vec<u8>| {
            sent_bytes += frame.len();
            tx.blocking_send(Ok(Bytes::from(frame))).is_ok()
        };

        match adapter.run_stream(&plan, &mut sink) {
            Ok(()) => {
                let mut record =
                    JobRecord::new(JobKind::TtsStream, "qwen3", mode.as_str(), &request_id);
                record.status = JobStatus::Completed;
                record.streamed = true;
                record.chars = chars;
                record.voice = voice;
                record.speaker = speaker;
                record.language = Some(language);
                record.model = Some(model_name.to_string());
                record.title = format!("qwen3 {} stream", mode.as_str());
                board.record_terminal(record);
                tracing::info!(
                    request_id = %request_id,
                    bytes = sent_bytes,
                    "Streaming generation completed"
                );
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Streaming generation failed");
                // Mid-stream failures can only truncate the body; the
                // status line is long gone.
                let _ = tx.blocking_send(Err(e.to_string()));
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let body = Body::from_stream(stream);

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("audio/L16; rate={}; channels=1", NORMALIZED_SAMPLE_RATE),
        )
        .header("X-Audio-Format", "pcm_s16le")
        .header("X-Audio-Sample-Rate", NORMALIZED_SAMPLE_RATE.to_string())
        .header("X-Audio-Channels", "1")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .map_err(|e| ApiError::Internal(format!("response build failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav;
    use crate::config::PathService;
    use crate::engines::backend::testing::fake_loader;
    use crate::models::ModelRegistry;
    use crate::outputs::OutputStore;
    use crate::voices::VoiceStore;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> (Arc<Qwen3Adapter>, Arc<JobBoard>) {
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        let model = models.get("Qwen3-TTS-12Hz-0.6B-Base").unwrap();
        let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(snapshot.join("model.safetensors"), b"w").unwrap();

        let samples_dir = temp.path().join("samples");
        let user_dir = temp.path().join("user");
        std::fs::create_dir_all(&samples_dir).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();
        wav::write_pcm16(
            &samples_dir.join("Natasha.wav"),
            &vec![0.2f32; 24_000],
            24_000,
        )
        .unwrap();
        let voices = Arc::new(VoiceStore::new(samples_dir, user_dir, vec![]));

        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));

        (
            Arc::new(Qwen3Adapter::new(models, voices, outputs, fake_loader())),
            Arc::new(JobBoard::new()),
        )
    }

    fn stream_request() -> Qwen3Request {
        serde_json::from_value(serde_json::json!({
            "text": "hello streaming world",
            "mode": "clone",
            "voice_name": "Natasha",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_response_headers_and_body() {
        let temp = TempDir::new().unwrap();
        let (adapter, board) = fixture(&temp);

        let response = qwen3_pcm_response(adapter, board, stream_request(), "req1".to_string())
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("X-Audio-Format").unwrap(),
            "pcm_s16le"
        );
        assert_eq!(
            response.headers().get("X-Audio-Sample-Rate").unwrap(),
            "24000"
        );
        assert_eq!(response.headers().get("X-Audio-Channels").unwrap(), "1");
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("audio/L16"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(!body.is_empty());
        assert_eq!(body.len() % 2, 0, "body is whole s16le samples");
    }

    #[tokio::test]
    async fn test_stream_records_history_entry() {
        let temp = TempDir::new().unwrap();
        let (adapter, board) = fixture(&temp);

        let response = qwen3_pcm_response(
            adapter,
            Arc::clone(&board),
            stream_request(),
            "req2".to_string(),
        )
        .await
        .unwrap();
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        // Producer records the terminal entry after draining
        for _ in 0..50 {
            if board.history_count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let jobs = board.snapshot(10);
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].streamed);
        assert_eq!(jobs[0].kind, JobKind::TtsStream);
    }

    #[tokio::test]
    async fn test_validation_errors_surface_before_streaming() {
        let temp = TempDir::new().unwrap();
        let (adapter, board) = fixture(&temp);

        let mut req = stream_request();
        req.voice_name = Some("Ghost".to_string());
        let err = qwen3_pcm_response(adapter, board, req, "req3".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_scratch_cleanup_after_stream() {
        let temp = TempDir::new().unwrap();
        let (adapter, board) = fixture(&temp);
        let outputs_dir = temp.path().join("outputs");

        let response = qwen3_pcm_response(adapter, board, stream_request(), "req4".to_string())
            .await
            .unwrap();
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let scratch: Vec<_> = std::fs::read_dir(&outputs_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("qwen3-ref-"))
            .collect();
        assert!(scratch.is_empty(), "scratch reference left behind");
    }
}
