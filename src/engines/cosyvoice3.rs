use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    adjust_speed, synthesize_chunks, validate_speed, validate_text, BackendCell, BackendLoader,
    EngineId, GenerationOutput, SynthesisSpec,
};
use crate::audio::{chunking, stitch, wav};
use crate::config::constants::SUBPROCESS_TIMEOUT_SECS;
use crate::error::{ApiError, Result};
use crate::models::ModelRegistry;
use crate::outputs::OutputStore;

/// Expressive preset voices of the standalone ONNX pack
pub const VOICES: &[&str] = &["Eden", "Atlas", "Nova", "Sage"];

pub const DEFAULT_VOICE: &str = "Eden";

pub const LANGUAGES: &[&str] = &["en", "zh", "ja", "ko", "yue"];

#[derive(Debug, Clone, Deserialize)]
pub struct CosyVoice3Request {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_true")]
    pub smart_chunking: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_crossfade")]
    pub crossfade_ms: u32,
    #[serde(default)]
    pub unload_after: bool,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_max_chars() -> usize {
    300
}
fn default_crossfade() -> u32 {
    40
}

/// Adapter for the CosyVoice3 standalone ONNX back-end
///
/// When the in-process runtime is missing, an external CLI named by
/// `MIMIKA_COSYVOICE3_CLI` is tried per chunk under a configurable timeout
/// (`MIMIKA_COSYVOICE3_TIMEOUT_SECS`, min 120 s).
pub struct CosyVoice3Adapter {
    models: Arc<ModelRegistry>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl CosyVoice3Adapter {
    pub const MODEL_NAME: &'static str = "CosyVoice3";

    pub fn new(models: Arc<ModelRegistry>, outputs: Arc<OutputStore>, loader: BackendLoader) -> Self {
        Self {
            models,
            outputs,
            loader,
            cell: BackendCell::new(),
        }
    }

    fn subprocess_timeout() -> Duration {
        let secs = std::env::var("MIMIKA_COSYVOICE3_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(SUBPROCESS_TIMEOUT_SECS)
            .max(SUBPROCESS_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn generate(&self, req: &CosyVoice3Request) -> Result<GenerationOutput> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        if !VOICES.contains(&req.voice.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Unknown voice '{}'. Available: {}",
                req.voice,
                VOICES.join(", ")
            )));
        }
        if !LANGUAGES.contains(&req.language.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Unsupported language '{}'",
                req.language
            )));
        }

        let snapshot = self.models.ensure_ready(Self::MODEL_NAME)?;
        let chunks = chunking::chunk_text(&req.text, req.max_chars_per_chunk, req.smart_chunking);
        if chunks.is_empty() {
            return Err(ApiError::BadRequest("Text cannot be empty".to_string()));
        }

        let spec = SynthesisSpec {
            voice: Some(req.voice.clone()),
            language: Some(req.language.clone()),
            options: HashMap::from([("speed", f64::from(req.speed))]),
            ..Default::default()
        };

        let in_process = self.cell.with(
            Self::MODEL_NAME,
            EngineId::Cosyvoice3,
            Some(&snapshot),
            &self.loader,
            |backend| synthesize_chunks(backend, &spec, &chunks),
        );

        let (rendered, sample_rate) = match in_process {
            Ok(result) => result,
            Err(ApiError::ServiceUnavailable(hint)) => {
                self.synthesize_via_subprocess(&chunks, &req.voice, &req.language, &hint)?
            }
            Err(other) => return Err(other),
        };

        let merged = stitch::merge_chunks(&rendered, sample_rate, req.crossfade_ms)?;
        let merged = adjust_speed(merged, req.speed);
        let chunk_count = rendered.len();

        let artifact = self
            .outputs
            .write_wav("cosyvoice3", &req.voice, &merged, sample_rate)?;

        if req.unload_after {
            self.unload();
        }

        Ok(GenerationOutput {
            file_name: artifact.file_name,
            audio_url: artifact.url,
            output_path: artifact.path,
            duration_secs: merged.len() as f64 / f64::from(sample_rate),
            sample_rate,
            chunks: chunk_count,
        })
    }

    /// Chunk-by-chunk synthesis through the external CLI fallback
    fn synthesize_via_subprocess(
        &self,
        chunks: &[String],
        voice: &str,
        language: &str,
        unavailable_hint: &str,
    ) -> Result<(Vec<Vec<f32>>, u32)> {
        let Ok(cli) = std::env::var("MIMIKA_COSYVOICE3_CLI") else {
            return Err(ApiError::ServiceUnavailable(unavailable_hint.to_string()));
        };
        let timeout = Self::subprocess_timeout();

        let mut rendered = Vec::with_capacity(chunks.len());
        let mut sample_rate = None;
        for chunk in chunks {
            let scratch = std::env::temp_dir().join(format!(
                "cosyvoice3-{}.wav",
                crate::outputs::short_hex()
            ));
            let result = run_cli_synth(&cli, chunk, voice, language, &scratch, timeout);
            let audio = match result {
                Ok(()) => wav::read_mono(&scratch),
                Err(e) => Err(e),
            };
            let _ = std::fs::remove_file(&scratch);
            let audio = audio?;

            match sample_rate {
                None => {
                    sample_rate = Some(audio.sample_rate);
                    rendered.push(audio.samples);
                }
                Some(sr) if sr != audio.sample_rate => {
                    rendered.push(stitch::resample(&audio.samples, audio.sample_rate, sr));
                }
                Some(_) => rendered.push(audio.samples),
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| ApiError::Internal("No audio generated".to_string()))?;
        Ok((rendered, sample_rate))
    }

    pub fn voices(&self) -> Vec<&'static str> {
        VOICES.to_vec()
    }

    pub fn get_languages(&self) -> Vec<&'static str> {
        LANGUAGES.to_vec()
    }

    pub fn get_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "CosyVoice3",
            "engine": EngineId::Cosyvoice3,
            "mode": "tts",
            "voices": VOICES,
            "languages": LANGUAGES,
            "default_voice": DEFAULT_VOICE,
            "subprocess_fallback": std::env::var("MIMIKA_COSYVOICE3_CLI").is_ok(),
            "loaded": self.cell.is_loaded(),
        })
    }

    pub fn unload(&self) {
        self.cell.unload();
    }
}

/// Run the external synthesizer for one chunk, killing it on timeout
fn run_cli_synth(
    cli: &str,
    text: &str,
    voice: &str,
    language: &str,
    output: &Path,
    timeout: Duration,
) -> Result<()> {
    let mut child = std::process::Command::new(cli)
        .arg("--voice")
        .arg(voice)
        .arg("--language")
        .arg(language)
        .arg("--output")
        .arg(output)
        .arg("--text")
        .arg(text)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            ApiError::ServiceUnavailable(format!("cosyvoice3 CLI '{}' failed to start: {}", cli, e))
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                return Err(ApiError::Internal(format!(
                    "cosyvoice3 CLI exited with {}",
                    status
                )));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ApiError::Internal(format!(
                        "cosyvoice3 CLI timed out after {}s",
                        timeout.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return Err(ApiError::Internal(format!(
                    "cosyvoice3 CLI wait failed: {}",
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathService;
    use crate::engines::backend::testing::fake_loader;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, ready: bool) -> CosyVoice3Adapter {
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        if ready {
            let model = models.get(CosyVoice3Adapter::MODEL_NAME).unwrap();
            let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
            std::fs::create_dir_all(&snapshot).unwrap();
            std::fs::write(snapshot.join("model.onnx"), b"w").unwrap();
        }
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));
        CosyVoice3Adapter::new(models, outputs, fake_loader())
    }

    fn request() -> CosyVoice3Request {
        CosyVoice3Request {
            text: "A short line.".to_string(),
            voice: "Atlas".to_string(),
            language: "en".to_string(),
            speed: 1.0,
            smart_chunking: true,
            max_chars_per_chunk: 300,
            crossfade_ms: 40,
            unload_after: false,
        }
    }

    #[test]
    fn test_generate_preset_voice() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let out = adapter.generate(&request()).unwrap();
        assert!(out.audio_url.starts_with("/audio/cosyvoice3-Atlas-"));
    }

    #[test]
    fn test_unknown_voice_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let mut req = request();
        req.voice = "Phantom".to_string();
        assert!(matches!(
            adapter.generate(&req),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_unavailable_runtime_without_cli_is_503() {
        let temp = TempDir::new().unwrap();
        std::env::remove_var("MIMIKA_COSYVOICE3_CLI");
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        let model = models.get(CosyVoice3Adapter::MODEL_NAME).unwrap();
        let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(snapshot.join("model.onnx"), b"w").unwrap();
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));
        let adapter = CosyVoice3Adapter::new(
            models,
            outputs,
            crate::engines::backend::unavailable_loader(),
        );

        assert!(matches!(
            adapter.generate(&request()),
            Err(ApiError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_subprocess_timeout_floor() {
        std::env::remove_var("MIMIKA_COSYVOICE3_TIMEOUT_SECS");
        assert_eq!(
            CosyVoice3Adapter::subprocess_timeout(),
            Duration::from_secs(SUBPROCESS_TIMEOUT_SECS)
        );
        std::env::set_var("MIMIKA_COSYVOICE3_TIMEOUT_SECS", "30");
        // Requests below the floor clamp up
        assert_eq!(
            CosyVoice3Adapter::subprocess_timeout(),
            Duration::from_secs(SUBPROCESS_TIMEOUT_SECS)
        );
        std::env::set_var("MIMIKA_COSYVOICE3_TIMEOUT_SECS", "300");
        assert_eq!(
            CosyVoice3Adapter::subprocess_timeout(),
            Duration::from_secs(300)
        );
        std::env::remove_var("MIMIKA_COSYVOICE3_TIMEOUT_SECS");
    }
}
