use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    adjust_speed, synthesize_chunks, validate_speed, validate_text, BackendCell, BackendLoader,
    EngineId, GenerationOutput, SynthesisSpec,
};
use crate::audio::{chunking, stitch};
use crate::error::{ApiError, Result};
use crate::models::ModelRegistry;
use crate::outputs::OutputStore;

/// Preset voices shipped with Supertonic-2
pub const VOICES: &[&str] = &["F1", "F2", "M1", "M2"];

pub const DEFAULT_VOICE: &str = "F1";

pub const LANGUAGES: &[&str] = &["en", "ko", "ja", "zh", "es", "pt", "fr", "de"];

#[derive(Debug, Clone, Deserialize)]
pub struct SupertonicRequest {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_total_steps")]
    pub total_steps: u32,
    #[serde(default = "default_true")]
    pub smart_chunking: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_silence")]
    pub silence_ms: u32,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_speed() -> f32 {
    1.05
}
fn default_total_steps() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_max_chars() -> usize {
    300
}
fn default_silence() -> u32 {
    300
}

/// Adapter for the Supertonic-2 ONNX TTS back-end
///
/// Chunks are joined with a silence gap instead of a crossfade; the engine's
/// hard stops between sentences sound better with a breath of padding.
pub struct SupertonicAdapter {
    models: Arc<ModelRegistry>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl SupertonicAdapter {
    pub const MODEL_NAME: &'static str = "Supertonic-2";

    pub fn new(models: Arc<ModelRegistry>, outputs: Arc<OutputStore>, loader: BackendLoader) -> Self {
        Self {
            models,
            outputs,
            loader,
            cell: BackendCell::new(),
        }
    }

    pub fn generate(&self, req: &SupertonicRequest) -> Result<GenerationOutput> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        // Preset sets are closed; an unknown entry is a caller mistake
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
            options: HashMap::from([
                ("total_steps", f64::from(req.total_steps)),
                ("speed", f64::from(req.speed)),
            ]),
            ..Default::default()
        };

        let (rendered, sample_rate) = self.cell.with(
            Self::MODEL_NAME,
            EngineId::Supertonic,
            Some(&snapshot),
            &self.loader,
            |backend| synthesize_chunks(backend, &spec, &chunks),
        )?;

        let merged = stitch::merge_with_silence(&rendered, sample_rate, req.silence_ms)?;
        let merged = adjust_speed(merged, req.speed);
        let chunk_count = rendered.len();

        let artifact = self
            .outputs
            .write_wav("supertonic", &req.voice, &merged, sample_rate)?;

        Ok(GenerationOutput {
            file_name: artifact.file_name,
            audio_url: artifact.url,
            output_path: artifact.path,
            duration_secs: merged.len() as f64 / f64::from(sample_rate),
            sample_rate,
            chunks: chunk_count,
        })
    }

    pub fn voices(&self) -> Vec<&'static str> {
        VOICES.to_vec()
    }

    pub fn get_languages(&self) -> Vec<&'static str> {
        LANGUAGES.to_vec()
    }

    pub fn get_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "Supertonic-2",
            "engine": EngineId::Supertonic,
            "mode": "tts",
            "voices": VOICES,
            "languages": LANGUAGES,
            "default_voice": DEFAULT_VOICE,
            "loaded": self.cell.is_loaded(),
        })
    }

    pub fn unload(&self) {
        self.cell.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathService;
    use crate::engines::backend::testing::fake_loader;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, ready: bool) -> SupertonicAdapter {
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        if ready {
            let model = models.get(SupertonicAdapter::MODEL_NAME).unwrap();
            let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
            std::fs::create_dir_all(&snapshot).unwrap();
            std::fs::write(snapshot.join("model.onnx"), b"w").unwrap();
        }
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));
        SupertonicAdapter::new(models, outputs, fake_loader())
    }

    fn request() -> SupertonicRequest {
        SupertonicRequest {
            text: "One sentence. Another sentence.".to_string(),
            voice: "M2".to_string(),
            language: "en".to_string(),
            speed: 1.0,
            total_steps: 5,
            smart_chunking: true,
            max_chars_per_chunk: 20,
            silence_ms: 300,
        }
    }

    #[test]
    fn test_generate_inserts_silence_between_chunks() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);

        let out = adapter.generate(&request()).unwrap();
        assert!(out.audio_url.starts_with("/audio/supertonic-M2-"));
        assert!(out.chunks >= 2);
        // Duration includes the inter-chunk silence
        assert!(out.duration_secs > 0.3);
    }

    #[test]
    fn test_unknown_preset_voice_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let mut req = request();
        req.voice = "Z9".to_string();
        assert!(matches!(
            adapter.generate(&req),
            Err(ApiError::BadRequest(msg)) if msg.contains("Unknown voice")
        ));
    }

    #[test]
    fn test_missing_model_is_conflict() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, false);
        assert!(matches!(
            adapter.generate(&request()),
            Err(ApiError::Conflict(_))
        ));
    }
}
