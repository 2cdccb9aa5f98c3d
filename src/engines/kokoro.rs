use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    adjust_speed, synthesize_chunks, validate_speed, validate_text, BackendCell, BackendLoader,
    EngineId, GenerationOutput, SynthesisSpec,
};
use crate::audio::{chunking, stitch};
use crate::error::Result;
use crate::models::ModelRegistry;
use crate::outputs::OutputStore;

/// British voice pack shipped with the Kokoro model
pub const BRITISH_VOICES: &[(&str, &str, &str, &str)] = &[
    ("bf_emma", "Emma", "female", "B-"),
    ("bf_alice", "Alice", "female", "D"),
    ("bf_isabella", "Isabella", "female", "C"),
    ("bf_lily", "Lily", "female", "D"),
    ("bm_daniel", "Daniel", "male", "D"),
    ("bm_fable", "Fable", "male", "C"),
    ("bm_george", "George", "male", "C"),
    ("bm_lewis", "Lewis", "male", "D+"),
];

pub const DEFAULT_VOICE: &str = "bm_george";

#[derive(Debug, Clone, Deserialize)]
pub struct KokoroRequest {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_true")]
    pub smart_chunking: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_crossfade")]
    pub crossfade_ms: u32,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_max_chars() -> usize {
    1500
}
fn default_crossfade() -> u32 {
    40
}

#[derive(Debug, Serialize)]
pub struct KokoroVoiceInfo {
    pub id: String,
    pub name: String,
    pub gender: String,
    pub grade: String,
}

/// Adapter for the Kokoro British-English TTS back-end
pub struct KokoroAdapter {
    models: Arc<ModelRegistry>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl KokoroAdapter {
    pub const MODEL_NAME: &'static str = "Kokoro";

    pub fn new(models: Arc<ModelRegistry>, outputs: Arc<OutputStore>, loader: BackendLoader) -> Self {
        Self {
            models,
            outputs,
            loader,
            cell: BackendCell::new(),
        }
    }

    /// The voice table is advisory; unknown ids fall back to the default
    pub fn resolve_voice(voice: &str) -> &str {
        if BRITISH_VOICES.iter().any(|(id, ..)| *id == voice) {
            voice
        } else {
            DEFAULT_VOICE
        }
    }

    pub fn generate(&self, req: &KokoroRequest) -> Result<GenerationOutput> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        let voice = Self::resolve_voice(&req.voice).to_string();

        let snapshot = self.models.ensure_ready(Self::MODEL_NAME)?;
        let chunks = chunking::chunk_text(&req.text, req.max_chars_per_chunk, req.smart_chunking);
        if chunks.is_empty() {
            return Err(crate::error::ApiError::BadRequest(
                "Text cannot be empty".to_string(),
            ));
        }

        let spec = SynthesisSpec {
            voice: Some(voice.clone()),
            language: Some("b".to_string()),
            options: HashMap::from([("speed", f64::from(req.speed))]),
            ..Default::default()
        };

        let (rendered, sample_rate) = self.cell.with(
            Self::MODEL_NAME,
            EngineId::Kokoro,
            Some(&snapshot),
            &self.loader,
            |backend| synthesize_chunks(backend, &spec, &chunks),
        )?;

        let merged = stitch::merge_chunks(&rendered, sample_rate, req.crossfade_ms)?;
        let merged = adjust_speed(merged, req.speed);
        let chunk_count = rendered.len();

        let artifact = self.outputs.write_wav("kokoro", &voice, &merged, sample_rate)?;
        Ok(GenerationOutput {
            file_name: artifact.file_name,
            audio_url: artifact.url,
            output_path: artifact.path,
            duration_secs: merged.len() as f64 / f64::from(sample_rate),
            sample_rate,
            chunks: chunk_count,
        })
    }

    /// Fail fast when the Kokoro model has no usable snapshot
    pub fn ensure_ready(&self) -> Result<()> {
        self.models.ensure_ready(Self::MODEL_NAME).map(|_| ())
    }

    /// Render one already-chunked piece of text without touching the outputs dir
    ///
    /// The audiobook runner drives this chunk by chunk so it can report
    /// progress and honor cancellation between chunks.
    pub fn synthesize_chunk(
        &self,
        text: &str,
        voice: &str,
        speed: f32,
    ) -> Result<crate::audio::AudioBuffer> {
        let voice = Self::resolve_voice(voice).to_string();
        let snapshot = self.models.ensure_ready(Self::MODEL_NAME)?;
        let spec = SynthesisSpec {
            text: text.to_string(),
            voice: Some(voice),
            language: Some("b".to_string()),
            options: HashMap::from([("speed", f64::from(speed))]),
            ..Default::default()
        };
        self.cell.with(
            Self::MODEL_NAME,
            EngineId::Kokoro,
            Some(&snapshot),
            &self.loader,
            |backend| backend.synthesize(&spec),
        )
    }

    pub fn voices(&self) -> Vec<KokoroVoiceInfo> {
        BRITISH_VOICES
            .iter()
            .map(|(id, name, gender, grade)| KokoroVoiceInfo {
                id: (*id).to_string(),
                name: (*name).to_string(),
                gender: (*gender).to_string(),
                grade: (*grade).to_string(),
            })
            .collect()
    }

    pub fn get_info(&self) -> serde_json::Value {
        let downloaded = self
            .models
            .get(Self::MODEL_NAME)
            .map(|m| self.models.is_downloaded(&m))
            .unwrap_or(false);
        serde_json::json!({
            "name": "Kokoro",
            "engine": EngineId::Kokoro,
            "mode": "tts",
            "voice_pack": "British English",
            "default_voice": DEFAULT_VOICE,
            "downloaded": downloaded,
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
    use crate::error::ApiError;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, ready: bool) -> KokoroAdapter {
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        if ready {
            let kokoro = models.get("Kokoro").unwrap();
            let snapshot = models.cache_dir(&kokoro).join("snapshots").join("rev");
            std::fs::create_dir_all(&snapshot).unwrap();
            std::fs::write(snapshot.join("model.safetensors"), b"w").unwrap();
        }
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));
        KokoroAdapter::new(models, outputs, fake_loader())
    }

    fn request(text: &str) -> KokoroRequest {
        KokoroRequest {
            text: text.to_string(),
            voice: "bf_emma".to_string(),
            speed: 1.0,
            smart_chunking: true,
            max_chars_per_chunk: 1500,
            crossfade_ms: 40,
        }
    }

    #[test]
    fn test_generate_writes_named_artifact() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);

        let out = adapter.generate(&request("hello")).unwrap();
        assert!(out.output_path.exists());
        let re = regex::Regex::new(r"^/audio/kokoro-bf_emma-[0-9a-f]{8}\.wav$").unwrap();
        assert!(re.is_match(&out.audio_url), "url was {}", out.audio_url);
        assert!(out.duration_secs > 0.0);
    }

    #[test]
    fn test_model_not_ready_is_conflict() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, false);

        let err = adapter.generate(&request("hello")).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(msg) if msg.contains("models--")));
    }

    #[test]
    fn test_empty_text_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);

        let err = adapter.generate(&request("   ")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_unknown_voice_falls_back_to_default() {
        assert_eq!(KokoroAdapter::resolve_voice("bf_emma"), "bf_emma");
        assert_eq!(KokoroAdapter::resolve_voice("made_up"), DEFAULT_VOICE);
    }

    #[test]
    fn test_voice_table_has_eight_entries() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, false);
        assert_eq!(adapter.voices().len(), 8);
    }

    #[test]
    fn test_unload_drops_backend() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        adapter.generate(&request("hello")).unwrap();
        adapter.unload();
        let info = adapter.get_info();
        assert_eq!(info["loaded"], false);
    }
}
