use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::qwen3::ScratchRef;
use super::{
    adjust_speed, synthesize_chunks, validate_speed, validate_text, BackendCell, BackendLoader,
    EngineId, GenerationOutput, SynthesisSpec,
};
use crate::audio::{chunking, stitch};
use crate::error::{ApiError, Result};
use crate::models::ModelRegistry;
use crate::outputs::{self, OutputStore};
use crate::voices::{self, VoiceStore};

pub const LANGUAGES: &[&str] = &[
    "ar", "da", "de", "el", "en", "es", "fi", "fr", "he", "hi", "it", "ja", "ko", "ms", "nl",
    "no", "pl", "pt", "ru", "sv", "sw", "tr", "zh",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ChatterboxRequest {
    pub text: String,
    pub voice_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cfg_weight")]
    pub cfg_weight: f32,
    #[serde(default = "default_exaggeration")]
    pub exaggeration: f32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub crossfade_ms: u32,
    #[serde(default)]
    pub unload_after: bool,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_temperature() -> f32 {
    0.8
}
fn default_cfg_weight() -> f32 {
    1.0
}
fn default_exaggeration() -> f32 {
    0.5
}
fn default_seed() -> i64 {
    -1
}
fn default_max_chars() -> usize {
    300
}

/// Adapter for the Chatterbox multilingual voice-clone back-end
pub struct ChatterboxAdapter {
    models: Arc<ModelRegistry>,
    voices: Arc<VoiceStore>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl ChatterboxAdapter {
    pub const MODEL_NAME: &'static str = "Chatterbox Multilingual";

    pub fn new(
        models: Arc<ModelRegistry>,
        voices: Arc<VoiceStore>,
        outputs: Arc<OutputStore>,
        loader: BackendLoader,
    ) -> Self {
        Self {
            models,
            voices,
            outputs,
            loader,
            cell: BackendCell::new(),
        }
    }

    pub fn generate(&self, req: &ChatterboxRequest) -> Result<GenerationOutput> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        if !LANGUAGES.contains(&req.language.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Unsupported language '{}'",
                req.language
            )));
        }

        let voice_name = req.voice_name.trim();
        if voice_name.is_empty() {
            return Err(ApiError::BadRequest("voice_name is required".to_string()));
        }
        let voice = self.voices.get(voice_name)?;

        let snapshot = self.models.ensure_ready(Self::MODEL_NAME)?;

        let scratch_path = self.outputs.dir().join(format!(
            "chatterbox-ref-{}-{}.wav",
            outputs::safe_tag(voice_name, "voice"),
            outputs::short_hex()
        ));
        std::fs::create_dir_all(self.outputs.dir())?;
        voices::normalize_reference(&voice.audio_path, &scratch_path).map_err(|_| {
            ApiError::BadRequest(format!(
                "Voice sample '{}' cannot be decoded. Please re-upload this voice as a WAV file.",
                voice_name
            ))
        })?;
        let scratch = ScratchRef::new(scratch_path);

        let chunks = chunking::chunk_text(&req.text, req.max_chars, true);
        let spec = SynthesisSpec {
            language: Some(req.language.clone()),
            ref_audio: Some(scratch.path().to_path_buf()),
            ref_text: Some(voice.transcript).filter(|t| !t.is_empty()),
            options: HashMap::from([
                ("temperature", f64::from(req.temperature)),
                ("cfg_weight", f64::from(req.cfg_weight)),
                ("exaggeration", f64::from(req.exaggeration)),
                ("seed", req.seed as f64),
                ("speed", f64::from(req.speed)),
            ]),
            ..Default::default()
        };

        let (rendered, sample_rate) = self.cell.with(
            Self::MODEL_NAME,
            EngineId::Chatterbox,
            Some(&snapshot),
            &self.loader,
            |backend| synthesize_chunks(backend, &spec, &chunks),
        )?;
        drop(scratch);

        let merged = stitch::merge_chunks(&rendered, sample_rate, req.crossfade_ms)?;
        let merged = adjust_speed(merged, req.speed);
        let chunk_count = rendered.len();

        let artifact = self
            .outputs
            .write_wav("chatterbox", voice_name, &merged, sample_rate)?;

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

    pub fn list_voices(&self) -> Vec<crate::voices::VoiceInfo> {
        self.voices.list()
    }

    pub fn get_languages(&self) -> Vec<&'static str> {
        LANGUAGES.to_vec()
    }

    pub fn get_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "Chatterbox Multilingual",
            "engine": EngineId::Chatterbox,
            "mode": "clone",
            "languages": LANGUAGES,
            "features": ["voice_cloning", "exaggeration", "cfg_weight"],
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
    use crate::audio::wav;
    use crate::config::PathService;
    use crate::engines::backend::testing::fake_loader;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, ready: bool) -> ChatterboxAdapter {
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        if ready {
            let model = models.get(ChatterboxAdapter::MODEL_NAME).unwrap();
            let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
            std::fs::create_dir_all(&snapshot).unwrap();
            std::fs::write(snapshot.join("model.safetensors"), b"w").unwrap();
        }
        let samples_dir = temp.path().join("samples");
        let user_dir = temp.path().join("user");
        std::fs::create_dir_all(&samples_dir).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();
        wav::write_pcm16(&samples_dir.join("Max.wav"), &vec![0.2f32; 12_000], 24_000).unwrap();
        let voices = Arc::new(VoiceStore::new(samples_dir, user_dir, vec![]));
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        let outputs = Arc::new(OutputStore::new(paths));
        ChatterboxAdapter::new(models, voices, outputs, fake_loader())
    }

    fn request() -> ChatterboxRequest {
        ChatterboxRequest {
            text: "hello there".to_string(),
            voice_name: "Max".to_string(),
            language: "en".to_string(),
            speed: 1.0,
            temperature: 0.8,
            cfg_weight: 1.0,
            exaggeration: 0.5,
            seed: -1,
            max_chars: 300,
            crossfade_ms: 0,
            unload_after: false,
        }
    }

    #[test]
    fn test_generate_clone_artifact() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let out = adapter.generate(&request()).unwrap();
        assert!(out.audio_url.starts_with("/audio/chatterbox-Max-"));
        assert!(out.output_path.exists());
    }

    #[test]
    fn test_unknown_voice_is_not_found() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let mut req = request();
        req.voice_name = "Ghost".to_string();
        assert!(matches!(
            adapter.generate(&req),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_unsupported_language_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, true);
        let mut req = request();
        req.language = "xx".to_string();
        assert!(matches!(
            adapter.generate(&req),
            Err(ApiError::BadRequest(_))
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
