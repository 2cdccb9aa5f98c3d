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
use crate::outputs::{self, OutputStore};
use crate::voices::{self, VoiceStore};

#[derive(Debug, Clone, Deserialize)]
pub struct IndexTts2Request {
    pub text: String,
    pub voice_name: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub crossfade_ms: u32,
    #[serde(default)]
    pub unload_after: bool,
}

fn default_speed() -> f32 {
    1.0
}
fn default_max_chars() -> usize {
    300
}

/// Adapter for the optional IndexTTS-2 voice-clone back-end
///
/// The runtime is pip-acquired rather than snapshot-downloaded, so there is
/// no readiness gate here; a missing runtime surfaces as 503 from the
/// loader.
pub struct IndexTts2Adapter {
    voices: Arc<VoiceStore>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl IndexTts2Adapter {
    pub fn new(voices: Arc<VoiceStore>, outputs: Arc<OutputStore>, loader: BackendLoader) -> Self {
        Self {
            voices,
            outputs,
            loader,
            cell: BackendCell::new(),
        }
    }

    pub fn generate(&self, req: &IndexTts2Request) -> Result<GenerationOutput> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        let voice_name = req.voice_name.trim();
        if voice_name.is_empty() {
            return Err(ApiError::BadRequest("voice_name is required".to_string()));
        }
        let voice = self.voices.get(voice_name)?;

        let scratch_path = self.outputs.dir().join(format!(
            "indextts2-ref-{}-{}.wav",
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
            ref_audio: Some(scratch.path().to_path_buf()),
            ref_text: Some(voice.transcript).filter(|t| !t.is_empty()),
            options: HashMap::from([("speed", f64::from(req.speed))]),
            ..Default::default()
        };

        let (rendered, sample_rate) = self.cell.with(
            "IndexTTS-2",
            EngineId::Indextts2,
            None,
            &self.loader,
            |backend| synthesize_chunks(backend, &spec, &chunks),
        )?;
        drop(scratch);

        let merged = stitch::merge_chunks(&rendered, sample_rate, req.crossfade_ms)?;
        let merged = adjust_speed(merged, req.speed);
        let chunk_count = rendered.len();

        let artifact = self
            .outputs
            .write_wav("indextts2", voice_name, &merged, sample_rate)?;

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

    pub fn get_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "IndexTTS-2",
            "engine": EngineId::Indextts2,
            "mode": "clone",
            "acquisition": "pip",
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
    use crate::engines::backend::unavailable_loader;
    use tempfile::TempDir;

    fn voices_fixture(temp: &TempDir) -> (Arc<VoiceStore>, Arc<OutputStore>) {
        let samples_dir = temp.path().join("samples");
        let user_dir = temp.path().join("user");
        std::fs::create_dir_all(&samples_dir).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();
        wav::write_pcm16(&samples_dir.join("Max.wav"), &vec![0.2f32; 12_000], 24_000).unwrap();
        let voices = Arc::new(VoiceStore::new(samples_dir, user_dir, vec![]));
        let paths = Arc::new(PathService::for_tests(temp.path()));
        std::fs::create_dir_all(paths.outputs_dir()).unwrap();
        (voices, Arc::new(OutputStore::new(paths)))
    }

    fn request() -> IndexTts2Request {
        IndexTts2Request {
            text: "hello".to_string(),
            voice_name: "Max".to_string(),
            speed: 1.0,
            max_chars: 300,
            crossfade_ms: 0,
            unload_after: false,
        }
    }

    #[test]
    fn test_generate_with_fake_runtime() {
        let temp = TempDir::new().unwrap();
        let (voices, outputs) = voices_fixture(&temp);
        let adapter = IndexTts2Adapter::new(voices, outputs, fake_loader());

        let out = adapter.generate(&request()).unwrap();
        assert!(out.audio_url.starts_with("/audio/indextts2-Max-"));
    }

    #[test]
    fn test_missing_runtime_is_503_with_hint() {
        let temp = TempDir::new().unwrap();
        let (voices, outputs) = voices_fixture(&temp);
        let adapter = IndexTts2Adapter::new(voices, outputs, unavailable_loader());

        let err = adapter.generate(&request()).unwrap_err();
        assert!(matches!(
            err,
            ApiError::ServiceUnavailable(msg) if msg.contains("indextts2")
        ));
    }

    #[test]
    fn test_unknown_voice_is_not_found() {
        let temp = TempDir::new().unwrap();
        let (voices, outputs) = voices_fixture(&temp);
        let adapter = IndexTts2Adapter::new(voices, outputs, fake_loader());

        let mut req = request();
        req.voice_name = "Ghost".to_string();
        assert!(matches!(
            adapter.generate(&req),
            Err(ApiError::NotFound(_))
        ));
    }
}
