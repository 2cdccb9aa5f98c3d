use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::EngineId;
use crate::audio::AudioBuffer;
use crate::error::{ApiError, Result};

/// Everything a synthesis back-end needs for one utterance
#[derive(Debug, Clone, Default)]
pub struct SynthesisSpec {
    pub text: String,
    /// Preset voice/style id (Kokoro voices, Supertonic/CosyVoice3 presets)
    pub voice: Option<String>,
    /// Preset speaker name (Qwen3 custom mode)
    pub speaker: Option<String>,
    pub language: Option<String>,
    /// Normalized reference audio for clone conditioning
    pub ref_audio: Option<PathBuf>,
    pub ref_text: Option<String>,
    /// Style instruction (Qwen3 custom mode)
    pub instruct: Option<String>,
    /// Numeric engine options (temperature, top_p, cfg_weight, steps, ...)
    pub options: HashMap<&'static str, f64>,
}

impl SynthesisSpec {
    pub fn with_text(&self, text: &str) -> Self {
        let mut spec = self.clone();
        spec.text = text.to_string();
        spec
    }

    pub fn option(&self, key: &str) -> Option<f64> {
        self.options.get(key).copied()
    }
}

/// Contract over one neural synthesis back-end
///
/// Implementations are blocking; callers run them on the blocking pool under
/// the adapter's serialization lock. The models themselves live outside this
/// crate and are plugged in through a [`BackendLoader`].
pub trait SpeechBackend: Send + Sync {
    /// Render the whole utterance as one waveform
    fn synthesize(&self, spec: &SynthesisSpec) -> Result<AudioBuffer>;

    /// Render the utterance as a finite, non-restartable chunk sequence
    ///
    /// The default falls back to a single-yield iterator over
    /// [`SpeechBackend::synthesize`].
    fn stream(
        &self,
        spec: &SynthesisSpec,
    ) -> Result<Box<dyn Iterator<Item = Result<AudioBuffer>> + Send>> {
        let audio = self.synthesize(spec)?;
        Ok(Box::new(std::iter::once(Ok(audio))))
    }
}

/// Factory mapping an engine (and its resolved snapshot) to a live back-end
pub type BackendLoader =
    Arc<dyn Fn(EngineId, Option<&Path>) -> Result<Box<dyn SpeechBackend>> + Send + Sync>;

/// Actionable message for a missing optional runtime
pub fn install_hint(engine: EngineId) -> String {
    let hint = match engine {
        EngineId::Kokoro | EngineId::Qwen3 | EngineId::Chatterbox => {
            "install the native synthesis runtime (pip install -U mlx-audio)"
        }
        EngineId::Supertonic | EngineId::Cosyvoice3 => {
            "install the ONNX synthesis runtime (pip install onnxruntime)"
        }
        EngineId::Indextts2 => "install the IndexTTS-2 runtime (pip install indextts2)",
    };
    format!(
        "{} back-end is unavailable in this build; {}",
        engine.as_str(),
        hint
    )
}

/// Loader used when no synthesis runtime is bundled
///
/// Every engine reports `service_unavailable` with its install hint, keeping
/// the orchestration surface fully operational for everything that does not
/// touch a model.
pub fn unavailable_loader() -> BackendLoader {
    Arc::new(
        |engine: EngineId, _snapshot: Option<&Path>| -> Result<Box<dyn SpeechBackend>> {
            Err(ApiError::ServiceUnavailable(install_hint(engine)))
        },
    )
}

/// Test support: deterministic fake back-ends for unit and integration tests
#[doc(hidden)]
pub mod testing {
    use super::*;

    /// Deterministic fake backend for tests: renders `samples_per_char`
    /// samples of a fixed tone per input character.
    pub struct FakeBackend {
        pub sample_rate: u32,
        pub samples_per_char: usize,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            Self {
                sample_rate: 24_000,
                samples_per_char: 120,
            }
        }
    }

    impl SpeechBackend for FakeBackend {
        fn synthesize(&self, spec: &SynthesisSpec) -> Result<AudioBuffer> {
            let len = spec.text.chars().count() * self.samples_per_char;
            let samples = (0..len)
                .map(|i| (i as f32 * 0.05).sin() * 0.3)
                .collect();
            Ok(AudioBuffer::new(samples, self.sample_rate))
        }

        fn stream(
            &self,
            spec: &SynthesisSpec,
        ) -> Result<Box<dyn Iterator<Item = Result<AudioBuffer>> + Send>> {
            let sample_rate = self.sample_rate;
            let per_char = self.samples_per_char;
            let words: Vec<String> = spec
                .text
                .split_whitespace()
                .map(|w| w.to_string())
                .collect();
            Ok(Box::new(words.into_iter().map(move |word| {
                let len = word.chars().count() * per_char;
                Ok(AudioBuffer::new(vec![0.1; len], sample_rate))
            })))
        }
    }

    /// Loader that hands every engine a [`FakeBackend`]
    pub fn fake_loader() -> BackendLoader {
        Arc::new(
            |_engine: EngineId, _snapshot: Option<&Path>| -> Result<Box<dyn SpeechBackend>> {
                Ok(Box::new(FakeBackend::default()))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_loader_is_503() {
        let loader = unavailable_loader();
        match loader(EngineId::Qwen3, None) {
            Err(ApiError::ServiceUnavailable(msg)) => {
                assert!(msg.contains("qwen3"));
                assert!(msg.contains("install"));
            }
            Err(other) => panic!("expected 503, got {:?}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_fake_stream_yields_finite_chunks() {
        let backend = testing::FakeBackend::default();
        let spec = SynthesisSpec {
            text: "hi there friend".to_string(),
            ..Default::default()
        };
        let backend: &dyn SpeechBackend = &backend;
        let count = backend.stream(&spec).unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_fake_backend_scales_with_text() {
        let backend = testing::FakeBackend::default();
        let short = backend
            .synthesize(&SynthesisSpec {
                text: "ab".to_string(),
                ..Default::default()
            })
            .unwrap();
        let long = backend
            .synthesize(&SynthesisSpec {
                text: "abcdefgh".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(long.samples.len() > short.samples.len());
    }
}
