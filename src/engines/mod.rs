pub mod backend;
pub mod chatterbox;
pub mod cosyvoice3;
pub mod indextts2;
pub mod kokoro;
pub mod qwen3;
pub mod supertonic;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::stitch;
use crate::error::{ApiError, Result};

pub use backend::{BackendLoader, SpeechBackend, SynthesisSpec};

/// Back-end tag for every synthesis engine the service orchestrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Kokoro,
    Qwen3,
    Chatterbox,
    Supertonic,
    Cosyvoice3,
    Indextts2,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Kokoro => "kokoro",
            EngineId::Qwen3 => "qwen3",
            EngineId::Chatterbox => "chatterbox",
            EngineId::Supertonic => "supertonic",
            EngineId::Cosyvoice3 => "cosyvoice3",
            EngineId::Indextts2 => "indextts2",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "kokoro" => Some(EngineId::Kokoro),
            "qwen3" => Some(EngineId::Qwen3),
            "chatterbox" => Some(EngineId::Chatterbox),
            "supertonic" => Some(EngineId::Supertonic),
            "cosyvoice3" => Some(EngineId::Cosyvoice3),
            "indextts2" => Some(EngineId::Indextts2),
            _ => None,
        }
    }

    pub fn all() -> &'static [EngineId] {
        &[
            EngineId::Kokoro,
            EngineId::Qwen3,
            EngineId::Chatterbox,
            EngineId::Supertonic,
            EngineId::Cosyvoice3,
            EngineId::Indextts2,
        ]
    }

    /// Engines that condition on a stored voice sample
    pub fn is_clone_engine(&self) -> bool {
        matches!(
            self,
            EngineId::Qwen3 | EngineId::Chatterbox | EngineId::Indextts2
        )
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed generation
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub file_name: String,
    pub audio_url: String,
    pub output_path: PathBuf,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub chunks: usize,
}

struct LoadedBackend {
    key: String,
    backend: Box<dyn SpeechBackend>,
}

/// Lazily-initialized backend instance behind the adapter's serialization lock
///
/// Holding the lock across inference is deliberate: concurrent calls into
/// one adapter serialize, while different adapters run in parallel. The key
/// identifies the loaded variant; requesting a different variant reloads.
pub struct BackendCell {
    slot: std::sync::Mutex<Option<LoadedBackend>>,
}

impl BackendCell {
    pub fn new() -> Self {
        Self {
            slot: std::sync::Mutex::new(None),
        }
    }

    /// Run `f` against the backend for `key`, loading or swapping it first
    pub fn with<R>(
        &self,
        key: &str,
        engine: EngineId,
        snapshot: Option<&std::path::Path>,
        loader: &BackendLoader,
        f: impl FnOnce(&dyn SpeechBackend) -> Result<R>,
    ) -> Result<R> {
        let mut slot = self.slot.lock().unwrap();
        let needs_load = slot.as_ref().map(|l| l.key != key).unwrap_or(true);
        if needs_load {
            let backend = loader.as_ref()(engine, snapshot)?;
            *slot = Some(LoadedBackend {
                key: key.to_string(),
                backend,
            });
            tracing::info!(engine = %engine, variant = %key, "Backend loaded");
        }
        f(slot.as_ref().unwrap().backend.as_ref())
    }

    /// Drop the loaded instance, releasing model memory
    pub fn unload(&self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.take().is_some() {
            tracing::info!("Backend unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl Default for BackendCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk text, synthesize every chunk, and align sample rates
///
/// Returns the per-chunk waveforms plus the common sample rate; chunks that
/// come back at a different rate are resampled to the first chunk's rate.
pub(crate) fn synthesize_chunks(
    backend: &dyn SpeechBackend,
    base_spec: &SynthesisSpec,
    chunks: &[String],
) -> Result<(Vec<Vec<f32>>, u32)> {
    let mut rendered: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    let mut sample_rate: Option<u32> = None;

    for chunk in chunks {
        let spec = base_spec.with_text(chunk);
        let audio = backend.synthesize(&spec)?;
        if audio.is_empty() {
            continue;
        }
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

/// Adjust playback speed by resampling to `len / speed` samples
///
/// Speed is clamped to [0.5, 2.0]; 1.0 is a no-op.
pub(crate) fn adjust_speed(samples: Vec<f32>, speed: f32) -> Vec<f32> {
    if (speed - 1.0).abs() < f32::EPSILON {
        return samples;
    }
    let speed = speed.clamp(0.5, 2.0);
    let new_len = (samples.len() as f64 / speed as f64).round() as usize;
    if new_len == samples.len() || new_len == 0 {
        return samples;
    }
    // Resampling to a shorter/longer buffer at the same nominal rate shifts
    // tempo while the playback rate stays fixed.
    let ratio_sr = (samples.len() as f64 / new_len as f64 * 24_000.0).round() as u32;
    stitch::resample(&samples, ratio_sr.max(1), 24_000)
}

/// Common request guards shared by every generate endpoint
pub(crate) fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text cannot be empty".to_string()));
    }
    if text.len() > crate::config::constants::MAX_TEXT_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Text too long: {} chars (max {})",
            text.len(),
            crate::config::constants::MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

pub(crate) fn validate_speed(speed: f32) -> Result<()> {
    if !(0.25..=3.0).contains(&speed) {
        return Err(ApiError::BadRequest(format!(
            "Invalid speed: {} (must be 0.25-3.0)",
            speed
        )));
    }
    Ok(())
}

/// Explicit registry of adapter singletons
///
/// Constructed once at startup; each adapter keeps its own internal lock,
/// so holding the registry in shared state is free of cross-engine
/// contention.
pub struct EngineRegistry {
    pub kokoro: Arc<kokoro::KokoroAdapter>,
    pub qwen3: Arc<qwen3::Qwen3Adapter>,
    pub chatterbox: Arc<chatterbox::ChatterboxAdapter>,
    pub supertonic: Arc<supertonic::SupertonicAdapter>,
    pub cosyvoice3: Arc<cosyvoice3::CosyVoice3Adapter>,
    pub indextts2: Arc<indextts2::IndexTts2Adapter>,
}

impl EngineRegistry {
    pub fn new(
        models: Arc<crate::models::ModelRegistry>,
        voices: Arc<crate::voices::VoiceStore>,
        outputs: Arc<crate::outputs::OutputStore>,
        loader: BackendLoader,
    ) -> Self {
        Self {
            kokoro: Arc::new(kokoro::KokoroAdapter::new(
                Arc::clone(&models),
                Arc::clone(&outputs),
                loader.clone(),
            )),
            qwen3: Arc::new(qwen3::Qwen3Adapter::new(
                Arc::clone(&models),
                Arc::clone(&voices),
                Arc::clone(&outputs),
                loader.clone(),
            )),
            chatterbox: Arc::new(chatterbox::ChatterboxAdapter::new(
                Arc::clone(&models),
                Arc::clone(&voices),
                Arc::clone(&outputs),
                loader.clone(),
            )),
            supertonic: Arc::new(supertonic::SupertonicAdapter::new(
                Arc::clone(&models),
                Arc::clone(&outputs),
                loader.clone(),
            )),
            cosyvoice3: Arc::new(cosyvoice3::CosyVoice3Adapter::new(
                Arc::clone(&models),
                Arc::clone(&outputs),
                loader.clone(),
            )),
            indextts2: Arc::new(indextts2::IndexTts2Adapter::new(
                Arc::clone(&voices),
                Arc::clone(&outputs),
                loader,
            )),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_id_round_trip() {
        for engine in EngineId::all() {
            assert_eq!(EngineId::parse(engine.as_str()), Some(*engine));
        }
        assert_eq!(EngineId::parse("mystery"), None);
    }

    #[test]
    fn test_clone_engines() {
        assert!(EngineId::Qwen3.is_clone_engine());
        assert!(EngineId::Chatterbox.is_clone_engine());
        assert!(EngineId::Indextts2.is_clone_engine());
        assert!(!EngineId::Kokoro.is_clone_engine());
        assert!(!EngineId::Supertonic.is_clone_engine());
    }

    #[test]
    fn test_adjust_speed_halves_length() {
        let samples = vec![0.5f32; 24_000];
        let out = adjust_speed(samples, 2.0);
        assert!((out.len() as i64 - 12_000).abs() <= 1);
    }

    #[test]
    fn test_adjust_speed_identity() {
        let samples = vec![0.5f32; 1000];
        assert_eq!(adjust_speed(samples.clone(), 1.0).len(), 1000);
    }

    #[test]
    fn test_adjust_speed_clamps_extremes() {
        let samples = vec![0.5f32; 10_000];
        // 10x requested, clamps to 2.0 => half length
        let out = adjust_speed(samples, 10.0);
        assert!((out.len() as i64 - 5_000).abs() <= 2);
    }

    #[test]
    fn test_validate_text_rejects_empty() {
        assert!(validate_text("  \n ").is_err());
        assert!(validate_text("hello").is_ok());
    }

    #[test]
    fn test_validate_speed_bounds() {
        assert!(validate_speed(1.0).is_ok());
        assert!(validate_speed(0.25).is_ok());
        assert!(validate_speed(3.0).is_ok());
        assert!(validate_speed(0.0).is_err());
        assert!(validate_speed(5.0).is_err());
    }
}
