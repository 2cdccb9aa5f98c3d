use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{
    adjust_speed, validate_speed, validate_text, BackendCell, BackendLoader, EngineId,
    GenerationOutput, SynthesisSpec,
};
use crate::audio::{stitch, wav};
use crate::config::constants::NORMALIZED_SAMPLE_RATE;
use crate::error::{ApiError, Result};
use crate::models::registry::QWEN_SPEAKERS;
use crate::models::ModelRegistry;
use crate::outputs::{self, OutputStore};
use crate::voices::{self, VoiceStore};

/// Supported languages (display name, model language code)
pub const LANGUAGES: &[(&str, &str)] = &[
    ("Auto", "auto"),
    ("Chinese", "chinese"),
    ("English", "english"),
    ("Japanese", "japanese"),
    ("Korean", "korean"),
    ("German", "german"),
    ("French", "french"),
    ("Russian", "russian"),
    ("Portuguese", "portuguese"),
    ("Spanish", "spanish"),
    ("Italian", "italian"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qwen3Mode {
    Clone,
    Custom,
}

impl Qwen3Mode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "clone" => Ok(Qwen3Mode::Clone),
            "custom" => Ok(Qwen3Mode::Custom),
            other => Err(ApiError::BadRequest(format!(
                "Unknown mode '{}': expected 'clone' or 'custom'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Qwen3Mode::Clone => "clone",
            Qwen3Mode::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qwen3Request {
    pub text: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Stored voice sample name (clone mode)
    pub voice_name: Option<String>,
    /// Preset speaker (custom mode)
    pub speaker: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_model_size")]
    pub model_size: String,
    #[serde(default = "default_quantization")]
    pub model_quantization: String,
    /// Style instruction (custom mode)
    pub instruct: Option<String>,
    #[serde(default = "default_streaming_interval")]
    pub streaming_interval: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default)]
    pub unload_after: bool,
    /// Queue the generation and return a job id immediately
    #[serde(default)]
    pub enqueue: bool,
}

fn default_mode() -> String {
    "clone".to_string()
}
fn default_language() -> String {
    "Auto".to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_model_size() -> String {
    "0.6B".to_string()
}
fn default_quantization() -> String {
    "bf16".to_string()
}
fn default_streaming_interval() -> f32 {
    0.75
}
fn default_temperature() -> f32 {
    0.9
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    50
}
fn default_repetition_penalty() -> f32 {
    1.0
}
fn default_seed() -> i64 {
    -1
}

/// Scratch reference audio removed when the guard drops
///
/// Covers every exit path: success, synthesis error, client disconnect.
pub struct ScratchRef {
    path: PathBuf,
}

impl ScratchRef {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for ScratchRef {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "Scratch reference cleanup failed");
        }
    }
}

/// Fully-resolved synthesis plan shared by the sync and streaming paths
pub struct Qwen3Plan {
    pub spec: SynthesisSpec,
    pub mode: Qwen3Mode,
    pub model_name: &'static str,
    pub snapshot: PathBuf,
    pub speed: f32,
    pub unload_after: bool,
    _scratch: Option<ScratchRef>,
}

/// Adapter for the Qwen3-TTS back-end (voice clone + preset speakers)
pub struct Qwen3Adapter {
    models: Arc<ModelRegistry>,
    voices: Arc<VoiceStore>,
    outputs: Arc<OutputStore>,
    loader: BackendLoader,
    cell: BackendCell,
}

impl Qwen3Adapter {
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

    /// Registry model name for a (mode, size, quantization) combination
    pub fn model_name(mode: Qwen3Mode, size: &str, quantization: &str) -> Result<&'static str> {
        let name = match (mode, size, quantization) {
            (Qwen3Mode::Clone, "0.6B", "bf16") => "Qwen3-TTS-12Hz-0.6B-Base",
            (Qwen3Mode::Clone, "1.7B", "bf16") => "Qwen3-TTS-12Hz-1.7B-Base",
            (Qwen3Mode::Custom, "0.6B", "bf16") => "Qwen3-TTS-12Hz-0.6B-CustomVoice",
            (Qwen3Mode::Custom, "1.7B", "bf16") => "Qwen3-TTS-12Hz-1.7B-CustomVoice",
            (Qwen3Mode::Clone, "0.6B", "8bit") => "Qwen3-TTS-12Hz-0.6B-Base-8bit",
            (Qwen3Mode::Clone, "1.7B", "8bit") => "Qwen3-TTS-12Hz-1.7B-Base-8bit",
            (Qwen3Mode::Custom, "0.6B", "8bit") => "Qwen3-TTS-12Hz-0.6B-CustomVoice-8bit",
            (Qwen3Mode::Custom, "1.7B", "8bit") => "Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit",
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "Unsupported Qwen3 config: mode={}, model_size={}, quantization={}",
                    mode.as_str(),
                    size,
                    quantization
                )))
            }
        };
        Ok(name)
    }

    fn normalize_language(language: &str) -> String {
        for (display, code) in LANGUAGES {
            if display.eq_ignore_ascii_case(language) {
                return (*code).to_string();
            }
        }
        let lowered = language.trim().to_lowercase().replace('_', " ");
        if lowered.is_empty() || lowered.contains("auto") {
            return "auto".to_string();
        }
        lowered.replace(' ', "")
    }

    /// Validate a request and resolve everything needed to synthesize
    ///
    /// The clone path normalizes the stored voice into a scratch reference
    /// WAV whose lifetime is tied to the returned plan.
    pub fn prepare(&self, req: &Qwen3Request) -> Result<Qwen3Plan> {
        validate_text(&req.text)?;
        validate_speed(req.speed)?;
        let mode = Qwen3Mode::parse(&req.mode)?;
        let model_name = Self::model_name(mode, &req.model_size, &req.model_quantization)?;

        let mut spec = SynthesisSpec {
            text: req.text.clone(),
            language: Some(Self::normalize_language(&req.language)),
            instruct: req.instruct.clone(),
            options: HashMap::from([
                ("temperature", f64::from(req.temperature)),
                ("top_p", f64::from(req.top_p)),
                ("top_k", f64::from(req.top_k)),
                ("repetition_penalty", f64::from(req.repetition_penalty)),
                ("seed", req.seed as f64),
                ("speed", f64::from(req.speed)),
                ("streaming_interval", f64::from(req.streaming_interval)),
            ]),
            ..Default::default()
        };

        let mut scratch = None;
        match mode {
            Qwen3Mode::Clone => {
                let voice_name = req
                    .voice_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest(
                            "voice_name is required for clone mode".to_string(),
                        )
                    })?;
                let voice = self.voices.get(voice_name)?;

                let scratch_path = self.outputs.dir().join(format!(
                    "qwen3-ref-{}-{}.wav",
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

                spec.ref_text = Some(voice.transcript).filter(|t| !t.is_empty());
                spec.ref_audio = Some(scratch_path.clone());
                scratch = Some(ScratchRef { path: scratch_path });
            }
            Qwen3Mode::Custom => {
                let speaker = req
                    .speaker
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest("speaker is required for custom mode".to_string())
                    })?;
                if !QWEN_SPEAKERS.contains(&speaker) {
                    return Err(ApiError::BadRequest(format!(
                        "Unknown speaker: {}. Available: {}",
                        speaker,
                        QWEN_SPEAKERS.join(", ")
                    )));
                }
                spec.speaker = Some(speaker.to_string());
            }
        }

        let snapshot = self.models.ensure_ready(model_name)?;

        Ok(Qwen3Plan {
            spec,
            mode,
            model_name,
            snapshot,
            speed: req.speed,
            unload_after: req.unload_after,
            _scratch: scratch,
        })
    }

    /// Synchronous generation; blocks until the artifact is on disk
    pub fn generate(&self, req: &Qwen3Request) -> Result<GenerationOutput> {
        let plan = self.prepare(req)?;

        let audio = self.cell.with(
            plan.model_name,
            EngineId::Qwen3,
            Some(&plan.snapshot),
            &self.loader,
            |backend| backend.synthesize(&plan.spec),
        )?;
        if audio.is_empty() {
            return Err(ApiError::Internal("No audio generated".to_string()));
        }

        let samples = adjust_speed(audio.samples, plan.speed);
        let artifact =
            self.outputs
                .write_wav("qwen3", plan.mode.as_str(), &samples, audio.sample_rate)?;

        if plan.unload_after {
            self.unload();
        }

        Ok(GenerationOutput {
            file_name: artifact.file_name,
            audio_url: artifact.url,
            output_path: artifact.path,
            duration_secs: samples.len() as f64 / f64::from(audio.sample_rate),
            sample_rate: audio.sample_rate,
            chunks: 1,
        })
    }

    /// Stream PCM frames into `sink`; a `false` return from the sink means
    /// the client went away and production stops quietly
    ///
    /// Frames are mono s16le at 24 kHz; off-rate backend chunks are
    /// resampled, and `speed != 1.0` rescales each chunk to `len / speed`.
    pub fn run_stream(
        &self,
        plan: &Qwen3Plan,
        sink: &mut dyn FnMut(Vec<u8>) -> bool,
    ) -> Result<()> {
        let result = self.cell.with(
            plan.model_name,
            EngineId::Qwen3,
            Some(&plan.snapshot),
            &self.loader,
            |backend| {
                let mut yielded = false;
                for item in backend.stream(&plan.spec)? {
                    let audio = item?;
                    if audio.is_empty() {
                        continue;
                    }
                    yielded = true;

                    let mut samples = audio.samples;
                    if audio.sample_rate != NORMALIZED_SAMPLE_RATE {
                        samples =
                            stitch::resample(&samples, audio.sample_rate, NORMALIZED_SAMPLE_RATE);
                    }
                    if (plan.speed - 1.0).abs() > f32::EPSILON {
                        samples = adjust_speed(samples, plan.speed);
                    }

                    if !sink(wav::pcm16le_bytes(&samples)) {
                        tracing::debug!("Stream receiver dropped, stopping producer");
                        return Ok(());
                    }
                }
                if !yielded {
                    return Err(ApiError::Internal("No audio generated".to_string()));
                }
                Ok(())
            },
        );

        if plan.unload_after {
            self.unload();
        }
        result
    }

    /// Store a new voice sample in the shared pool
    pub fn save_voice(
        &self,
        name: &str,
        audio_bytes: &[u8],
        transcript: Option<&str>,
    ) -> Result<crate::voices::VoiceInfo> {
        let (info, duration) = self.voices.save_upload(name, audio_bytes, transcript)?;
        tracing::info!(voice = %name, duration_secs = duration, "Voice sample saved");
        Ok(info)
    }

    pub fn list_voices(&self) -> Vec<crate::voices::VoiceInfo> {
        self.voices.list()
    }

    pub fn get_languages(&self) -> Vec<&'static str> {
        LANGUAGES.iter().map(|(display, _)| *display).collect()
    }

    pub fn get_speakers(&self) -> Vec<&'static str> {
        QWEN_SPEAKERS.to_vec()
    }

    pub fn get_info(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "Qwen3-TTS",
            "engine": EngineId::Qwen3,
            "modes": ["clone", "custom"],
            "model_sizes": ["0.6B", "1.7B"],
            "quantizations": ["bf16", "8bit"],
            "languages": self.get_languages(),
            "speakers": self.get_speakers(),
            "features": ["voice_cloning", "custom_voice", "streaming", "advanced_params"],
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

    struct Fixture {
        adapter: Qwen3Adapter,
        _temp: TempDir,
    }

    fn fixture(ready_models: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let models = Arc::new(ModelRegistry::with_dir(temp.path().join("hub")));
        for name in ready_models {
            let model = models.get(name).unwrap();
            let snapshot = models.cache_dir(&model).join("snapshots").join("rev");
            std::fs::create_dir_all(&snapshot).unwrap();
            std::fs::write(snapshot.join("model.safetensors"), b"w").unwrap();
        }

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

        Fixture {
            adapter: Qwen3Adapter::new(models, voices, outputs, fake_loader()),
            _temp: temp,
        }
    }

    fn clone_request(voice: &str) -> Qwen3Request {
        Qwen3Request {
            text: "hello world".to_string(),
            mode: "clone".to_string(),
            voice_name: Some(voice.to_string()),
            speaker: None,
            language: "Auto".to_string(),
            speed: 1.0,
            model_size: "0.6B".to_string(),
            model_quantization: "bf16".to_string(),
            instruct: None,
            streaming_interval: 0.75,
            temperature: 0.9,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.0,
            seed: -1,
            unload_after: false,
            enqueue: false,
        }
    }

    #[test]
    fn test_model_name_matrix() {
        assert_eq!(
            Qwen3Adapter::model_name(Qwen3Mode::Clone, "0.6B", "bf16").unwrap(),
            "Qwen3-TTS-12Hz-0.6B-Base"
        );
        assert_eq!(
            Qwen3Adapter::model_name(Qwen3Mode::Custom, "1.7B", "8bit").unwrap(),
            "Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit"
        );
        assert!(Qwen3Adapter::model_name(Qwen3Mode::Clone, "13B", "bf16").is_err());
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(Qwen3Adapter::normalize_language("Auto"), "auto");
        assert_eq!(Qwen3Adapter::normalize_language("English"), "english");
        assert_eq!(Qwen3Adapter::normalize_language("auto detect"), "auto");
        assert_eq!(Qwen3Adapter::normalize_language("Hindi"), "hindi");
    }

    #[test]
    fn test_clone_generate_writes_artifact() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-Base"]);
        let out = fx.adapter.generate(&clone_request("Natasha")).unwrap();
        assert!(out.output_path.exists());
        assert!(out.audio_url.starts_with("/audio/qwen3-clone-"));
    }

    #[test]
    fn test_clone_scratch_reference_is_cleaned_up() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-Base"]);
        fx.adapter.generate(&clone_request("Natasha")).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(fx.adapter.outputs.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("qwen3-ref-"))
            .collect();
        assert!(leftovers.is_empty(), "scratch refs left behind");
    }

    #[test]
    fn test_unknown_voice_is_not_found() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-Base"]);
        let err = fx.adapter.generate(&clone_request("Nobody")).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_model_not_downloaded_is_conflict_before_work() {
        let fx = fixture(&[]);
        let err = fx.adapter.generate(&clone_request("Natasha")).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(msg) if msg.contains("models--")));
    }

    #[test]
    fn test_custom_mode_requires_known_speaker() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-CustomVoice"]);
        let mut req = clone_request("Natasha");
        req.mode = "custom".to_string();
        req.voice_name = None;

        req.speaker = None;
        assert!(matches!(
            fx.adapter.generate(&req),
            Err(ApiError::BadRequest(_))
        ));

        req.speaker = Some("Stranger".to_string());
        assert!(matches!(
            fx.adapter.generate(&req),
            Err(ApiError::BadRequest(msg)) if msg.contains("Unknown speaker")
        ));

        req.speaker = Some("Ryan".to_string());
        let out = fx.adapter.generate(&req).unwrap();
        assert!(out.audio_url.starts_with("/audio/qwen3-custom-"));
    }

    #[test]
    fn test_unknown_mode_is_bad_request() {
        let fx = fixture(&[]);
        let mut req = clone_request("Natasha");
        req.mode = "design".to_string();
        assert!(matches!(
            fx.adapter.generate(&req),
            Err(ApiError::BadRequest(msg)) if msg.contains("Unknown mode")
        ));
    }

    #[test]
    fn test_stream_produces_pcm_frames() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-Base"]);
        let plan = fx.adapter.prepare(&clone_request("Natasha")).unwrap();

        let mut frames: Vec<Vec<u8>> = Vec::new();
        fx.adapter
            .run_stream(&plan, &mut |frame| {
                frames.push(frame);
                true
            })
            .unwrap();

        assert!(!frames.is_empty());
        for frame in &frames {
            assert!(frame.len() % 2 == 0, "PCM frames are whole s16 samples");
        }
    }

    #[test]
    fn test_stream_stops_when_sink_closes() {
        let fx = fixture(&["Qwen3-TTS-12Hz-0.6B-Base"]);
        let plan = fx.adapter.prepare(&clone_request("Natasha")).unwrap();

        let mut sent = 0usize;
        fx.adapter
            .run_stream(&plan, &mut |_frame| {
                sent += 1;
                false
            })
            .unwrap();
        assert_eq!(sent, 1);
    }
}
