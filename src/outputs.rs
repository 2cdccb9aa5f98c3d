use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::wav;
use crate::config::PathService;
use crate::error::{ApiError, Result};

lazy_static! {
    /// Grammar for engine artifacts: `<engine>-<label>-<8hex>.<ext>`
    static ref ARTIFACT_RE: Regex = Regex::new(
        r"^(kokoro|qwen3|chatterbox|supertonic|cosyvoice3|indextts2)-[A-Za-z0-9_-]+-[0-9a-f]{8}\.(wav|mp3|m4b)$"
    )
    .unwrap();
    /// Audiobook artifacts carry the job id instead of a label
    static ref AUDIOBOOK_RE: Regex =
        Regex::new(r"^audiobook-[0-9a-f]{12}\.(wav|mp3|m4b)$").unwrap();
}

/// Sanitize a free-form label for use inside an artifact filename
///
/// Keeps `[A-Za-z0-9_-]`, folds separators to `-`, caps at 32 chars.
pub fn safe_tag(value: &str, fallback: &str) -> String {
    let cleaned: String = value
        .replace(['/', ' '], "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let trimmed = cleaned.trim_matches(['-', '_']).to_string();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.chars().take(32).collect()
    }
}

/// Fresh 8-hex discriminator for artifact names
pub fn short_hex() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Build an artifact filename for an engine output
pub fn artifact_name(engine: &str, label: &str, ext: &str) -> String {
    format!("{}-{}-{}.{}", engine, safe_tag(label, "out"), short_hex(), ext)
}

/// Validate a filename against the deletable-artifact grammar
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if ARTIFACT_RE.is_match(name) || AUDIOBOOK_RE.is_match(name) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Filename '{}' is not a deletable generated artifact",
            name
        )))
    }
}

/// A file written into the outputs directory
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

/// Metadata row for the artifact listing endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub file_name: String,
    pub url: String,
    /// Absolute location, surfaced so clients can reveal the file on disk
    pub file_path: PathBuf,
    pub engine: Option<String>,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Writable directory of generated artifacts
///
/// The effective directory lives in the `PathService` and can be swapped at
/// runtime; every operation resolves it fresh.
pub struct OutputStore {
    paths: Arc<PathService>,
}

impl OutputStore {
    pub fn new(paths: Arc<PathService>) -> Self {
        Self { paths }
    }

    pub fn dir(&self) -> PathBuf {
        self.paths.outputs_dir()
    }

    /// Persist a waveform as `<engine>-<label>-<8hex>.wav`
    pub fn write_wav(
        &self,
        engine: &str,
        label: &str,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Artifact> {
        let dir = self.dir();
        fs::create_dir_all(&dir)?;
        let file_name = artifact_name(engine, label, "wav");
        let path = dir.join(&file_name);
        wav::write_pcm16(&path, samples, sample_rate)?;
        Ok(Artifact {
            url: format!("/audio/{}", file_name),
            file_name,
            path,
        })
    }

    /// Enumerate artifacts, newest first, with size/duration metadata
    ///
    /// Duration is decoded on demand and only for WAV files; encoded formats
    /// report size only.
    pub fn list(&self, engine_filter: Option<&str>) -> Vec<ArtifactInfo> {
        let dir = self.dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut items: Vec<ArtifactInfo> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let file_name = path.file_name()?.to_str()?.to_string();
                if !(ARTIFACT_RE.is_match(&file_name) || AUDIOBOOK_RE.is_match(&file_name)) {
                    return None;
                }
                let engine = file_name.split('-').next().map(String::from);
                if let Some(filter) = engine_filter {
                    if engine.as_deref() != Some(filter) {
                        return None;
                    }
                }
                let metadata = entry.metadata().ok()?;
                let duration_secs = if file_name.ends_with(".wav") {
                    fs::read(&path)
                        .ok()
                        .and_then(|bytes| wav::duration_ms(&bytes).ok())
                        .map(|ms| ms / 1000.0)
                } else {
                    None
                };
                Some(ArtifactInfo {
                    url: format!("/audio/{}", file_name),
                    file_name,
                    file_path: path,
                    engine,
                    size_bytes: metadata.len(),
                    duration_secs,
                    modified_at: metadata.modified().ok().map(DateTime::from),
                })
            })
            .collect();

        items.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        items
    }

    /// Delete an artifact by filename after grammar validation
    pub fn delete(&self, file_name: &str) -> Result<()> {
        validate_artifact_name(file_name)?;
        let path = self.dir().join(file_name);
        if !path.is_file() {
            return Err(ApiError::NotFound(format!(
                "Audio file not found: {}",
                file_name
            )));
        }
        fs::remove_file(&path)?;
        tracing::info!(file = %file_name, "Artifact deleted");
        Ok(())
    }

    /// Resolve an `/audio/<file>` URL into a file inside the outputs dir
    pub fn resolve_audio_url(&self, audio_url: &str) -> Result<PathBuf> {
        let path_part = audio_url
            .split_once("://")
            .map(|(_, rest)| {
                rest.find('/')
                    .map(|idx| &rest[idx..])
                    .unwrap_or("")
            })
            .unwrap_or(audio_url);
        let Some(file_name) = path_part.strip_prefix("/audio/") else {
            return Err(ApiError::BadRequest(
                "audio_url must point to /audio/<filename>".to_string(),
            ));
        };
        // Strip any nested path components; artifacts are flat
        let file_name = file_name.rsplit('/').next().unwrap_or(file_name);
        let candidate = self.dir().join(file_name);
        if !candidate.is_file() {
            return Err(ApiError::NotFound(format!(
                "Audio file not found: {}",
                file_name
            )));
        }
        Ok(candidate)
    }
}
