use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::{stitch, wav};
use crate::config::constants::NORMALIZED_SAMPLE_RATE;
use crate::error::{ApiError, Result};

lazy_static! {
    static ref VOICE_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceSource {
    Default,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceInfo {
    pub name: String,
    pub source: VoiceSource,
    pub transcript: String,
    pub audio_path: PathBuf,
}

/// Unified pool of voice samples shared by every clone engine
///
/// Two directories: shipped defaults (immutable) and a single user pool.
/// Legacy per-engine folders are consolidated into the user pool at startup.
/// Every write path normalizes audio to mono 16-bit PCM at 24 kHz.
pub struct VoiceStore {
    samples_dir: PathBuf,
    user_dir: PathBuf,
    legacy_dirs: Vec<PathBuf>,
}

impl VoiceStore {
    pub fn new(samples_dir: PathBuf, user_dir: PathBuf, legacy_dirs: Vec<PathBuf>) -> Self {
        Self {
            samples_dir,
            user_dir,
            legacy_dirs,
        }
    }

    pub fn samples_dir(&self) -> &Path {
        &self.samples_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Reject names outside `[A-Za-z0-9_-]+`
    pub fn validate_name(name: &str) -> Result<()> {
        if VOICE_NAME_RE.is_match(name) {
            Ok(())
        } else {
            Err(ApiError::BadRequest(format!(
                "Invalid voice name '{}'. Use letters, digits, '-' and '_' only.",
                name
            )))
        }
    }

    /// Default voices are determined by location, not hardcoded names
    pub fn is_default(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let target = name.to_lowercase();
        wav_stems(&self.samples_dir)
            .iter()
            .any(|stem| stem.to_lowercase() == target)
    }

    fn reject_reserved(&self, name: &str) -> Result<()> {
        if self.is_default(name) {
            return Err(ApiError::BadRequest(format!(
                "Voice name '{}' is reserved by a default voice",
                name
            )));
        }
        Ok(())
    }

    /// Consolidate legacy per-engine folders into the unified user pool
    ///
    /// On a name collision the destination wins and the source file is
    /// removed; a failed move is logged and skipped, never fatal.
    pub fn migrate_legacy(&self) {
        if fs::create_dir_all(&self.user_dir).is_err() {
            return;
        }

        for legacy_dir in &self.legacy_dirs {
            if legacy_dir == &self.user_dir || !legacy_dir.exists() {
                continue;
            }
            for stem in wav_stems(legacy_dir) {
                for ext in ["wav", "txt"] {
                    let src = legacy_dir.join(format!("{}.{}", stem, ext));
                    if !src.exists() {
                        continue;
                    }
                    let dest = self.user_dir.join(format!("{}.{}", stem, ext));
                    let outcome = if dest.exists() {
                        fs::remove_file(&src)
                    } else {
                        fs::rename(&src, &dest)
                            .or_else(|_| fs::copy(&src, &dest).and_then(|_| fs::remove_file(&src)))
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(
                            source = %src.display(),
                            error = %e,
                            "Skipping voice migration (read-only or permission issue)"
                        );
                    }
                }
            }
        }
    }

    /// Merged listing across both pools; same-named user voices win
    pub fn list(&self) -> Vec<VoiceInfo> {
        let mut merged: std::collections::BTreeMap<String, VoiceInfo> =
            std::collections::BTreeMap::new();

        for (dir, source) in [
            (&self.samples_dir, VoiceSource::Default),
            (&self.user_dir, VoiceSource::User),
        ] {
            for stem in wav_stems(dir) {
                let wav_path = dir.join(format!("{}.wav", stem));
                merged.insert(
                    stem.to_lowercase(),
                    VoiceInfo {
                        transcript: read_transcript(dir, &stem),
                        name: stem,
                        source,
                        audio_path: wav_path,
                    },
                );
            }
        }

        merged.into_values().collect()
    }

    /// Find a voice's audio file by name, defaults first
    pub fn find_audio(&self, name: &str) -> Option<PathBuf> {
        for dir in [&self.samples_dir, &self.user_dir] {
            let candidate = dir.join(format!("{}.wav", name));
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// Look up a single voice; `not_found` when neither pool has it
    pub fn get(&self, name: &str) -> Result<VoiceInfo> {
        Self::validate_name(name)?;
        for (dir, source) in [
            (&self.user_dir, VoiceSource::User),
            (&self.samples_dir, VoiceSource::Default),
        ] {
            let wav_path = dir.join(format!("{}.wav", name));
            if wav_path.exists() {
                return Ok(VoiceInfo {
                    transcript: read_transcript(dir, name),
                    name: name.to_string(),
                    source,
                    audio_path: wav_path,
                });
            }
        }
        Err(ApiError::NotFound(format!("Voice '{}' not found", name)))
    }

    /// Store an uploaded voice, normalized to mono 24 kHz 16-bit PCM
    ///
    /// Returns the stored info plus the sample duration in seconds.
    pub fn save_upload(
        &self,
        name: &str,
        audio_bytes: &[u8],
        transcript: Option<&str>,
    ) -> Result<(VoiceInfo, f64)> {
        Self::validate_name(name)?;
        self.reject_reserved(name)?;
        fs::create_dir_all(&self.user_dir)?;

        let normalized = normalize_voice_audio(audio_bytes)?;
        let duration = normalized.len() as f64 / NORMALIZED_SAMPLE_RATE as f64;

        let wav_path = self.user_dir.join(format!("{}.wav", name));
        wav::write_pcm16(&wav_path, &normalized, NORMALIZED_SAMPLE_RATE)?;

        let transcript = transcript.unwrap_or("").trim().to_string();
        let txt_path = self.user_dir.join(format!("{}.txt", name));
        if transcript.is_empty() {
            let _ = fs::remove_file(&txt_path);
        } else {
            fs::write(&txt_path, &transcript)?;
        }

        Ok((
            VoiceInfo {
                name: name.to_string(),
                source: VoiceSource::User,
                transcript,
                audio_path: wav_path,
            },
            duration,
        ))
    }

    /// Rename a user voice (audio and transcript move together)
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<VoiceInfo> {
        Self::validate_name(old_name)?;
        Self::validate_name(new_name)?;
        if self.is_default(old_name) {
            return Err(ApiError::BadRequest(format!(
                "Default voice '{}' cannot be renamed",
                old_name
            )));
        }
        self.reject_reserved(new_name)?;

        let old_wav = self.user_dir.join(format!("{}.wav", old_name));
        if !old_wav.exists() {
            return Err(ApiError::NotFound(format!("Voice '{}' not found", old_name)));
        }
        let new_wav = self.user_dir.join(format!("{}.wav", new_name));
        if new_wav.exists() && !old_name.eq_ignore_ascii_case(new_name) {
            return Err(ApiError::BadRequest(format!(
                "Voice '{}' already exists",
                new_name
            )));
        }

        fs::rename(&old_wav, &new_wav)?;
        let old_txt = self.user_dir.join(format!("{}.txt", old_name));
        if old_txt.exists() {
            fs::rename(&old_txt, self.user_dir.join(format!("{}.txt", new_name)))?;
        }

        self.get(new_name)
    }

    /// Replace a user voice's audio in place, keeping the transcript
    pub fn replace_audio(&self, name: &str, audio_bytes: &[u8]) -> Result<VoiceInfo> {
        Self::validate_name(name)?;
        if self.is_default(name) {
            return Err(ApiError::BadRequest(format!(
                "Default voice '{}' cannot be modified",
                name
            )));
        }
        let wav_path = self.user_dir.join(format!("{}.wav", name));
        if !wav_path.exists() {
            return Err(ApiError::NotFound(format!("Voice '{}' not found", name)));
        }

        let normalized = normalize_voice_audio(audio_bytes)?;
        wav::write_pcm16(&wav_path, &normalized, NORMALIZED_SAMPLE_RATE)?;
        self.get(name)
    }

    /// Replace (or clear) a user voice's transcript
    pub fn replace_transcript(&self, name: &str, transcript: &str) -> Result<VoiceInfo> {
        Self::validate_name(name)?;
        if self.is_default(name) {
            return Err(ApiError::BadRequest(format!(
                "Default voice '{}' cannot be modified",
                name
            )));
        }
        if !self.user_dir.join(format!("{}.wav", name)).exists() {
            return Err(ApiError::NotFound(format!("Voice '{}' not found", name)));
        }

        let txt_path = self.user_dir.join(format!("{}.txt", name));
        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            let _ = fs::remove_file(&txt_path);
        } else {
            fs::write(&txt_path, trimmed)?;
        }
        self.get(name)
    }

    /// Delete a user voice; defaults are immutable
    pub fn delete(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        if self.is_default(name) {
            return Err(ApiError::BadRequest(format!(
                "Default voice '{}' cannot be deleted",
                name
            )));
        }
        let wav_path = self.user_dir.join(format!("{}.wav", name));
        if !wav_path.exists() {
            return Err(ApiError::NotFound(format!("Voice '{}' not found", name)));
        }
        fs::remove_file(&wav_path)?;
        let _ = fs::remove_file(self.user_dir.join(format!("{}.txt", name)));
        Ok(())
    }
}

/// Normalize a stored voice sample into a scratch reference WAV
///
/// Clone engines need a guaranteed-readable mono 24 kHz file; the source may
/// predate normalization. Returns the reference duration in seconds.
pub fn normalize_reference(src: &Path, dest: &Path) -> Result<f64> {
    let bytes = fs::read(src)?;
    let normalized = normalize_voice_audio(&bytes)?;
    let duration = normalized.len() as f64 / NORMALIZED_SAMPLE_RATE as f64;
    wav::write_pcm16(dest, &normalized, NORMALIZED_SAMPLE_RATE)?;
    Ok(duration)
}

/// Decode arbitrary uploaded WAV audio into mono f32 at the canonical rate
fn normalize_voice_audio(audio_bytes: &[u8]) -> Result<Vec<f32>> {
    let decoded = wav::decode_mono_bytes(audio_bytes)?;
    if decoded.sample_rate == NORMALIZED_SAMPLE_RATE {
        return Ok(decoded.samples);
    }
    Ok(stitch::resample(
        &decoded.samples,
        decoded.sample_rate,
        NORMALIZED_SAMPLE_RATE,
    ))
}

fn wav_stems(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut stems: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("wav"))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();
    stems.sort();
    stems
}

fn read_transcript(dir: &Path, stem: &str) -> String {
    fs::read_to_string(dir.join(format!("{}.txt", stem)))
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp: &TempDir) -> VoiceStore {
        let samples = temp.path().join("samples");
        let user = temp.path().join("user");
        fs::create_dir_all(&samples).unwrap();
        fs::create_dir_all(&user).unwrap();
        VoiceStore::new(samples, user, vec![])
    }

    fn wav_fixture(sample_rate: u32, seconds: f32) -> Vec<u8> {
        let samples = vec![0.1f32; (sample_rate as f32 * seconds) as usize];
        wav::encode_pcm16(&samples, sample_rate).unwrap()
    }

    fn seed_default(store: &VoiceStore, name: &str) {
        let samples = vec![0.2f32; 2400];
        wav::write_pcm16(
            &store.samples_dir().join(format!("{}.wav", name)),
            &samples,
            NORMALIZED_SAMPLE_RATE,
        )
        .unwrap();
    }

    #[test]
    fn test_validate_name_rules() {
        assert!(VoiceStore::validate_name("Natasha").is_ok());
        assert!(VoiceStore::validate_name("max_2-b").is_ok());
        assert!(VoiceStore::validate_name("bad name").is_err());
        assert!(VoiceStore::validate_name("../etc").is_err());
        assert!(VoiceStore::validate_name("").is_err());
    }

    #[test]
    fn test_upload_normalizes_to_24k() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let upload = wav_fixture(48_000, 1.0);
        let (info, duration) = store.save_upload("MyVoice", &upload, Some("hello")).unwrap();

        assert_eq!(info.source, VoiceSource::User);
        assert!((duration - 1.0).abs() < 0.01);

        let stored = wav::read_mono(&info.audio_path).unwrap();
        assert_eq!(stored.sample_rate, NORMALIZED_SAMPLE_RATE);
        assert_eq!(stored.samples.len(), 24_000);
    }

    #[test]
    fn test_reserved_default_name_rejected() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        seed_default(&store, "Natasha");

        let upload = wav_fixture(24_000, 0.5);
        let err = store.save_upload("Natasha", &upload, None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("reserved")));

        // Case-insensitive reservation
        let err = store.save_upload("natasha", &upload, None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_unreadable_upload_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let err = store.save_upload("Broken", &[1, 2, 3, 4], None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_list_merges_pools_user_wins() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        seed_default(&store, "Shared");
        seed_default(&store, "OnlyDefault");

        // User upload shadowing is blocked by reservation, so write directly
        // to simulate a pre-existing user file with a clashing name.
        let samples = vec![0.3f32; 2400];
        wav::write_pcm16(
            &store.user_dir().join("Shared.wav"),
            &samples,
            NORMALIZED_SAMPLE_RATE,
        )
        .unwrap();

        let voices = store.list();
        assert_eq!(voices.len(), 2);
        let shared = voices.iter().find(|v| v.name == "Shared").unwrap();
        assert_eq!(shared.source, VoiceSource::User);
    }

    #[test]
    fn test_rename_moves_audio_and_transcript() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let upload = wav_fixture(24_000, 0.5);
        store.save_upload("Old", &upload, Some("transcript")).unwrap();

        let info = store.rename("Old", "New").unwrap();
        assert_eq!(info.name, "New");
        assert_eq!(info.transcript, "transcript");
        assert!(!store.user_dir().join("Old.wav").exists());
        assert!(store.user_dir().join("New.wav").exists());
        assert!(store.user_dir().join("New.txt").exists());
    }

    #[test]
    fn test_delete_default_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        seed_default(&store, "Max");

        let err = store.delete("Max").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let err = store.delete("Ghost").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_migrate_legacy_destination_wins() {
        let temp = TempDir::new().unwrap();
        let samples = temp.path().join("samples");
        let user = temp.path().join("user");
        let legacy = temp.path().join("legacy_qwen3");
        fs::create_dir_all(&samples).unwrap();
        fs::create_dir_all(&user).unwrap();
        fs::create_dir_all(&legacy).unwrap();

        // Voice only in legacy: should move
        wav::write_pcm16(&legacy.join("Mover.wav"), &[0.1; 240], 24_000).unwrap();
        fs::write(legacy.join("Mover.txt"), "moved transcript").unwrap();

        // Voice in both: destination keeps its copy, source is removed
        wav::write_pcm16(&legacy.join("Clash.wav"), &[0.5; 240], 24_000).unwrap();
        wav::write_pcm16(&user.join("Clash.wav"), &[0.9; 240], 24_000).unwrap();

        let store = VoiceStore::new(samples, user.clone(), vec![legacy.clone()]);
        store.migrate_legacy();

        assert!(user.join("Mover.wav").exists());
        assert!(user.join("Mover.txt").exists());
        assert!(!legacy.join("Mover.wav").exists());

        assert!(!legacy.join("Clash.wav").exists());
        let kept = wav::read_mono(&user.join("Clash.wav")).unwrap();
        assert!((kept.samples[0] - 0.9).abs() < 0.01);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        assert!(matches!(store.get("Nobody"), Err(ApiError::NotFound(_))));
    }
}
