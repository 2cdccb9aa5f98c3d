use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::constants::WEIGHT_EXTENSIONS;
use crate::engines::EngineId;
use crate::error::{ApiError, Result};

/// Preset speakers for the Qwen3 CustomVoice models
pub const QWEN_SPEAKERS: &[&str] = &[
    "Ryan",     // English - Dynamic male with strong rhythm
    "Aiden",    // English - Sunny American male
    "Vivian",   // Chinese - Bright young female
    "Serena",   // Chinese - Warm gentle female
    "Uncle_Fu", // Chinese - Seasoned male, low mellow
    "Dylan",    // Chinese - Beijing youthful male
    "Eric",     // Chinese - Sichuan lively male
    "Ono_Anna", // Japanese - Playful female
    "Sohee",    // Korean - Warm emotional female
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    Tts,
    Clone,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Acquisition {
    Huggingface,
    Pip,
}

/// Information about a catalogued synthesis model
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub engine: EngineId,
    pub repo: &'static str,
    pub size_gb: Option<f64>,
    pub mode: ModelMode,
    pub quantization: &'static str,
    pub speakers: Option<&'static [&'static str]>,
    pub acquisition: Acquisition,
    pub description: &'static str,
}

impl ModelDescriptor {
    /// Key used for download status bookkeeping (repo id, falling back to name)
    pub fn download_key(&self) -> &'static str {
        if self.repo.is_empty() {
            self.name
        } else {
            self.repo
        }
    }
}

/// Registry of every synthesis model across all engines
///
/// The catalog is static; readiness is recomputed from the on-disk hub cache
/// on every query.
pub struct ModelRegistry {
    models_dir: PathBuf,
}

impl ModelRegistry {
    /// Resolve the hub cache root the way the HF tooling does
    pub fn new() -> Self {
        let models_dir = env::var("HUGGINGFACE_HUB_CACHE")
            .map(PathBuf::from)
            .or_else(|_| env::var("HF_HOME").map(|h| PathBuf::from(h).join("hub")))
            .or_else(|_| {
                env::var("XDG_CACHE_HOME")
                    .map(|c| PathBuf::from(c).join("huggingface").join("hub"))
            })
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".cache")
                    .join("huggingface")
                    .join("hub")
            });
        Self { models_dir }
    }

    pub fn with_dir(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// All catalogued models across every engine
    pub fn catalog(&self) -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor {
                name: "Kokoro",
                engine: EngineId::Kokoro,
                repo: "mlx-community/Kokoro-82M-bf16",
                size_gb: Some(0.3),
                mode: ModelMode::Tts,
                quantization: "bf16",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Fast British English TTS",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-0.6B-Base",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-0.6B-Base-bf16",
                size_gb: Some(1.4),
                mode: ModelMode::Clone,
                quantization: "bf16",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Voice cloning (smaller, faster)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-1.7B-Base",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-1.7B-Base-bf16",
                size_gb: Some(3.6),
                mode: ModelMode::Clone,
                quantization: "bf16",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Voice cloning (larger, higher quality)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-0.6B-CustomVoice",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-0.6B-CustomVoice-bf16",
                size_gb: Some(1.4),
                mode: ModelMode::Custom,
                quantization: "bf16",
                speakers: Some(QWEN_SPEAKERS),
                acquisition: Acquisition::Huggingface,
                description: "Preset speakers (smaller, faster)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-1.7B-CustomVoice",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-1.7B-CustomVoice-bf16",
                size_gb: Some(3.6),
                mode: ModelMode::Custom,
                quantization: "bf16",
                speakers: Some(QWEN_SPEAKERS),
                acquisition: Acquisition::Huggingface,
                description: "Preset speakers (larger, higher quality)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-0.6B-Base-8bit",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-0.6B-Base-8bit",
                size_gb: Some(0.8),
                mode: ModelMode::Clone,
                quantization: "8bit",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Voice cloning (smaller, 8-bit)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-1.7B-Base-8bit",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-1.7B-Base-8bit",
                size_gb: Some(2.0),
                mode: ModelMode::Clone,
                quantization: "8bit",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Voice cloning (larger, 8-bit)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-0.6B-CustomVoice-8bit",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-0.6B-CustomVoice-8bit",
                size_gb: Some(0.8),
                mode: ModelMode::Custom,
                quantization: "8bit",
                speakers: Some(QWEN_SPEAKERS),
                acquisition: Acquisition::Huggingface,
                description: "Preset speakers (smaller, 8-bit)",
            },
            ModelDescriptor {
                name: "Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit",
                engine: EngineId::Qwen3,
                repo: "mlx-community/Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit",
                size_gb: Some(2.0),
                mode: ModelMode::Custom,
                quantization: "8bit",
                speakers: Some(QWEN_SPEAKERS),
                acquisition: Acquisition::Huggingface,
                description: "Preset speakers (larger, 8-bit)",
            },
            ModelDescriptor {
                name: "Chatterbox Multilingual",
                engine: EngineId::Chatterbox,
                repo: "mlx-community/chatterbox-fp16",
                size_gb: Some(2.0),
                mode: ModelMode::Clone,
                quantization: "fp16",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Multilingual voice cloning",
            },
            ModelDescriptor {
                name: "Supertonic-2",
                engine: EngineId::Supertonic,
                repo: "Supertone/supertonic-2",
                size_gb: Some(0.3),
                mode: ModelMode::Tts,
                quantization: "fp32",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Lightning-fast multilingual ONNX TTS",
            },
            ModelDescriptor {
                name: "CosyVoice3",
                engine: EngineId::Cosyvoice3,
                repo: "ayousanz/cosy-voice3-onnx",
                size_gb: Some(3.8),
                mode: ModelMode::Tts,
                quantization: "fp32",
                speakers: None,
                acquisition: Acquisition::Huggingface,
                description: "Expressive preset multilingual TTS (standalone ONNX pack)",
            },
            ModelDescriptor {
                name: "IndexTTS-2",
                engine: EngineId::Indextts2,
                repo: "",
                size_gb: None,
                mode: ModelMode::Clone,
                quantization: "fp16",
                speakers: None,
                acquisition: Acquisition::Pip,
                description: "Voice cloning via the optional IndexTTS-2 runtime",
            },
        ]
    }

    pub fn get(&self, name: &str) -> Option<ModelDescriptor> {
        self.catalog().into_iter().find(|m| m.name == name)
    }

    pub fn by_engine(&self, engine: EngineId) -> Vec<ModelDescriptor> {
        self.catalog()
            .into_iter()
            .filter(|m| m.engine == engine)
            .collect()
    }

    /// Cache directory for a model repo (`models--{owner}--{repo}`)
    pub fn cache_dir(&self, model: &ModelDescriptor) -> PathBuf {
        self.models_dir
            .join(format!("models--{}", model.repo.replace('/', "--")))
    }

    fn snapshot_dirs(&self, model: &ModelDescriptor) -> Vec<PathBuf> {
        let snapshots_dir = self.cache_dir(model).join("snapshots");
        let Ok(entries) = fs::read_dir(&snapshots_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect()
    }

    /// Return a usable snapshot path if one exists
    ///
    /// Snapshots are tried newest-modified first. A snapshot passes when it
    /// holds at least one recognized weight file; a metadata JSON alongside
    /// is preferred but minimal weight-only snapshots still count.
    pub fn snapshot_path(&self, model: &ModelDescriptor) -> Option<PathBuf> {
        let mut snapshots = self.snapshot_dirs(model);
        if snapshots.is_empty() {
            return None;
        }
        snapshots.sort_by_key(|p| {
            std::cmp::Reverse(
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH),
            )
        });
        snapshots.into_iter().find(|s| snapshot_has_payload(s))
    }

    pub fn is_downloaded(&self, model: &ModelDescriptor) -> bool {
        match model.acquisition {
            Acquisition::Huggingface => {
                !model.repo.is_empty() && self.snapshot_path(model).is_some()
            }
            Acquisition::Pip => false,
        }
    }

    /// Resolve a ready model to its snapshot path
    ///
    /// Fails with `conflict` (409) when no usable snapshot exists; the
    /// message names the expected cache directory so clients can surface it.
    pub fn ensure_ready(&self, name: &str) -> Result<PathBuf> {
        let model = self
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown model '{}'", name)))?;
        if model.acquisition == Acquisition::Pip {
            return Err(ApiError::BadRequest(format!(
                "Model '{}' is provided by an installed runtime, not a download",
                name
            )));
        }
        self.snapshot_path(&model).ok_or_else(|| {
            ApiError::Conflict(format!(
                "Model '{}' is not downloaded. Expected weights under {}",
                name,
                self.cache_dir(&model).display()
            ))
        })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort check that a snapshot contains usable model files
///
/// Requires at least one weight file; a metadata JSON short-circuits the
/// walk, keeping compatibility with minimal weight-only snapshots.
fn snapshot_has_payload(snapshot_dir: &Path) -> bool {
    let mut has_weight = false;
    let mut has_metadata = false;

    let mut stack = vec![snapshot_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let lowered = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            if lowered.ends_with(".json") {
                has_metadata = true;
            }
            let nonempty = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
            if nonempty && WEIGHT_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
                has_weight = true;
            }
            if has_weight && has_metadata {
                return true;
            }
        }
    }

    has_weight
}
