use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

pub const OUTPUT_FOLDER_KEY: &str = "output_folder";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingEntry {
    pub value: String,
    pub updated_at: String,
}

/// Durable key/value preferences backed by a JSON file
///
/// Upsert semantics with a per-key `updated_at` timestamp. The whole map is
/// rewritten on every set; the file is small and writes go through a temp
/// file + rename so a crash never leaves a half-written store.
pub struct SettingsStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, SettingEntry>>,
}

impl SettingsStore {
    /// Open (or create) the store at `<data>/settings.json`
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join("settings.json");
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Settings file unreadable, starting empty"
                );
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Get a setting value by key
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.value.clone())
    }

    /// Upsert a setting value and persist the store
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            SettingEntry {
                value: value.to_string(),
                updated_at: Utc::now().to_rfc3339(),
            },
        );
        self.persist(&entries)
    }

    /// Snapshot of all settings as a plain key → value map
    pub fn all(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Timestamp of the most recent update, if any key was ever written
    pub fn last_updated(&self) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|e| e.updated_at.clone())
            .max()
    }

    /// The persisted output-folder preference
    pub fn output_folder(&self) -> Option<String> {
        self.get(OUTPUT_FOLDER_KEY)
    }

    fn persist(&self, entries: &HashMap<String, SettingEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
