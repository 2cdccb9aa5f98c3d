use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregenSample {
    pub engine: String,
    pub voice: String,
    pub title: String,
    pub description: String,
    pub text: String,
    pub file_name: String,
}

impl PregenSample {
    pub fn url(&self) -> String {
        format!("/pregenerated/{}", self.file_name)
    }
}

/// Seed rows shipped with the service; reconciled against disk at startup
fn seed_rows() -> Vec<PregenSample> {
    let genesis_6_7 = "Genesis chapter 4, verses 6 and 7: And the Lord said unto Cain, \
Why art thou wroth? and why is thy countenance fallen? If thou doest well, \
shalt thou not be accepted? and if thou doest not well, sin lieth at the door.";
    let genesis_8_9 = "Genesis chapter 4, verses 8 and 9: And Cain talked with Abel his brother: \
and it came to pass, when they were in the field, that Cain rose up against Abel his brother, \
and slew him. And the Lord said unto Cain, Where is Abel thy brother? \
And he said, I know not: Am I my brother's keeper?";

    vec![
        PregenSample {
            engine: "supertonic".to_string(),
            voice: "F1".to_string(),
            title: "Genesis 4 Preview (F1)".to_string(),
            description: "Supertonic F1 English preview for instant playback".to_string(),
            text: genesis_6_7.to_string(),
            file_name: "supertonic-f1-genesis4-demo.wav".to_string(),
        },
        PregenSample {
            engine: "supertonic".to_string(),
            voice: "M2".to_string(),
            title: "Genesis 4 Preview (M2)".to_string(),
            description: "Supertonic M2 English preview using Genesis 4:8-9".to_string(),
            text: genesis_8_9.to_string(),
            file_name: "supertonic-m2-genesis4-demo.wav".to_string(),
        },
        PregenSample {
            engine: "cosyvoice3".to_string(),
            voice: "Eden".to_string(),
            title: "Genesis 4 Preview (Eden)".to_string(),
            description: "CosyVoice3 Eden English preview for instant playback".to_string(),
            text: genesis_6_7.to_string(),
            file_name: "cosyvoice3-f1-genesis4-demo.wav".to_string(),
        },
        PregenSample {
            engine: "cosyvoice3".to_string(),
            voice: "Atlas".to_string(),
            title: "Genesis 4 Preview (Atlas)".to_string(),
            description: "CosyVoice3 Atlas English preview using Genesis 4:8-9".to_string(),
            text: genesis_8_9.to_string(),
            file_name: "cosyvoice3-m2-genesis4-demo.wav".to_string(),
        },
    ]
}

/// CosyVoice3 previews reuse the Supertonic recordings under their own names
const COSY_COPIES: &[(&str, &str)] = &[
    ("supertonic-f1-genesis4-demo.wav", "cosyvoice3-f1-genesis4-demo.wav"),
    ("supertonic-m2-genesis4-demo.wav", "cosyvoice3-m2-genesis4-demo.wav"),
];

/// JSON-file-backed catalog of pregenerated showcase samples
///
/// Reconciliation inserts rows whose audio exists and prunes rows whose
/// audio is gone. Existing rows are left untouched, so a user-edited title
/// survives every restart.
pub struct PregenStore {
    catalog_path: PathBuf,
    pregen_dir: PathBuf,
    rows: Mutex<Vec<PregenSample>>,
}

impl PregenStore {
    pub fn open(data_dir: &Path, pregen_dir: PathBuf) -> Self {
        let catalog_path = data_dir.join("pregenerated.json");
        let rows = fs::read_to_string(&catalog_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            catalog_path,
            pregen_dir,
            rows: Mutex::new(rows),
        }
    }

    pub fn pregen_dir(&self) -> &Path {
        &self.pregen_dir
    }

    /// Bring the catalog in line with the files on disk
    pub fn reconcile(&self) -> Result<()> {
        if !self.pregen_dir.exists() {
            return Ok(());
        }

        for (source, target) in COSY_COPIES {
            let source_path = self.pregen_dir.join(source);
            let target_path = self.pregen_dir.join(target);
            if source_path.exists() && !target_path.exists() {
                fs::copy(&source_path, &target_path)?;
            }
        }

        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();

        // Prune rows whose backing file disappeared
        rows.retain(|row| self.pregen_dir.join(&row.file_name).exists());
        let removed = before - rows.len();

        // Insert seeds whose file exists; never touch an existing row, so
        // edited titles survive restarts
        let mut inserted = 0usize;
        for seed in seed_rows() {
            if !self.pregen_dir.join(&seed.file_name).exists() {
                continue;
            }
            let present = rows
                .iter()
                .any(|row| row.engine == seed.engine && row.file_name == seed.file_name);
            if !present {
                rows.push(seed);
                inserted += 1;
            }
        }

        if inserted > 0 || removed > 0 {
            self.persist(&rows)?;
            tracing::info!(
                inserted = inserted,
                removed = removed,
                "Reconciled pregenerated sample rows"
            );
        }
        Ok(())
    }

    /// Rows, optionally filtered by engine
    pub fn list(&self, engine: Option<&str>) -> Vec<PregenSample> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| engine.map(|e| row.engine == e).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn persist(&self, rows: &[PregenSample]) -> Result<()> {
        if let Some(parent) = self.catalog_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(rows)?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.catalog_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_files(temp: &TempDir, files: &[&str]) -> PregenStore {
        let pregen_dir = temp.path().join("pregenerated");
        fs::create_dir_all(&pregen_dir).unwrap();
        for file in files {
            fs::write(pregen_dir.join(file), b"RIFFfake").unwrap();
        }
        PregenStore::open(temp.path(), pregen_dir)
    }

    #[test]
    fn test_reconcile_inserts_rows_for_present_files() {
        let temp = TempDir::new().unwrap();
        let store = store_with_files(&temp, &["supertonic-f1-genesis4-demo.wav"]);

        store.reconcile().unwrap();
        let rows = store.list(Some("supertonic"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].voice, "F1");
    }

    #[test]
    fn test_reconcile_skips_missing_files() {
        let temp = TempDir::new().unwrap();
        let store = store_with_files(&temp, &[]);

        store.reconcile().unwrap();
        assert!(store.list(None).is_empty());
    }

    #[test]
    fn test_reconcile_copies_cosy_files() {
        let temp = TempDir::new().unwrap();
        let store = store_with_files(
            &temp,
            &[
                "supertonic-f1-genesis4-demo.wav",
                "supertonic-m2-genesis4-demo.wav",
            ],
        );

        store.reconcile().unwrap();
        assert!(store.pregen_dir().join("cosyvoice3-f1-genesis4-demo.wav").exists());
        assert_eq!(store.list(Some("cosyvoice3")).len(), 2);
    }

    #[test]
    fn test_reconcile_preserves_edited_titles() {
        let temp = TempDir::new().unwrap();
        let store = store_with_files(&temp, &["supertonic-f1-genesis4-demo.wav"]);
        store.reconcile().unwrap();

        {
            let mut rows = store.rows.lock().unwrap();
            rows[0].title = "My Custom Title".to_string();
            let cloned = rows.clone();
            drop(rows);
            store.persist(&cloned).unwrap();
        }

        // A reopened store re-reconciling must not clobber the edit
        let reopened = PregenStore::open(temp.path(), store.pregen_dir().to_path_buf());
        reopened.reconcile().unwrap();
        assert_eq!(reopened.list(None)[0].title, "My Custom Title");
    }

    #[test]
    fn test_reconcile_prunes_rows_without_files() {
        let temp = TempDir::new().unwrap();
        let store = store_with_files(&temp, &["supertonic-f1-genesis4-demo.wav"]);
        store.reconcile().unwrap();
        assert_eq!(store.list(None).len(), 1);

        fs::remove_file(store.pregen_dir().join("supertonic-f1-genesis4-demo.wav")).unwrap();
        store.reconcile().unwrap();
        assert!(store.list(None).is_empty());
    }
}
