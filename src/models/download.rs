use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::registry::{Acquisition, ModelRegistry};
use crate::config::constants::{DICTA_MODEL_FILE, DICTA_MODEL_URL};
use crate::error::{ApiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatus {
    pub status: DownloadState,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    pub started_at: String,
}

/// What happened when a download was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyInProgress,
    AlreadyDownloaded,
}

impl StartOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StartOutcome::Started => "download started",
            StartOutcome::AlreadyInProgress => "download already in progress",
            StartOutcome::AlreadyDownloaded => "model already downloaded",
        }
    }
}

/// Coordinates background model downloads
///
/// Status records are keyed by repo id (model name for repo-less entries)
/// and kept in memory for the process lifetime; a second request for a repo
/// that is already downloading is a no-op.
pub struct DownloadManager {
    statuses: DashMap<String, DownloadStatus>,
    dicta: Mutex<Option<DownloadStatus>>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self {
            statuses: DashMap::new(),
            dicta: Mutex::new(None),
        }
    }

    /// Kick off a background snapshot download for a catalogued model
    pub fn start(
        self: &Arc<Self>,
        registry: &Arc<ModelRegistry>,
        name: &str,
    ) -> Result<StartOutcome> {
        let model = registry
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown model '{}'", name)))?;
        if model.acquisition == Acquisition::Pip {
            return Err(ApiError::BadRequest(format!(
                "Model '{}' is installed as a runtime package and cannot be downloaded",
                name
            )));
        }
        if model.repo.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Model '{}' has no download repository",
                name
            )));
        }

        let key = model.download_key().to_string();

        if let Some(existing) = self.statuses.get(&key) {
            if existing.status == DownloadState::Downloading {
                return Ok(StartOutcome::AlreadyInProgress);
            }
        }
        if registry.is_downloaded(&model) {
            self.statuses.insert(
                key,
                DownloadStatus {
                    status: DownloadState::Completed,
                    model_name: model.name.to_string(),
                    error: None,
                    snapshot_path: registry.snapshot_path(&model),
                    started_at: Utc::now().to_rfc3339(),
                },
            );
            return Ok(StartOutcome::AlreadyDownloaded);
        }

        self.statuses.insert(
            key.clone(),
            DownloadStatus {
                status: DownloadState::Downloading,
                model_name: model.name.to_string(),
                error: None,
                snapshot_path: None,
                started_at: Utc::now().to_rfc3339(),
            },
        );

        let manager = Arc::clone(self);
        let registry = Arc::clone(registry);
        let repo = model.repo.to_string();
        let model_name = model.name.to_string();
        tokio::spawn(async move {
            let result = fetch_repo_snapshot(&registry, &repo).await;
            let mut entry = manager.statuses.entry(key).or_insert_with(|| DownloadStatus {
                status: DownloadState::Downloading,
                model_name: model_name.clone(),
                error: None,
                snapshot_path: None,
                started_at: Utc::now().to_rfc3339(),
            });
            match result {
                Ok(snapshot) => {
                    tracing::info!(model = %model_name, snapshot = %snapshot.display(), "Model download completed");
                    entry.status = DownloadState::Completed;
                    entry.snapshot_path = Some(snapshot);
                    entry.error = None;
                }
                Err(e) => {
                    tracing::error!(model = %model_name, error = %e, "Model download failed");
                    entry.status = DownloadState::Failed;
                    entry.error = Some(e.to_string());
                }
            }
        });

        Ok(StartOutcome::Started)
    }

    /// Status snapshot for one model, if a download was ever attempted
    pub fn status_for(&self, key: &str) -> Option<DownloadStatus> {
        self.statuses.get(key).map(|s| s.clone())
    }

    /// Delete a downloaded model's cache directory
    ///
    /// Only permitted when the model is currently downloaded; the whole
    /// cache directory goes in one remove so a later probe can never see a
    /// half-deleted snapshot as ready.
    pub fn delete(&self, registry: &ModelRegistry, name: &str) -> Result<()> {
        let model = registry
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown model '{}'", name)))?;
        if model.acquisition == Acquisition::Pip {
            return Err(ApiError::BadRequest(format!(
                "Model '{}' is installed as a runtime package and cannot be deleted",
                name
            )));
        }
        if !registry.is_downloaded(&model) {
            return Err(ApiError::Conflict(format!(
                "Model '{}' is not downloaded",
                name
            )));
        }

        std::fs::remove_dir_all(registry.cache_dir(&model))?;
        self.statuses.remove(model.download_key());
        tracing::info!(model = %name, "Model cache deleted");
        Ok(())
    }

    /// Kick off the one-shot Hebrew phonemizer download
    pub fn start_dicta(self: &Arc<Self>, target_dir: PathBuf) -> StartOutcome {
        let target = target_dir.join(DICTA_MODEL_FILE);
        {
            let mut guard = self.dicta.lock().unwrap();
            if let Some(status) = guard.as_ref() {
                if status.status == DownloadState::Downloading {
                    return StartOutcome::AlreadyInProgress;
                }
            }
            if target.exists() {
                *guard = Some(DownloadStatus {
                    status: DownloadState::Completed,
                    model_name: "dicta-onnx".to_string(),
                    error: None,
                    snapshot_path: Some(target),
                    started_at: Utc::now().to_rfc3339(),
                });
                return StartOutcome::AlreadyDownloaded;
            }
            *guard = Some(DownloadStatus {
                status: DownloadState::Downloading,
                model_name: "dicta-onnx".to_string(),
                error: None,
                snapshot_path: None,
                started_at: Utc::now().to_rfc3339(),
            });
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let result = fetch_dicta_model(&target_dir).await;
            let mut guard = manager.dicta.lock().unwrap();
            if let Some(status) = guard.as_mut() {
                match result {
                    Ok(path) => {
                        tracing::info!(path = %path.display(), "Dicta model download completed");
                        status.status = DownloadState::Completed;
                        status.snapshot_path = Some(path);
                        status.error = None;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Dicta model download failed");
                        status.status = DownloadState::Failed;
                        status.error = Some(e.to_string());
                    }
                }
            }
        });

        StartOutcome::Started
    }

    pub fn dicta_status(&self) -> Option<DownloadStatus> {
        self.dicta.lock().unwrap().clone()
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull every file of a repo into the hub cache and resolve the snapshot
async fn fetch_repo_snapshot(registry: &ModelRegistry, repo: &str) -> Result<PathBuf> {
    let api = hf_hub::api::tokio::ApiBuilder::new()
        .with_cache_dir(registry.models_dir().to_path_buf())
        .with_progress(false)
        .build()
        .map_err(|e| ApiError::Internal(format!("hub client init failed: {}", e)))?;

    let repo_api = api.model(repo.to_string());
    let info = repo_api
        .info()
        .await
        .map_err(|e| ApiError::Internal(format!("repo info failed for {}: {}", repo, e)))?;

    for sibling in &info.siblings {
        repo_api.get(&sibling.rfilename).await.map_err(|e| {
            ApiError::Internal(format!(
                "download failed for {}/{}: {}",
                repo, sibling.rfilename, e
            ))
        })?;
    }

    let model = registry
        .catalog()
        .into_iter()
        .find(|m| m.repo == repo)
        .ok_or_else(|| ApiError::Internal(format!("repo {} left the catalog", repo)))?;
    registry.snapshot_path(&model).ok_or_else(|| {
        ApiError::Internal(format!(
            "download finished but no usable snapshot appeared under {}",
            registry.cache_dir(&model).display()
        ))
    })
}

/// Fetch the dicta ONNX release artifact into the data directory
async fn fetch_dicta_model(target_dir: &std::path::Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(target_dir).await?;
    let target = target_dir.join(DICTA_MODEL_FILE);

    let response = reqwest::get(DICTA_MODEL_URL)
        .await
        .map_err(|e| ApiError::Internal(format!("dicta download failed: {}", e)))?
        .error_for_status()
        .map_err(|e| ApiError::Internal(format!("dicta download failed: {}", e)))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Internal(format!("dicta download failed: {}", e)))?;

    // Write through a temp name so a crash never leaves a truncated model
    let tmp = target.with_extension("onnx.part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &target).await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seeded_registry(temp: &TempDir) -> Arc<ModelRegistry> {
        let registry = ModelRegistry::with_dir(temp.path().to_path_buf());
        let kokoro = registry.get("Kokoro").unwrap();
        let snapshot = registry.cache_dir(&kokoro).join("snapshots").join("rev");
        fs::create_dir_all(&snapshot).unwrap();
        fs::write(snapshot.join("model.safetensors"), b"weights").unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_start_on_downloaded_model_reports_done() {
        let temp = TempDir::new().unwrap();
        let registry = seeded_registry(&temp);
        let manager = Arc::new(DownloadManager::new());

        let outcome = manager.start(&registry, "Kokoro").unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyDownloaded);

        let kokoro = registry.get("Kokoro").unwrap();
        let status = manager.status_for(kokoro.download_key()).unwrap();
        assert_eq!(status.status, DownloadState::Completed);
        assert!(status.snapshot_path.is_some());
    }

    #[tokio::test]
    async fn test_start_unknown_model_is_not_found() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::with_dir(temp.path().to_path_buf()));
        let manager = Arc::new(DownloadManager::new());

        assert!(matches!(
            manager.start(&registry, "Nope"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pip_model_refuses_download_and_delete() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::with_dir(temp.path().to_path_buf()));
        let manager = Arc::new(DownloadManager::new());

        assert!(matches!(
            manager.start(&registry, "IndexTTS-2"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            manager.delete(&registry, "IndexTTS-2"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_start_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::with_dir(temp.path().to_path_buf()));
        let manager = Arc::new(DownloadManager::new());

        // Pretend a download is already running for the Kokoro repo
        let kokoro = registry.get("Kokoro").unwrap();
        manager.statuses.insert(
            kokoro.download_key().to_string(),
            DownloadStatus {
                status: DownloadState::Downloading,
                model_name: "Kokoro".to_string(),
                error: None,
                snapshot_path: None,
                started_at: Utc::now().to_rfc3339(),
            },
        );

        let outcome = manager.start(&registry, "Kokoro").unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyInProgress);
    }

    #[tokio::test]
    async fn test_delete_requires_downloaded() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::with_dir(temp.path().to_path_buf()));
        let manager = Arc::new(DownloadManager::new());

        assert!(matches!(
            manager.delete(&registry, "Kokoro"),
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_cache_dir() {
        let temp = TempDir::new().unwrap();
        let registry = seeded_registry(&temp);
        let manager = Arc::new(DownloadManager::new());

        let kokoro = registry.get("Kokoro").unwrap();
        let cache_dir = registry.cache_dir(&kokoro);
        assert!(cache_dir.exists());

        manager.delete(&registry, "Kokoro").unwrap();
        assert!(!cache_dir.exists());
        assert!(!registry.is_downloaded(&kokoro));
    }

    #[tokio::test]
    async fn test_dicta_already_present_reports_done() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(DownloadManager::new());
        fs::create_dir_all(temp.path()).unwrap();
        fs::write(temp.path().join(DICTA_MODEL_FILE), b"onnx").unwrap();

        let outcome = manager.start_dicta(temp.path().to_path_buf());
        assert_eq!(outcome, StartOutcome::AlreadyDownloaded);
        let status = manager.dicta_status().unwrap();
        assert_eq!(status.status, DownloadState::Completed);
    }
}
