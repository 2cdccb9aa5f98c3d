use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::env_path;

/// Resolved writable runtime directories for the whole service
///
/// Every directory is probed once at startup with `mkdir -p`, falling back to
/// a tmp-rooted location if the preferred path is not writable. The outputs
/// directory is the one runtime-swappable entry; the `/audio` static handler
/// reads it per request so retargeting needs no restart.
pub struct PathService {
    runtime_home: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
    pdf_dir: PathBuf,
    outputs_dir: RwLock<PathBuf>,
    outputs_env_override: bool,
}

/// Create a directory, returning the fallback if the primary fails
pub fn ensure_dir_with_fallback(primary: PathBuf, fallback: PathBuf) -> PathBuf {
    match fs::create_dir_all(&primary) {
        Ok(()) => primary,
        Err(e) => {
            tracing::warn!(
                primary = %primary.display(),
                fallback = %fallback.display(),
                error = %e,
                "Primary directory not writable, using fallback"
            );
            // The tmp fallback is assumed creatable; a failure here is fatal
            // for the caller anyway, so surface the primary path regardless.
            if fs::create_dir_all(&fallback).is_ok() {
                fallback
            } else {
                primary
            }
        }
    }
}

impl PathService {
    /// Resolve all fixed directories from environment overrides and defaults
    ///
    /// The outputs directory starts on its default chain; call
    /// [`PathService::init_outputs`] once settings are available to apply the
    /// persisted `output_folder` preference.
    pub fn resolve() -> Self {
        let runtime_home = ensure_dir_with_fallback(
            env_path("MIMIKA_RUNTIME_HOME")
                .or_else(|| dirs::home_dir().map(|h| h.join("MimikaStudio")))
                .unwrap_or_else(|| PathBuf::from("/tmp/mimikastudio")),
            PathBuf::from("/tmp/mimikastudio"),
        );
        let data_dir = ensure_dir_with_fallback(
            env_path("MIMIKA_DATA_DIR").unwrap_or_else(|| runtime_home.join("data")),
            runtime_home.join("data"),
        );
        let log_dir = ensure_dir_with_fallback(
            env_path("MIMIKA_LOG_DIR").unwrap_or_else(|| runtime_home.join("logs")),
            PathBuf::from("/tmp/mimikastudio-logs"),
        );
        let pdf_dir = ensure_dir_with_fallback(
            env_path("MIMIKA_PDF_DIR").unwrap_or_else(|| data_dir.join("pdf")),
            PathBuf::from("/tmp/mimikastudio-pdf"),
        );

        let outputs_env_override = env_path("MIMIKA_OUTPUT_DIR").is_some();
        let outputs_dir = ensure_dir_with_fallback(
            env_path("MIMIKA_OUTPUT_DIR").unwrap_or_else(|| runtime_home.join("outputs")),
            PathBuf::from("/tmp/mimikastudio-outputs"),
        );

        Self {
            runtime_home,
            data_dir,
            log_dir,
            pdf_dir,
            outputs_dir: RwLock::new(outputs_dir),
            outputs_env_override,
        }
    }

    /// Apply the persisted `output_folder` setting, unless the env override wins
    ///
    /// Precedence: `MIMIKA_OUTPUT_DIR` env var, then the settings value, then
    /// `<runtime_home>/outputs`, then the tmp fallback.
    pub fn init_outputs(&self, configured: Option<&str>) {
        if self.outputs_env_override {
            return;
        }
        let trimmed = configured.map(str::trim).filter(|s| !s.is_empty());
        if let Some(path) = trimmed {
            let resolved = ensure_dir_with_fallback(
                super::expand_user(path),
                self.runtime_home.join("outputs"),
            );
            *self.outputs_dir.write().unwrap() = resolved;
        }
    }

    /// Swap the active outputs directory at runtime
    ///
    /// Creates the target first; the swap only happens if creation succeeds.
    /// Refused (with the effective path untouched) when the env override is
    /// active, so deployments pinning `MIMIKA_OUTPUT_DIR` stay authoritative.
    pub fn set_outputs_dir(&self, path: &Path) -> Result<PathBuf, std::io::Error> {
        if self.outputs_env_override {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "output folder is pinned by MIMIKA_OUTPUT_DIR",
            ));
        }
        fs::create_dir_all(path)?;
        let mut guard = self.outputs_dir.write().unwrap();
        *guard = path.to_path_buf();
        Ok(guard.clone())
    }

    /// Current outputs directory (snapshot; the target can move under you)
    pub fn outputs_dir(&self) -> PathBuf {
        self.outputs_dir.read().unwrap().clone()
    }

    /// Whether `MIMIKA_OUTPUT_DIR` pins the outputs directory
    pub fn outputs_env_override(&self) -> bool {
        self.outputs_env_override
    }

    pub fn runtime_home(&self) -> &Path {
        &self.runtime_home
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn pdf_dir(&self) -> &Path {
        &self.pdf_dir
    }

    /// Shipped default voice samples (read-only pool)
    pub fn sample_voices_dir(&self) -> PathBuf {
        self.data_dir.join("samples").join("voices")
    }

    /// Unified user voice pool shared by every clone engine
    pub fn user_voices_dir(&self) -> PathBuf {
        self.data_dir.join("user_voices").join("cloners")
    }

    /// Bundled pregenerated showcase audio
    pub fn pregenerated_dir(&self) -> PathBuf {
        self.data_dir.join("pregenerated")
    }

    /// Location of the Hebrew phonemizer model
    pub fn dicta_model_dir(&self) -> PathBuf {
        self.data_dir.join("models").join("dicta-onnx")
    }

    /// Test support: a path service rooted at one scratch directory
    #[doc(hidden)]
    pub fn for_tests(root: &Path) -> Self {
        Self {
            runtime_home: root.to_path_buf(),
            data_dir: root.join("data"),
            log_dir: root.join("logs"),
            pdf_dir: root.join("pdf"),
            outputs_dir: RwLock::new(root.join("outputs")),
            outputs_env_override: false,
        }
    }
}
