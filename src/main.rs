mod alignment;
mod audio;
mod config;
mod engines;
mod error;
mod jobs;
mod logging;
mod models;
mod outputs;
mod pregen;
mod server;
mod settings;
mod streaming;
mod system;
mod textdoc;
mod voices;

use std::sync::Arc;

use alignment::AlignmentService;
use config::constants::{DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT};
use config::PathService;
use engines::{backend, EngineRegistry};
use jobs::audiobook::AudiobookManager;
use jobs::JobBoard;
use models::{DownloadManager, ModelRegistry};
use outputs::OutputStore;
use pregen::PregenStore;
use server::{create_router, AppState};
use settings::SettingsStore;
use textdoc::ExtractorSet;
use voices::VoiceStore;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load .env file if it exists (silently ignore if it doesn't)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    if args.contains(&"--version".to_string()) || args.contains(&"-v".to_string()) {
        println!("MimikaStudio Server v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Resolve every writable directory before anything logs or persists
    let paths = Arc::new(PathService::resolve());

    let log_config = logging::LogConfig::from_env();
    if let Err(e) = logging::init_logging(paths.log_dir(), &log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    logging::log_platform_info();

    let settings = Arc::new(SettingsStore::open(paths.data_dir()));
    // Output precedence: the env override beats settings inside init_outputs
    paths.init_outputs(settings.output_folder().as_deref());

    let voices = Arc::new(VoiceStore::new(
        paths.sample_voices_dir(),
        paths.user_voices_dir(),
        legacy_voice_dirs(&paths),
    ));
    voices.migrate_legacy();

    let models = Arc::new(ModelRegistry::new());
    let downloads = Arc::new(DownloadManager::new());
    let outputs = Arc::new(OutputStore::new(Arc::clone(&paths)));

    let pregen = Arc::new(PregenStore::open(
        paths.data_dir(),
        paths.pregenerated_dir(),
    ));
    if let Err(e) = pregen.reconcile() {
        tracing::warn!(error = %e, "Pregenerated sample reconciliation failed");
    }

    // No synthesis runtime ships with this build; each engine answers 503
    // with an install hint until one is plugged in.
    let loader = backend::unavailable_loader();
    let engines = Arc::new(EngineRegistry::new(
        Arc::clone(&models),
        Arc::clone(&voices),
        Arc::clone(&outputs),
        loader,
    ));

    let state = AppState {
        paths: Arc::clone(&paths),
        settings,
        models,
        downloads,
        voices,
        outputs,
        engines,
        board: Arc::new(JobBoard::new()),
        audiobooks: Arc::new(AudiobookManager::new()),
        alignment: Arc::new(AlignmentService::new()),
        extractors: Arc::new(ExtractorSet::new()),
        pregen,
    };

    let host = std::env::var("MIMIKA_BACKEND_HOST")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND_HOST.to_string());
    let port = config::env_int("MIMIKA_BACKEND_PORT", DEFAULT_BACKEND_PORT);
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        outputs = %paths.outputs_dir().display(),
        data = %paths.data_dir().display(),
        "MimikaStudio server listening"
    );

    let app = create_router(state);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Per-engine voice folders from older releases, folded into the shared pool
fn legacy_voice_dirs(paths: &PathService) -> Vec<std::path::PathBuf> {
    let user_root = paths.data_dir().join("user_voices");
    vec![
        user_root.join("qwen3"),
        user_root.join("chatterbox"),
        user_root.join("indextts2"),
        paths.data_dir().join("samples").join("qwen3_voices"),
        paths.data_dir().join("samples").join("chatterbox_voices"),
    ]
}
