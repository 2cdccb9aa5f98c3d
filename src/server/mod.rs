pub mod audiobook_api;
pub mod generate;
pub mod models_api;
pub mod static_audio;
pub mod system_api;
pub mod voices_api;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::alignment::AlignmentService;
use crate::config::PathService;
use crate::engines::EngineRegistry;
use crate::error::{ApiError, FieldError};
use crate::jobs::audiobook::AudiobookManager;
use crate::jobs::JobBoard;
use crate::logging;
use crate::models::{DownloadManager, ModelRegistry};
use crate::outputs::OutputStore;
use crate::pregen::PregenStore;
use crate::settings::SettingsStore;
use crate::textdoc::ExtractorSet;
use crate::voices::VoiceStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<PathService>,
    pub settings: Arc<SettingsStore>,
    pub models: Arc<ModelRegistry>,
    pub downloads: Arc<DownloadManager>,
    pub voices: Arc<VoiceStore>,
    pub outputs: Arc<OutputStore>,
    pub engines: Arc<EngineRegistry>,
    pub board: Arc<JobBoard>,
    pub audiobooks: Arc<AudiobookManager>,
    pub alignment: Arc<AlignmentService>,
    pub extractors: Arc<ExtractorSet>,
    pub pregen: Arc<PregenStore>,
}

/// JSON extractor that renders rejections as the 422 validation envelope
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::Validation(vec![FieldError::new(
                "body",
                rejection.body_text(),
            )])),
        }
    }
}

/// Parse a JSON value into a typed request, mapping failures to 422
pub fn parse_request<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(vec![FieldError::new("body", e.to_string())]))
}

/// CORS origins: `MIMIKA_CORS_ORIGINS` (comma-separated) or the local dev list
fn cors_layer() -> CorsLayer {
    let configured: Vec<String> = std::env::var("MIMIKA_CORS_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();

    let origins: Vec<String> = if configured.is_empty() {
        let mut defaults = Vec::new();
        for host in ["localhost", "127.0.0.1"] {
            defaults.push(format!("http://{}", host));
            for port in [3000, 5173, 7693, 8000] {
                defaults.push(format!("http://{}:{}", host, port));
            }
        }
        defaults
    } else {
        configured
    };

    let parsed: Vec<axum::http::HeaderValue> =
        origins.iter().filter_map(|o| o.parse().ok()).collect();

    // Credentials stay off so the wildcard-ish local setup cannot leak cookies
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Panic-to-500 conversion, rendered as the standard error envelope
fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "Handler panicked");
    ApiError::Internal(format!("panic: {}", detail)).into_response()
}

/// Create and configure the HTTP router
pub fn create_router(state: AppState) -> Router<()> {
    let api = Router::new()
        // Health and diagnostics
        .route("/api/health", get(system_api::health))
        .route("/api/system/info", get(system_api::system_info))
        .route("/api/system/stats", get(system_api::system_stats))
        .route("/api/system/folders", get(system_api::system_folders))
        .route("/api/system/logs", get(system_api::system_logs))
        .route("/api/system/logs/export", get(system_api::export_logs))
        .route(
            "/api/system/diagnostics/export",
            get(system_api::export_diagnostics),
        )
        // Generation
        .route("/api/:engine/generate", post(generate::generate))
        .route("/api/qwen3/generate/stream", post(generate::qwen3_stream))
        // Voices
        .route("/api/voices/custom", get(voices_api::custom_voices))
        .route("/api/voice-samples", get(voices_api::voice_samples))
        .route(
            "/api/:engine/voices",
            get(voices_api::list_engine_voices).post(voices_api::upload_voice),
        )
        .route(
            "/api/:engine/voices/:name",
            get(voices_api::get_voice)
                .put(voices_api::update_voice)
                .delete(voices_api::delete_voice),
        )
        .route(
            "/api/:engine/voices/:name/audio",
            get(voices_api::voice_audio),
        )
        .route("/api/:engine/languages", get(voices_api::engine_languages))
        .route("/api/:engine/speakers", get(voices_api::engine_speakers))
        .route("/api/:engine/info", get(voices_api::engine_info))
        // Models
        .route("/api/models/status", get(models_api::models_status))
        .route("/api/models/dicta/download", post(models_api::dicta_download))
        .route("/api/models/dicta/status", get(models_api::dicta_status))
        .route("/api/models/:name/download", post(models_api::download_model))
        .route("/api/models/:name", delete(models_api::delete_model))
        // Audiobooks
        .route("/api/audiobook/generate", post(audiobook_api::generate))
        .route(
            "/api/audiobook/generate-from-file",
            post(audiobook_api::generate_from_file),
        )
        .route("/api/audiobook/status/:id", get(audiobook_api::status))
        .route("/api/audiobook/cancel/:id", post(audiobook_api::cancel))
        .route("/api/audiobook/list", get(audiobook_api::list))
        .route("/api/audiobook/:id", delete(audiobook_api::delete))
        // Generated artifacts
        .route("/api/outputs", get(system_api::list_outputs))
        .route(
            "/api/voice-clone/audio/list",
            get(system_api::list_outputs),
        )
        // Jobs
        .route("/api/jobs", get(system_api::list_jobs))
        .route("/api/jobs/:id", get(system_api::get_job))
        // Pregenerated showcase
        .route("/api/pregenerated", get(system_api::pregenerated))
        .route("/api/samples/:engine", get(system_api::engine_samples))
        // Documents
        .route("/api/pdf/list", get(system_api::pdf_list))
        .route("/api/pdf/extract-text", post(system_api::extract_text))
        // Settings
        .route(
            "/api/settings",
            get(system_api::get_settings).put(system_api::update_setting),
        )
        .route(
            "/api/settings/output-folder",
            get(system_api::get_output_folder).put(system_api::set_output_folder),
        )
        // Alignment
        .route("/api/word-alignment", post(system_api::word_alignment))
        // Retargetable artifact serving
        .route(
            "/audio/:file",
            get(static_audio::serve_audio).delete(static_audio::delete_audio),
        );

    let static_mounts = Router::new()
        .nest_service(
            "/pregenerated",
            ServeDir::new(state.pregen.pregen_dir().to_path_buf()),
        )
        .nest_service(
            "/samples",
            ServeDir::new(state.paths.sample_voices_dir()),
        )
        .nest_service("/pdf", ServeDir::new(state.paths.pdf_dir().to_path_buf()));

    api.merge(static_mounts)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(logging::access_log_middleware))
        .layer(middleware::from_fn(logging::request_context_middleware))
        .layer(cors_layer())
        .with_state(state)
}
