use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// A single field-level validation failure (422 detail entries)
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    // Request-shape errors
    Validation(Vec<FieldError>),
    BadRequest(String),

    // Resource errors
    NotFound(String),
    Conflict(String),

    // Back-end runtime missing; message carries an install hint
    ServiceUnavailable(String),

    // Internal errors (detail is never exposed to clients)
    Io(std::io::Error),
    Audio(String),
    TaskJoin(String),
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable kind used in the error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            _ => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(fields) => {
                write!(f, "Validation failed: {} field(s)", fields.len())
            }
            ApiError::BadRequest(msg) => write!(f, "{}", msg),
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::Conflict(msg) => write!(f, "{}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "{}", msg),
            ApiError::Io(e) => write!(f, "I/O error: {}", e),
            ApiError::Audio(msg) => write!(f, "Audio processing error: {}", msg),
            ApiError::TaskJoin(msg) => write!(f, "Task execution error: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

// Conversions
impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err)
    }
}

impl From<hound::Error> for ApiError {
    fn from(err: hound::Error) -> Self {
        ApiError::Audio(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::TaskJoin(err.to_string())
    }
}

// Axum integration: uniform envelope { error, detail, request_id }
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let detail = match &self {
            ApiError::Validation(fields) => serde_json::json!(fields),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::ServiceUnavailable(msg) => serde_json::json!(msg),
            _ => {
                // Full detail stays in the logs; clients get the fixed string.
                tracing::error!(error = %self, "Internal error");
                serde_json::json!("Internal server error")
            }
        };

        let request_id = crate::logging::current_request_id();

        (
            status,
            axum::Json(serde_json::json!({
                "error": kind,
                "detail": detail,
                "request_id": request_id,
            })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Error Type Conversion Tests =====

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let api_err: ApiError = io_err.into();

        assert!(matches!(api_err, ApiError::Io(_)));
        assert!(api_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_from_hound_error() {
        let invalid_wav = vec![0u8; 10];
        let cursor = std::io::Cursor::new(invalid_wav);
        let hound_result = hound::WavReader::new(cursor);

        if let Err(hound_err) = hound_result {
            let api_err: ApiError = hound_err.into();
            assert!(matches!(api_err, ApiError::Audio(_)));
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let api_err: ApiError = json_err.into();

        assert!(matches!(api_err, ApiError::Internal(_)));
    }

    // ===== HTTP Status Mapping Tests =====

    #[test]
    fn test_validation_maps_to_422() {
        let err = ApiError::Validation(vec![FieldError::new("text", "must not be empty")]);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let err = ApiError::BadRequest("reserved voice name".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "bad_request");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ApiError::NotFound("unknown voice".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let err = ApiError::Conflict("model not downloaded".to_string());
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_service_unavailable_maps_to_503() {
        let err = ApiError::ServiceUnavailable("runtime missing".to_string());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.kind(), "service_unavailable");
    }

    #[test]
    fn test_internal_variants_map_to_500() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        for err in [
            ApiError::Io(io_err),
            ApiError::Audio("bad wav".to_string()),
            ApiError::TaskJoin("panicked".to_string()),
            ApiError::Internal("oops".to_string()),
        ] {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(err.kind(), "internal_error");
        }
    }

    // ===== Envelope Tests =====

    #[tokio::test]
    async fn test_envelope_shape_for_bad_request() {
        let err = ApiError::BadRequest("empty text".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "bad_request");
        assert_eq!(json["detail"], "empty text");
        assert!(json.get("request_id").is_some());
    }

    #[tokio::test]
    async fn test_internal_detail_is_fixed_string() {
        let err = ApiError::Internal("secret stack details".to_string());
        let response = err.into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Internal server error");
        assert!(!body.windows(6).any(|w| w == b"secret"));
    }

    #[tokio::test]
    async fn test_validation_detail_is_field_list() {
        let err = ApiError::Validation(vec![
            FieldError::new("speed", "must be between 0.25 and 3.0"),
            FieldError::new("text", "must not be empty"),
        ]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"].as_array().unwrap().len(), 2);
        assert_eq!(json["detail"][0]["field"], "speed");
    }
}
