//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
        DefaultBodyLimit, Json, Multipart, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use super::state::AppState;
use crate::inference::ModelInfo;

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.max_body_size;
    let cors = state.config.cors_enabled;
    let logging = state.config.logging;

    let mut router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Challenge operations
        .route("/classify", post(classify))
        .route("/hint", get(hint))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    if logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

/// Error body: `{"error": "..."}`
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: String,
    pub uptime_secs: u64,
    pub labels: Vec<String>,
    pub model: ModelInfo,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: state.uptime().as_secs(),
        labels: state.classifier.labels().iter().map(str::to_string).collect(),
        model: state.classifier.model_info().clone(),
    })
}

/// Classify an uploaded image.
///
/// Expects `multipart/form-data` with the image in the `image` field.
async fn classify(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4();

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::warn!(%request_id, "Rejected non-multipart upload: {e}");
            return error_response(StatusCode::BAD_REQUEST, "No image file provided");
        },
    };

    let bytes = match read_image_field(&mut multipart).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::warn!(%request_id, "Upload without '{IMAGE_FIELD}' field");
            return error_response(StatusCode::BAD_REQUEST, "No image file provided");
        },
        Err(e) => {
            tracing::warn!(%request_id, "Malformed multipart body: {e}");
            return error_response(e.status(), format!("Invalid upload: {}", e.body_text()));
        },
    };

    let classifier = Arc::clone(&state.classifier);
    let span = tracing::debug_span!("classify", %request_id, bytes = bytes.len());
    let outcome =
        tokio::task::spawn_blocking(move || span.in_scope(|| classifier.classify(&bytes))).await;

    match outcome {
        Ok(Ok(prediction)) => (StatusCode::OK, Json(prediction)).into_response(),
        Ok(Err(e)) if e.is_client_error() => {
            tracing::warn!(%request_id, "{e}");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        },
        Ok(Err(e)) => {
            tracing::error!(%request_id, "Classification failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Classification failed")
        },
        Err(e) => {
            tracing::error!(%request_id, "Classification task aborted: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Classification failed")
        },
    }
}

/// Return the first field named `image`, skipping any others.
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<Bytes>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(Some(field.bytes().await?));
        }
    }
    Ok(None)
}

/// Hint response
#[derive(Serialize)]
pub struct HintResponse {
    pub hint: String,
}

/// Hint endpoint; never fails.
///
/// The query is read as raw pairs so a repeated `attempt` key resolves to
/// its first value instead of rejecting the request.
async fn hint(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> impl IntoResponse {
    let pairs = query.map(|Query(pairs)| pairs).unwrap_or_default();
    let attempt = parse_attempt(first_value(&pairs, "attempt"));

    Json(HintResponse {
        hint: state.hints.hint(attempt).to_string(),
    })
}

/// First value of `key` in query order
fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Parse the `attempt` parameter.
///
/// Missing or non-numeric values count as 0. Integers too large for `i64`
/// saturate so they still clamp to the last (or first) hint.
fn parse_attempt(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim) else {
        return 0;
    };
    if let Ok(value) = raw.parse::<i64>() {
        return value;
    }

    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if raw.starts_with('-') {
            i64::MIN
        } else {
            i64::MAX
        }
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attempt() {
        assert_eq!(parse_attempt(None), 0);
        assert_eq!(parse_attempt(Some("")), 0);
        assert_eq!(parse_attempt(Some("2")), 2);
        assert_eq!(parse_attempt(Some(" 1 ")), 1);
        assert_eq!(parse_attempt(Some("-4")), -4);
        assert_eq!(parse_attempt(Some("abc")), 0);
        assert_eq!(parse_attempt(Some("1.5")), 0);
    }

    #[test]
    fn test_first_value_wins() {
        let pairs = vec![
            ("other".to_string(), "9".to_string()),
            ("attempt".to_string(), "1".to_string()),
            ("attempt".to_string(), "2".to_string()),
        ];
        assert_eq!(first_value(&pairs, "attempt"), Some("1"));
        assert_eq!(first_value(&pairs, "missing"), None);
    }

    #[test]
    fn test_parse_attempt_saturates() {
        assert_eq!(parse_attempt(Some("99999999999999999999999")), i64::MAX);
        assert_eq!(parse_attempt(Some("-99999999999999999999999")), i64::MIN);
    }
}
