use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to fetch data from TMDB.";

/// Failures surfaced to HTTP clients. Variants carry only what is safe to
/// show a browser; upstream detail is logged where it happens.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("upstream failure: {reason}")]
    UpstreamFailure { reason: String },
    #[error("server with key '{key}' not found")]
    UnknownServer { key: String },
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        window_minutes: u64,
    },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UpstreamFailure { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UnknownServer { .. } | ApiError::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::UpstreamFailure { reason } => (
                status,
                Json(json!({
                    "message": UPSTREAM_FAILURE_MESSAGE,
                    "error": reason,
                })),
            )
                .into_response(),
            ApiError::UnknownServer { key } => (
                status,
                Json(json!({
                    "message": format!("Server with key '{key}' not found."),
                })),
            )
                .into_response(),
            ApiError::RateLimited {
                retry_after_secs,
                window_minutes,
            } => {
                let mut response = (
                    status,
                    Json(json!({
                        "error": format!(
                            "Too many requests from this IP, please try again after {window_minutes} minutes."
                        ),
                        "retry_after": retry_after_secs,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            ApiError::MalformedRequest(message) | ApiError::Internal(message) => {
                (status, Json(json!({ "message": message }))).into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            ApiError::UpstreamFailure {
                reason: "x".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::UnknownServer { key: "x".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MalformedRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 1,
                window_minutes: 15
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = ApiError::RateLimited {
            retry_after_secs: 42,
            window_minutes: 15,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
