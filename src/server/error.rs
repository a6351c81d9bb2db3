//! Mapping of [`Pdf2JsonError`] to HTTP responses.

use super::TRACING_TARGET;
use crate::error::Pdf2JsonError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

/// A library error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Pdf2JsonError);

impl From<Pdf2JsonError> for ApiError {
    fn from(e: Pdf2JsonError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let detail = self.0.to_string();

        if status.is_server_error() {
            tracing::error!(target: TRACING_TARGET, kind = kind.as_str(), status = status.as_u16(), "{detail}");
        } else {
            tracing::warn!(target: TRACING_TARGET, kind = kind.as_str(), status = status.as_u16(), "{detail}");
        }

        let body = ErrorBody {
            error: kind.as_str().to_string(),
            detail,
        };
        (status, Json(body)).into_response()
    }
}

/// Handler result.
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Errors raised by the tower middleware around the router.
pub(super) fn middleware_error(err: tower::BoxError, timeout: Duration) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        Pdf2JsonError::RequestTimeout {
            secs: timeout.as_secs(),
        }
        .into()
    } else {
        Pdf2JsonError::Internal(format!("middleware error: {err}")).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn status_follows_kind() {
        let cases = [
            (Pdf2JsonError::MissingInput { hint: "x".into() }, 400),
            (Pdf2JsonError::ShareFileMissing { name: "a.pdf".into() }, 404),
            (
                Pdf2JsonError::ModelAuth {
                    provider: "chat".into(),
                    detail: "expired".into(),
                },
                401,
            ),
            (Pdf2JsonError::SessionUnavailable("none".into()), 503),
            (Pdf2JsonError::RateLimited("slow down".into()), 429),
            (Pdf2JsonError::RequestTimeout { secs: 600 }, 408),
            (
                Pdf2JsonError::DownloadTooLarge {
                    url: "https://x/a.pdf".into(),
                    limit: 10,
                },
                400,
            ),
            (
                Pdf2JsonError::SchemaValidation {
                    attempts: 3,
                    detail: "x".into(),
                },
                500,
            ),
            (
                Pdf2JsonError::FileNotFound {
                    path: PathBuf::from("a.pdf"),
                },
                400,
            ),
        ];
        for (err, status) in cases {
            let resp = ApiError(err).into_response();
            assert_eq!(resp.status().as_u16(), status);
        }
    }
}
