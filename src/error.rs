use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::export::window::Window;

/// Failure of the pluggable transport to produce a response at all.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// Credential acquisition failures. None of these touch the cached credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to fetch token: unauthorized")]
    Unauthorized,

    #[error("failed to fetch token: status {status}")]
    TransientFetch { status: u16 },

    #[error("failed to fetch token: {0}")]
    Malformed(String),

    #[error("failed to fetch token: {0}")]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Owned copy for handing one refresh failure to several callers.
    /// Transport failures keep their message but lose the underlying source.
    pub fn duplicate(&self) -> AuthError {
        match self {
            AuthError::Unauthorized => AuthError::Unauthorized,
            AuthError::TransientFetch { status } => AuthError::TransientFetch { status: *status },
            AuthError::Malformed(msg) => AuthError::Malformed(msg.clone()),
            AuthError::Transport(TransportError::Other(msg)) => {
                AuthError::Transport(TransportError::Other(msg.clone()))
            }
            AuthError::Transport(TransportError::Http(e)) => {
                AuthError::Transport(TransportError::Other(e.to_string()))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("statistics: erroneous status code {status}")]
    Upstream { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("decoding response data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("window {window} source {source_name}: {cause}")]
    Aggregation {
        window: Window,
        source_name: String,
        #[source]
        cause: Box<Error>,
    },
}

impl Error {
    /// Status code of the upstream response behind this error, looking through
    /// aggregation wrappers.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::Aggregation { cause, .. } => cause.upstream_status(),
            _ => None,
        }
    }

    /// Whether a front end should surface this failure to its client rather
    /// than report a generic server-side failure.
    pub fn is_client_visible(&self) -> bool {
        match self {
            Error::Auth(AuthError::Unauthorized) | Error::Validation(_) => true,
            Error::Upstream { status, .. } => (400..500).contains(status),
            Error::Aggregation { cause, .. } => cause.is_client_visible(),
            _ => false,
        }
    }

    fn root(&self) -> &Error {
        match self {
            Error::Aggregation { cause, .. } => cause.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error type of the HTTP front end.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Export(#[from] Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            AppError::Timeout => {
                tracing::warn!("export request timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "request deadline exceeded".to_string(),
                )
            }
            AppError::Export(e) if e.is_client_visible() => {
                let status = match e.root() {
                    Error::Auth(_) => StatusCode::UNAUTHORIZED,
                    Error::Validation(_) => StatusCode::BAD_REQUEST,
                    root => root
                        .upstream_status()
                        .and_then(|s| StatusCode::from_u16(s).ok())
                        .unwrap_or(StatusCode::BAD_REQUEST),
                };
                tracing::warn!(error = %e, status = status.as_u16(), "export rejected");
                (status, e.to_string())
            }
            AppError::Export(e) => {
                tracing::error!(error = %e, "export error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
