use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by credential management and refresh coordination.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid authorization header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("upstream error {status}")]
    Upstream {
        status: StatusCode,
        code: Option<String>,
        body: String,
    },
    #[error("refresh endpoint error {status}: {body}")]
    Exchange { status: StatusCode, body: String },
    #[error("refresh exchange returned an empty access token")]
    EmptyExchangeToken,
    #[error("token refresh unavailable")]
    RefreshUnavailable,
    #[error("token refresh failed: {0}")]
    RefreshFailed(Arc<AuthError>),
    #[error("refresh exchange terminated without settling")]
    RefreshInterrupted,
}
