//! Error types for USOS Login
//!
//! Application errors are converted to `AppError`, which implements
//! `IntoResponse` for proper HTTP error responses.
//!
//! Failures of the OAuth handshake with USOS are modelled separately by
//! [`AuthFailure`]: they never become HTTP errors, the login handlers turn
//! them into flash messages and a redirect.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required configuration value is absent. Fatal at startup.
    #[error("Missing required configuration: {0}")]
    ConfigMissing(String),

    /// Signing error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string(), "http_client"),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::ConfigMissing(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.to_string(),
                "config_missing",
            ),
            AppError::Encryption(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "encryption")
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Profile retrieval failed
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Provider answered with a non-success HTTP status
    #[error("provider returned HTTP {0}")]
    Status(u16),

    /// Network error or timeout
    #[error("provider request failed: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// Session holds no USOS access token
    #[error("no USOS access token in session")]
    MissingToken,
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchFailure::Status(status.as_u16())
        } else if err.is_decode() {
            FetchFailure::Malformed(err.to_string())
        } else {
            FetchFailure::Transport(err.to_string())
        }
    }
}

/// Login attempt aborted somewhere in the OAuth exchange
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// The user declined consent at the provider
    #[error("authorization was denied")]
    Denied,

    /// Request-token or access-token exchange failed
    #[error("OAuth handshake failed: {0}")]
    Handshake(String),

    /// Authenticated profile request failed
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    /// Local failure while storing the user or session
    #[error(transparent)]
    App(#[from] AppError),
}

impl AuthFailure {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthFailure::Denied => "denied",
            AuthFailure::Handshake(_) => "handshake",
            AuthFailure::Fetch(_) => "fetch",
            AuthFailure::App(_) => "internal",
        }
    }
}
