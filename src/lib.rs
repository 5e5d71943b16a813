//! USOS Login - sign in with the university information system
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - Landing page, /authorize, /oauth-authorized, /logout     │
//! │  - Session cookie and flash messages                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Login coordinator (OAuth1 handshake, profile fetch)      │
//! │  - User reconciliation (upsert keyed on USOS ID)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │         Data Layer           │ │       USOS Client          │
//! │  - SQLite (sqlx)             │ │  - HMAC-SHA1 signing       │
//! └──────────────────────────────┘ └────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `auth`: HTTP handlers, sessions, login guard
//! - `service`: Login coordinator and user reconciliation
//! - `usos`: USOS OAuth1 client
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod usos;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request; every component is handed in explicitly
/// rather than reached through globals.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Server-side session storage
    pub sessions: Arc<auth::SessionStore>,

    /// USOS OAuth handshake
    pub login: Arc<service::LoginCoordinator>,

    /// User reconciliation
    pub users: Arc<service::UserService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the USOS client
    /// 3. Wire services and session storage
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.url).await?);
        tracing::info!("Database connected");

        let client = Arc::new(usos::UsosClient::new(&config.usos)?);
        tracing::info!(
            request_token_url = %client.endpoints().request_token,
            "USOS client initialized"
        );

        let login = service::LoginCoordinator::new(client, &config.server.public_url);
        let users = service::UserService::new(db.clone());
        let sessions = auth::SessionStore::new(config.auth.session_max_age);

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            sessions: Arc::new(sessions),
            login: Arc::new(login),
            users: Arc::new(users),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(metrics::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
