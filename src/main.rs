//! USOS Login binary entry point

use usos_login::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between sweeps of expired sessions
const SESSION_PURGE_INTERVAL_SECS: u64 = 300;

/// Application entry point
///
/// # Setup
/// 1. Load configuration
/// 2. Initialize tracing/logging (abort if configuration was incomplete)
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start background session cleanup
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let loaded = config::AppConfig::load();

    // 2. Initialize tracing/logging
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    tracing::info!("Starting USOS Login...");

    let config = match loaded {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "Refusing to start");
            return Err(error.into());
        }
    };
    tracing::info!(
        public_url = %config.server.public_url,
        usos = %config.usos.base_url,
        "Configuration loaded"
    );
    if !config.server.uses_https() {
        tracing::warn!(
            public_url = %config.server.public_url,
            "Using insecure session cookies for local development"
        );
    }

    usos_login::metrics::init_metrics();

    // 3. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 4. Build Axum router
    let app = usos_login::build_router(state.clone());

    // 5. Start background tasks
    spawn_session_purge_task(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `logging.level`
fn init_tracing(logging: &config::LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter_directive().into());

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Spawn background task dropping expired sessions
fn spawn_session_purge_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(SESSION_PURGE_INTERVAL_SECS));

        loop {
            interval.tick().await;

            let removed = state.sessions.purge_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "Expired sessions purged");
            }
        }
    });

    tracing::info!("Session purge task spawned");
}
