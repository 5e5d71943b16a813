//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override), including a `.env` file

use serde::Deserialize;

use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub usos: UsosConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 5000)
    pub port: u16,
    /// Externally visible URL (e.g., "https://login.example.edu")
    pub public_url: String,
}

impl ServerConfig {
    /// Public URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Whether session cookies should carry the `Secure` attribute
    pub fn uses_https(&self) -> bool {
        self.public_url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. "sqlite:usos.db?mode=rwc"
    #[serde(default)]
    pub url: String,
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret key used to sign session cookies (32+ bytes)
    #[serde(default)]
    pub secret_key: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// USOS provider integration
#[derive(Debug, Clone, Deserialize)]
pub struct UsosConfig {
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    /// API base URL; OAuth endpoints are derived from it
    pub base_url: String,
    /// Request token scopes
    pub scopes: Vec<String>,
    /// Timeout applied to every provider call
    pub timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        format!(
            "usos_login={},tower_http=debug",
            self.level.trim().to_ascii_lowercase()
        )
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (USOS_LOGIN__*)
    /// 5. Legacy deployment variables (APP_SECRET_KEY, SQLALCHEMY_DATABASE_URI,
    ///    USOS_CUSTOMER_KEY, USOS_CUSTOMER_SECRET)
    ///
    /// # Errors
    /// Returns `ConfigMissing` if a required value is absent, `Config` if
    /// any other value is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        if let Err(error) = dotenv::dotenv() {
            tracing::debug!(%error, "No .env file loaded");
        }

        let legacy = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5000)?
            .set_default("server.public_url", "http://localhost:5000")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("usos.base_url", "https://apps.usos.pw.edu.pl/")?
            .set_default("usos.scopes", vec!["email", "studies"])?
            .set_default("usos.timeout_seconds", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("USOS_LOGIN")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("usos.scopes")
                    .try_parsing(true),
            )
            .set_override_option("auth.secret_key", legacy("APP_SECRET_KEY"))?
            .set_override_option(
                "database.url",
                legacy("SQLALCHEMY_DATABASE_URI").map(|uri| sqlalchemy_to_sqlx_url(&uri)),
            )?
            .set_override_option("usos.consumer_key", legacy("USOS_CUSTOMER_KEY"))?
            .set_override_option("usos.consumer_secret", legacy("USOS_CUSTOMER_SECRET"))?
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), AppError> {
        const MIN_SECRET_KEY_BYTES: usize = 32;

        let required = [
            ("auth.secret_key", &self.auth.secret_key),
            ("database.url", &self.database.url),
            ("usos.consumer_key", &self.usos.consumer_key),
            ("usos.consumer_secret", &self.usos.consumer_secret),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::ConfigMissing(name.to_string()));
            }
        }

        if self.auth.secret_key.len() < MIN_SECRET_KEY_BYTES {
            return Err(AppError::Config(format!(
                "auth.secret_key must be at least {} bytes",
                MIN_SECRET_KEY_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.usos.timeout_seconds == 0 {
            return Err(AppError::Config(
                "usos.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        url::Url::parse(&self.usos.base_url)
            .map_err(|e| AppError::Config(format!("usos.base_url is not a valid URL: {e}")))?;
        url::Url::parse(&self.server.public_url)
            .map_err(|e| AppError::Config(format!("server.public_url is not a valid URL: {e}")))?;

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        let level = self.logging.level.trim().to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(AppError::Config(format!(
                "logging.level must be one of {}",
                LEVELS.join(", ")
            )));
        }
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "pretty" | "json") {
            return Err(AppError::Config(
                "logging.format must be \"pretty\" or \"json\"".to_string(),
            ));
        }

        Ok(())
    }
}

/// Rewrite a SQLAlchemy SQLite URL into the sqlx form
///
/// `sqlite:///app.db` is relative and `sqlite:////var/app.db` absolute in
/// SQLAlchemy, while sqlx reads everything after `sqlite://` as the path.
/// Driver query options are dropped. Other values pass through untouched.
pub(crate) fn sqlalchemy_to_sqlx_url(uri: &str) -> String {
    let uri = uri.trim();
    let Some(rest) = uri.strip_prefix("sqlite://") else {
        return uri.to_string();
    };

    let path = rest.split('?').next().unwrap_or_default();
    match path.strip_prefix('/').unwrap_or(path) {
        "" => "sqlite::memory:".to_string(),
        path => format!("sqlite:{path}"),
    }
}
