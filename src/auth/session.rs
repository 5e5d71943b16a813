//! Session management
//!
//! Session state lives server-side in [`SessionStore`]. The browser only
//! holds the session ID in an HMAC-signed cookie.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::data::AuthenticatedIdentity;
use crate::error::AppError;
use crate::usos::TokenPair;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Flash message category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Message,
    Error,
}

/// One-shot message shown on the next rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub text: String,
}

/// Per-browser session state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    /// Session ID of the authenticated identity
    pub user_id: Option<String>,
    /// Request token waiting for the provider callback
    pub request_token: Option<TokenPair>,
    /// USOS access token of the signed-in user
    pub usos_token: Option<TokenPair>,
    pub flashes: Vec<Flash>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Nothing worth keeping server-side
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.request_token.is_none()
            && self.usos_token.is_none()
            && self.flashes.is_empty()
    }

    /// Mark `identity` as the authenticated user of this session
    pub fn log_in(&mut self, identity: &impl AuthenticatedIdentity) {
        self.user_id = Some(identity.session_id());
    }

    pub fn log_out(&mut self) {
        self.user_id = None;
    }

    pub fn flash(&mut self, text: impl Into<String>) {
        self.push_flash(FlashLevel::Message, text);
    }

    pub fn flash_error(&mut self, text: impl Into<String>) {
        self.push_flash(FlashLevel::Error, text);
    }

    fn push_flash(&mut self, level: FlashLevel, text: impl Into<String>) {
        self.flashes.push(Flash {
            level,
            text: text.into(),
        });
    }

    /// Remove and return pending flash messages
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }
}

struct StoredSession {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// In-process session storage keyed by random session ID
pub struct SessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(max_age_seconds: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_age: Duration::seconds(max_age_seconds),
        }
    }

    /// Generate a fresh, unguessable session ID
    pub fn generate_id() -> String {
        use base64::{Engine as _, engine::general_purpose};
        use rand::RngCore;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Load session data; expired sessions are dropped
    pub async fn load(&self, id: &str) -> Option<SessionData> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(stored) if stored.expires_at > Utc::now() => {
                    return Some(stored.data.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.sessions.write().await.remove(id);
        None
    }

    /// Store session data and extend its lifetime
    pub async fn save(&self, id: &str, data: SessionData) {
        let stored = StoredSession {
            data,
            expires_at: Utc::now() + self.max_age,
        };
        self.sessions.write().await.insert(id.to_string(), stored);
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Drop expired sessions
    ///
    /// # Returns
    /// Number of sessions removed
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Create a signed session cookie value
///
/// Token format: id.base64(hmac_sha256(id))
pub fn create_session_token(session_id: &str, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};

    let signature = sign(session_id, secret)?;
    Ok(format!(
        "{}.{}",
        session_id,
        general_purpose::URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verify a signed session cookie value
///
/// # Returns
/// The session ID if the signature is valid
///
/// # Errors
/// Returns error if the signature is invalid or the token is malformed
pub fn verify_session_token(token: &str, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let (session_id, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;
    if session_id.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(session_id.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(session_id.to_string())
}

fn sign(session_id: &str, secret: &str) -> Result<Vec<u8>, AppError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(session_id.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
