//! OAuth 1.0a request signing (HMAC-SHA1)
//!
//! Builds the `Authorization: OAuth ...` header for requests made to USOS.
//! Query string and form body parameters take part in the signature.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Characters left unescaped by OAuth1 (RFC 5849, section 3.6)
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// Consumer key/secret issued to this application by USOS
#[derive(Clone)]
pub struct ConsumerCredentials {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for ConsumerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerCredentials")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// OAuth token and its secret (request token or access token)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub secret: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Random alphanumeric nonce
pub fn generate_nonce() -> String {
    use rand::{Rng, distributions::Alphanumeric};

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Signs one request on behalf of a consumer and an optional token
#[derive(Debug)]
pub struct Signer<'a> {
    consumer: &'a ConsumerCredentials,
    token: Option<&'a TokenPair>,
    protocol_params: Vec<(&'static str, String)>,
}

impl<'a> Signer<'a> {
    pub fn new(consumer: &'a ConsumerCredentials) -> Self {
        Self {
            consumer,
            token: None,
            protocol_params: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: &'a TokenPair) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_callback(mut self, callback: &str) -> Self {
        self.protocol_params
            .push(("oauth_callback", callback.to_string()));
        self
    }

    pub fn with_verifier(mut self, verifier: &str) -> Self {
        self.protocol_params
            .push(("oauth_verifier", verifier.to_string()));
        self
    }

    /// Build the `Authorization` header with a fresh nonce and timestamp
    pub fn authorization_header(
        &self,
        method: &str,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<String, AppError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, form, &generate_nonce(), &timestamp)
    }

    /// Build the `Authorization` header with a fixed nonce and timestamp
    pub fn authorization_header_with(
        &self,
        method: &str,
        url: &Url,
        form: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, AppError> {
        let mut oauth_params = self.oauth_params(nonce, timestamp);
        let signature = self.signature(method, url, form, &oauth_params)?;
        oauth_params.push(("oauth_signature", signature));

        let fields = oauth_params
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, percent_encode(value)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {fields}"))
    }

    fn oauth_params(&self, nonce: &str, timestamp: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("oauth_consumer_key", self.consumer.key.clone()),
            ("oauth_nonce", nonce.to_string()),
            ("oauth_signature_method", SIGNATURE_METHOD.to_string()),
            ("oauth_timestamp", timestamp.to_string()),
            ("oauth_version", OAUTH_VERSION.to_string()),
        ];
        if let Some(token) = self.token {
            params.push(("oauth_token", token.token.clone()));
        }
        params.extend(self.protocol_params.iter().cloned());
        params
    }

    fn signature(
        &self,
        method: &str,
        url: &Url,
        form: &[(&str, &str)],
        oauth_params: &[(&'static str, String)],
    ) -> Result<String, AppError> {
        use base64::{Engine as _, engine::general_purpose};
        use hmac::{Hmac, Mac};
        use sha1::Sha1;

        let base = signature_base_string(method, url, form, oauth_params);
        let key = format!(
            "{}&{}",
            percent_encode(&self.consumer.secret),
            percent_encode(self.token.map(|t| t.secret.as_str()).unwrap_or(""))
        );

        type HmacSha1 = Hmac<Sha1>;
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        mac.update(base.as_bytes());

        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// Base string URI: scheme, host, non-default port and path, without query
fn base_string_uri(url: &Url) -> String {
    let mut base = format!(
        "{}://{}",
        url.scheme().to_ascii_lowercase(),
        url.host_str().unwrap_or_default().to_ascii_lowercase()
    );
    if let Some(port) = url.port() {
        base.push_str(&format!(":{port}"));
    }
    base.push_str(url.path());
    base
}

pub(crate) fn signature_base_string(
    method: &str,
    url: &Url,
    form: &[(&str, &str)],
    oauth_params: &[(&'static str, String)],
) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .chain(
            form.iter()
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .chain(
            oauth_params
                .iter()
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .collect();
    pairs.sort();

    let normalized = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_string_uri(url)),
        percent_encode(&normalized)
    )
}
