//! USOS API client
//!
//! Performs the three OAuth1 legs and the signed profile request.
//! Every call is single-attempt and bounded by the configured timeout.

use std::time::{Duration, Instant};

use reqwest::header::AUTHORIZATION;
use url::Url;

use super::oauth1::{ConsumerCredentials, Signer, TokenPair};
use super::profile::{ProfileData, fields_param};
use crate::config::UsosConfig;
use crate::error::{AppError, AuthFailure, FetchFailure};

/// Provider endpoint set, derived from the API base URL
#[derive(Debug, Clone)]
pub struct UsosEndpoints {
    pub request_token: Url,
    pub authorize: Url,
    pub access_token: Url,
    pub user_profile: Url,
}

impl UsosEndpoints {
    pub fn from_base(base_url: &str) -> Result<Self, AppError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid USOS base URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| AppError::Config(format!("invalid USOS endpoint {path}: {e}")))
        };

        Ok(Self {
            request_token: join("services/oauth/request_token")?,
            authorize: join("services/oauth/authorize")?,
            access_token: join("services/oauth/access_token")?,
            user_profile: join("services/users/user")?,
        })
    }
}

/// Client for the USOS OAuth1 endpoints and user API
pub struct UsosClient {
    http: reqwest::Client,
    consumer: ConsumerCredentials,
    endpoints: UsosEndpoints,
    scopes: Vec<String>,
}

impl UsosClient {
    pub fn new(config: &UsosConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("usos-login/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            consumer: ConsumerCredentials {
                key: config.consumer_key.clone(),
                secret: config.consumer_secret.clone(),
            },
            endpoints: UsosEndpoints::from_base(&config.base_url)?,
            scopes: config.scopes.clone(),
        })
    }

    pub fn endpoints(&self) -> &UsosEndpoints {
        &self.endpoints
    }

    /// Obtain a request token bound to `callback_url`
    pub async fn request_token(&self, callback_url: &str) -> Result<TokenPair, AuthFailure> {
        let url = &self.endpoints.request_token;
        let scopes = self.scopes.join("|");
        let form = [("scopes", scopes.as_str())];

        let header = Signer::new(&self.consumer)
            .with_callback(callback_url)
            .authorization_header("POST", url, &form)?;

        let body = self
            .post_form("request_token", url, header, &form)
            .await?;

        parse_token_response(&body).ok_or_else(|| {
            AuthFailure::Handshake("request token response lacks oauth_token".to_string())
        })
    }

    /// Provider page where the user grants consent
    pub fn authorize_url(&self, request_token: &TokenPair) -> Url {
        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("oauth_token", &request_token.token);
        url
    }

    /// Exchange an authorized request token for an access token.
    ///
    /// A response without a token means consent was not granted.
    pub async fn access_token(
        &self,
        request_token: &TokenPair,
        verifier: &str,
    ) -> Result<TokenPair, AuthFailure> {
        let url = &self.endpoints.access_token;
        let header = Signer::new(&self.consumer)
            .with_token(request_token)
            .with_verifier(verifier)
            .authorization_header("POST", url, &[])?;

        let body = self.post_form("access_token", url, header, &[]).await?;

        parse_token_response(&body).ok_or(AuthFailure::Denied)
    }

    /// Signed GET of `services/users/user` with the requested `fields`
    pub async fn fetch_profile(
        &self,
        access_token: &TokenPair,
        fields: &[&str],
    ) -> Result<ProfileData, FetchFailure> {
        let mut url = self.endpoints.user_profile.clone();
        url.query_pairs_mut()
            .append_pair("fields", &fields_param(fields));

        let header = Signer::new(&self.consumer)
            .with_token(access_token)
            .authorization_header("GET", &url, &[])
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        let started = Instant::now();
        let result = self
            .http
            .get(url)
            .header(AUTHORIZATION, header)
            .send()
            .await;
        let response = observe("user_profile", started, result)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchFailure::Malformed(e.to_string()))
    }

    async fn post_form(
        &self,
        endpoint: &'static str,
        url: &Url,
        header: String,
        form: &[(&str, &str)],
    ) -> Result<String, AuthFailure> {
        let started = Instant::now();
        let result = self
            .http
            .post(url.clone())
            .header(AUTHORIZATION, header)
            .form(form)
            .send()
            .await;
        let response = observe(endpoint, started, result)
            .map_err(|e| AuthFailure::Handshake(format!("{endpoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthFailure::Handshake(format!(
                "{endpoint} rejected with HTTP {}",
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AuthFailure::Handshake(format!("{endpoint}: {e}")))
    }
}

fn observe(
    endpoint: &str,
    started: Instant,
    result: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, FetchFailure> {
    let status = match &result {
        Ok(response) => response.status().as_u16().to_string(),
        Err(error) if error.is_timeout() => "timeout".to_string(),
        Err(_) => "error".to_string(),
    };

    crate::metrics::PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status.as_str()])
        .inc();
    crate::metrics::PROVIDER_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(started.elapsed().as_secs_f64());

    result.map_err(|e| {
        tracing::warn!(endpoint, error = %e, "USOS request failed");
        FetchFailure::Transport(e.to_string())
    })
}

/// Parse `oauth_token=...&oauth_token_secret=...`
fn parse_token_response(body: &str) -> Option<TokenPair> {
    let mut token = None;
    let mut secret = None;

    for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
        match key.as_ref() {
            "oauth_token" => token = Some(value.into_owned()),
            "oauth_token_secret" => secret = Some(value.into_owned()),
            _ => {}
        }
    }

    match (token, secret) {
        (Some(token), Some(secret)) if !token.is_empty() => Some(TokenPair { token, secret }),
        _ => None,
    }
}
