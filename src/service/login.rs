//! Login coordinator
//!
//! Drives the USOS OAuth1 handshake for one browser session:
//!
//! 1. `begin_authorization` obtains a request token and returns the
//!    provider's consent URL
//! 2. `complete_authorization` exchanges the verifier for an access token,
//!    keeps it in the session and fetches the user's profile
//!
//! The coordinator never writes to the database.

use std::sync::Arc;

use serde::Deserialize;

use crate::auth::session::SessionData;
use crate::error::{AuthFailure, FetchFailure};
use crate::usos::{PROFILE_FIELDS, ProfileData, UsosClient};

/// Path of the provider callback handler
pub const CALLBACK_PATH: &str = "/oauth-authorized";

/// Query parameters USOS appends to the callback URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub oauth_token: Option<String>,
    pub oauth_verifier: Option<String>,
    /// Post-login destination carried through the handshake
    pub next: Option<String>,
}

pub struct LoginCoordinator {
    client: Arc<UsosClient>,
    public_url: String,
    profile_fields: &'static [&'static str],
}

impl LoginCoordinator {
    pub fn new(client: Arc<UsosClient>, public_url: &str) -> Self {
        Self {
            client,
            public_url: public_url.trim_end_matches('/').to_string(),
            profile_fields: PROFILE_FIELDS,
        }
    }

    /// Absolute callback URL carrying `return_to` as `next`
    pub fn callback_url(&self, return_to: Option<&str>) -> String {
        let mut url = format!("{}{}", self.public_url, CALLBACK_PATH);
        if let Some(next) = return_to.filter(|next| !next.is_empty()) {
            url.push_str("?next=");
            url.push_str(&urlencoding::encode(next));
        }
        url
    }

    /// Start the handshake
    ///
    /// # Returns
    /// Where to redirect the browser: home if the session is already
    /// authenticated, the USOS consent page otherwise
    pub async fn begin_authorization(
        &self,
        session: &mut SessionData,
        return_to: Option<&str>,
    ) -> Result<String, AuthFailure> {
        if session.is_authenticated() {
            return Ok("/".to_string());
        }

        let request_token = self
            .client
            .request_token(&self.callback_url(return_to))
            .await?;
        let authorize_url = self.client.authorize_url(&request_token);
        session.request_token = Some(request_token);

        Ok(authorize_url.into())
    }

    /// Finish the handshake and fetch the user's profile
    ///
    /// # Errors
    /// - `Denied` if the callback carries no verifier or USOS returns no token
    /// - `Handshake` if the callback does not match the pending request token
    /// - `Fetch` if the profile request fails
    pub async fn complete_authorization(
        &self,
        session: &mut SessionData,
        params: &CallbackParams,
    ) -> Result<ProfileData, AuthFailure> {
        let pending = session.request_token.take();

        let Some(verifier) = params.oauth_verifier.as_deref().filter(|v| !v.is_empty()) else {
            return Err(AuthFailure::Denied);
        };

        let request_token = pending.ok_or_else(|| {
            AuthFailure::Handshake("no pending request token in session".to_string())
        })?;

        if let Some(returned) = params.oauth_token.as_deref() {
            if returned != request_token.token {
                return Err(AuthFailure::Handshake(
                    "callback token does not match request token".to_string(),
                ));
            }
        }

        let access_token = self.client.access_token(&request_token, verifier).await?;
        session.usos_token = Some(access_token);

        Ok(self.fetch_profile(session, self.profile_fields).await?)
    }

    /// Signed profile request with the session's access token
    pub async fn fetch_profile(
        &self,
        session: &SessionData,
        fields: &[&str],
    ) -> Result<ProfileData, FetchFailure> {
        let token = session
            .usos_token
            .as_ref()
            .ok_or(FetchFailure::MissingToken)?;

        self.client.fetch_profile(token, fields).await
    }
}
