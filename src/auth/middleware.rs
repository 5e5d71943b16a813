//! Session extractor and login guard
//!
//! Handlers receive the browser's session through [`SessionContext`] and
//! hand it back with [`SessionContext::persist`] to store changes and set
//! the signed cookie.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use super::session::{
    SESSION_COOKIE, SessionData, SessionStore, create_session_token, verify_session_token,
};
use crate::AppState;
use crate::data::{Database, User};
use crate::error::AppError;

/// Session of the current request
///
/// A request without a valid session cookie gets a fresh, empty session.
/// It is only stored once persisted with something in it.
#[derive(Debug)]
pub struct SessionContext {
    id: String,
    /// Whether `id` is currently held by the store
    stored: bool,
    /// ID replaced by [`SessionContext::rotate`], dropped on persist
    retired: Option<String>,
    pub data: SessionData,
}

impl SessionContext {
    /// Load the authenticated user, if any
    ///
    /// A session pointing at a user that no longer exists is logged out.
    pub async fn current_user(&mut self, db: &Database) -> Result<Option<User>, AppError> {
        let Some(user_id) = self.data.user_id.as_deref() else {
            return Ok(None);
        };

        let user = match user_id.parse::<i64>() {
            Ok(id) => db.get_user(id).await?,
            Err(_) => None,
        };
        if user.is_none() {
            tracing::debug!(user_id, "Session refers to unknown user");
            self.data.log_out();
        }

        Ok(user)
    }

    /// Move the session data to a new ID; the old one is dropped on persist
    pub fn rotate(&mut self) {
        let previous = std::mem::replace(&mut self.id, SessionStore::generate_id());
        if self.stored {
            self.retired = Some(previous);
        }
        self.stored = false;
    }

    /// Store the session and attach its signed cookie to `jar`
    ///
    /// An empty session is not stored; if the browser held one, it is
    /// removed along with the cookie.
    pub async fn persist(self, state: &AppState, jar: CookieJar) -> Result<CookieJar, AppError> {
        if let Some(retired) = &self.retired {
            state.sessions.remove(retired).await;
        }

        if self.data.is_empty() {
            if !self.stored && self.retired.is_none() {
                return Ok(jar);
            }
            state.sessions.remove(&self.id).await;
            return Ok(jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/")));
        }

        let token = create_session_token(&self.id, &state.config.auth.secret_key)?;
        state.sessions.save(&self.id, self.data).await;

        let cookie = Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(state.config.server.uses_https())
            .same_site(SameSite::Lax)
            .build();

        Ok(jar.add(cookie))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let session_id = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| {
                verify_session_token(cookie.value(), &state.config.auth.secret_key).ok()
            });

        if let Some(id) = session_id {
            if let Some(data) = state.sessions.load(&id).await {
                return Ok(Self {
                    id,
                    stored: true,
                    retired: None,
                    data,
                });
            }
        }

        Ok(Self {
            id: SessionStore::generate_id(),
            stored: false,
            retired: None,
            data: SessionData::default(),
        })
    }
}

/// Middleware to require a signed-in user
///
/// Anonymous requests are redirected to the landing page with a notice.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/logout", get(logout))
///     .route_layer(middleware::from_fn_with_state(state, require_login));
/// ```
pub async fn require_login(
    State(state): State<AppState>,
    mut session: SessionContext,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if session.current_user(&state.db).await?.is_some() {
        return Ok(next.run(request).await);
    }

    session
        .data
        .flash_error("Please log in to access this page.");
    let jar = session.persist(&state, jar).await?;

    Ok((jar, Redirect::to("/")).into_response())
}
