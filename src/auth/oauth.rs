//! Sign-in with USOS
//!
//! Routes:
//! - GET / - Landing page
//! - GET /authorize - Start the OAuth1 handshake
//! - GET /oauth-authorized - Provider callback
//! - GET /logout - End the session (requires login)
//!
//! Handshake failures never surface as error pages: they become flash
//! messages and the browser goes back to where it came from.

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, header::REFERER},
    middleware,
    response::{Html, IntoResponse, Redirect},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::middleware::{SessionContext, require_login};
use super::session::{Flash, FlashLevel};
use crate::AppState;
use crate::data::User;
use crate::error::{AppError, AuthFailure};
use crate::service::{CALLBACK_PATH, CallbackParams};

/// Create authentication router
pub fn auth_router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/logout", get(logout))
        .route_layer(middleware::from_fn_with_state(state, require_login));

    Router::new()
        .route("/", get(index))
        .route("/authorize", get(authorize))
        .route(CALLBACK_PATH, get(oauth_authorized))
        .merge(protected)
}

// =============================================================================
// Landing Page
// =============================================================================

/// GET /
///
/// Shows pending flash messages and the signed-in user, or a sign-in link.
async fn index(
    State(state): State<AppState>,
    mut session: SessionContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let user = session.current_user(&state.db).await?;
    let flashes = session.data.take_flashes();
    let jar = session.persist(&state, jar).await?;

    Ok((jar, Html(render_index(user.as_ref(), &flashes))))
}

fn render_index(user: Option<&User>, flashes: &[Flash]) -> String {
    use html_escape::encode_text;

    let messages: String = flashes
        .iter()
        .map(|flash| {
            let class = match flash.level {
                FlashLevel::Message => "message",
                FlashLevel::Error => "error",
            };
            format!(
                "<li class=\"{}\">{}</li>",
                class,
                encode_text(&flash.text)
            )
        })
        .collect();

    let body = match user {
        Some(user) => format!(
            "<p>Signed in as {} ({})</p>\n<p>Student number: {}</p>\n<a href=\"/logout\">Log out</a>",
            encode_text(&user.display_name()),
            encode_text(&user.email),
            encode_text(user.student_number.as_deref().unwrap_or("-")),
        ),
        None => "<a href=\"/authorize\">Sign in with USOS</a>".to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>USOS Login</title></head>
<body>
<h1>USOS Login</h1>
<ul class="flashes">{messages}</ul>
{body}
</body>
</html>
"#
    )
}

// =============================================================================
// USOS OAuth
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    next: Option<String>,
}

/// GET /authorize
///
/// Redirects to the USOS consent page. The post-login destination is the
/// `next` parameter, else the referring page.
async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
    mut session: SessionContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let requested = query
        .next
        .filter(|next| !next.is_empty())
        .or_else(|| {
            headers
                .get(REFERER)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        });
    let return_to = safe_redirect_target(requested.as_deref(), state.config.server.base_url());

    let location = match state
        .login
        .begin_authorization(&mut session.data, Some(return_to.as_str()))
        .await
    {
        Ok(location) => location,
        Err(error) => {
            tracing::warn!(%error, "Could not start USOS authorization");
            session
                .data
                .flash_error("Could not connect to USOS. Please try again later.");
            return_to
        }
    };

    let jar = session.persist(&state, jar).await?;
    Ok((jar, Redirect::to(&location)))
}

/// GET /oauth-authorized
///
/// # Steps
/// 1. Exchange the verifier for an access token
/// 2. Fetch the user's profile from USOS
/// 3. Create or update the local user
/// 4. Mark the session authenticated under a new session ID
/// 5. Redirect to `next`
async fn oauth_authorized(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    mut session: SessionContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let next = safe_redirect_target(params.next.as_deref(), state.config.server.base_url());

    let outcome = match state
        .login
        .complete_authorization(&mut session.data, &params)
        .await
    {
        Ok(profile) => {
            tracing::debug!(?profile, "Fetched USOS profile");
            state
                .users
                .reconcile(&profile, &mut session.data)
                .await
                .map_err(AuthFailure::from)
        }
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(reconciled) => {
            crate::metrics::LOGINS_TOTAL
                .with_label_values(&["success"])
                .inc();
            tracing::info!(
                user_id = reconciled.user.id,
                created = reconciled.created,
                changed_fields = reconciled.changes.len(),
                "User signed in"
            );
            session.rotate();
            session.data.flash(format!(
                "You were signed in as {}",
                reconciled.user.display_name()
            ));
        }
        Err(failure) => {
            crate::metrics::LOGINS_TOTAL
                .with_label_values(&[failure.kind()])
                .inc();
            match &failure {
                AuthFailure::Denied => {
                    tracing::info!("User denied the USOS sign-in request");
                    session.data.flash("You denied the request to sign in.");
                }
                AuthFailure::Fetch(error) => {
                    tracing::warn!(%error, "Could not get USOS user data");
                    session.data.flash_error("Could not get user data!");
                }
                AuthFailure::Handshake(error) => {
                    tracing::warn!(%error, "USOS handshake failed");
                    session.data.flash_error("Could not sign in with USOS.");
                }
                AuthFailure::App(error) => {
                    tracing::error!(%error, "Sign-in failed");
                    session.data.flash_error("Could not sign in with USOS.");
                }
            }
        }
    }

    let jar = session.persist(&state, jar).await?;
    Ok((jar, Redirect::to(&next)))
}

// =============================================================================
// Logout
// =============================================================================

/// GET /logout
///
/// Drops the USOS token, ends the authentication and redirects home.
async fn logout(
    State(state): State<AppState>,
    mut session: SessionContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    session.data.usos_token = None;
    session.data.log_out();
    session.data.flash("You have been logged out.");

    let jar = session.persist(&state, jar).await?;
    Ok((jar, Redirect::to("/")))
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve a post-login target against `base_url`.
///
/// Only targets on the same origin survive; the result is re-serialized so
/// it is always a valid `Location` value. Anything else falls back to the
/// landing page.
fn safe_redirect_target(next: Option<&str>, base_url: &str) -> String {
    const HOME: &str = "/";

    let Some(next) = next.map(str::trim).filter(|next| !next.is_empty()) else {
        return HOME.to_string();
    };

    // Browsers drop tabs and newlines inside URLs, so "/\t/host" would
    // become protocol-relative.
    if next.chars().any(|c| c.is_control() || c == '\\') {
        return HOME.to_string();
    }

    let Ok(base) = url::Url::parse(&format!("{base_url}/")) else {
        return HOME.to_string();
    };

    if next.starts_with('/') {
        return match base.join(next) {
            Ok(target) if target.origin() == base.origin() => {
                let mut relative = target.path().to_string();
                if let Some(query) = target.query() {
                    relative.push('?');
                    relative.push_str(query);
                }
                if let Some(fragment) = target.fragment() {
                    relative.push('#');
                    relative.push_str(fragment);
                }
                relative
            }
            _ => HOME.to_string(),
        };
    }

    match url::Url::parse(next) {
        Ok(target) if target.origin() == base.origin() => target.to_string(),
        _ => HOME.to_string(),
    }
}
