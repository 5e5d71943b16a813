//! USOS authentication
//!
//! Handles:
//! - USOS OAuth sign-in flow
//! - Session management and flash messages
//! - Login guard for protected routes

mod middleware;
mod oauth;
pub mod session;

pub use middleware::{SessionContext, require_login};
pub use oauth::auth_router;
pub use session::{SessionData, SessionStore, create_session_token, verify_session_token};
