//! Service layer
//!
//! - `login`: USOS OAuth handshake coordination
//! - `users`: user reconciliation with provider data

mod login;
mod users;

pub use login::{CALLBACK_PATH, CallbackParams, LoginCoordinator};
pub use users::{FieldChange, Reconciliation, UserService, diff_profile};
