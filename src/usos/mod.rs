//! USOS identity provider integration
//!
//! - OAuth 1.0a request signing
//! - Request token, authorization and access token legs
//! - Signed user profile request

mod client;
pub mod oauth1;
mod profile;

pub use client::{UsosClient, UsosEndpoints};
pub use oauth1::{ConsumerCredentials, TokenPair};
pub use profile::{PROFILE_FIELDS, ProfileData, fields_param};
