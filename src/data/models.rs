//! Data models
//!
//! Rust structs representing database entities.

use serde::{Deserialize, Serialize};

// =============================================================================
// User
// =============================================================================

/// A person who signed in through USOS
///
/// `id` is assigned by the database. `usos_id` is the identifier issued by
/// USOS and is unique across all rows once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub usos_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Absent for staff and other non-student accounts
    pub student_number: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Capability of an entity that can be bound to a login session
pub trait AuthenticatedIdentity {
    /// Whether this identity represents a signed-in user
    fn is_authenticated(&self) -> bool;

    /// Value stored in the session to find this identity again
    fn session_id(&self) -> String;
}

impl AuthenticatedIdentity for User {
    fn is_authenticated(&self) -> bool {
        true
    }

    fn session_id(&self) -> String {
        self.id.to_string()
    }
}

/// Fields of a user that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub usos_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub student_number: Option<String>,
}

/// Provider-synchronized user columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    FirstName,
    LastName,
    StudentNumber,
    Email,
}

impl UserField {
    /// Column name in the `users` table
    pub fn column(self) -> &'static str {
        match self {
            UserField::FirstName => "first_name",
            UserField::LastName => "last_name",
            UserField::StudentNumber => "student_number",
            UserField::Email => "email",
        }
    }
}

impl std::fmt::Display for UserField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}
