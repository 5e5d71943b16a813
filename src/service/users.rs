//! User reconciliation service
//!
//! Keeps the local `users` table in step with what USOS asserts about the
//! signed-in person. USOS always wins.

use std::sync::Arc;

use crate::auth::session::SessionData;
use crate::data::{Database, User, UserField};
use crate::error::AppError;
use crate::usos::ProfileData;

/// A stored field overwritten with the provider's value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: UserField,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Result of reconciling one profile
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub user: User,
    pub created: bool,
    /// Applied changes, in check order
    pub changes: Vec<FieldChange>,
}

/// Compare a stored user with provider data.
///
/// Fields are checked in the order first name, last name, student number,
/// email.
pub fn diff_profile(user: &User, profile: &ProfileData) -> Vec<FieldChange> {
    let checks = [
        (
            UserField::FirstName,
            Some(user.first_name.as_str()),
            Some(profile.first_name.as_str()),
        ),
        (
            UserField::LastName,
            Some(user.last_name.as_str()),
            Some(profile.last_name.as_str()),
        ),
        (
            UserField::StudentNumber,
            user.student_number.as_deref(),
            profile.student_number.as_deref(),
        ),
        (
            UserField::Email,
            Some(user.email.as_str()),
            Some(profile.email.as_str()),
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| FieldChange {
            field,
            old: old.map(str::to_string),
            new: new.map(str::to_string),
        })
        .collect()
}

fn apply_change(user: &mut User, change: &FieldChange) {
    let value = change.new.clone();
    match change.field {
        UserField::FirstName => user.first_name = value.unwrap_or_default(),
        UserField::LastName => user.last_name = value.unwrap_or_default(),
        UserField::StudentNumber => user.student_number = value,
        UserField::Email => user.email = value.unwrap_or_default(),
    }
}

/// Sole writer of the `users` table
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create or update the user described by `profile` and bind it to
    /// the session
    pub async fn reconcile(
        &self,
        profile: &ProfileData,
        session: &mut SessionData,
    ) -> Result<Reconciliation, AppError> {
        let outcome = self.sync_profile(profile).await?;
        session.log_in(&outcome.user);
        Ok(outcome)
    }

    /// Upsert keyed on the USOS ID, without touching any session
    pub async fn sync_profile(&self, profile: &ProfileData) -> Result<Reconciliation, AppError> {
        let existing = match self.db.find_user_by_usos_id(profile.id).await? {
            Some(user) => user,
            None => {
                let (user, created) = self.db.insert_user_if_absent(&profile.to_new_user()).await?;
                if created {
                    crate::metrics::USERS_CREATED_TOTAL.inc();
                    tracing::info!(
                        user_id = user.id,
                        usos_id = profile.id,
                        "User created"
                    );
                    return Ok(Reconciliation {
                        user,
                        created: true,
                        changes: Vec::new(),
                    });
                }
                // Another login for the same person inserted first.
                user
            }
        };

        self.update_changed_fields(existing, profile).await
    }

    async fn update_changed_fields(
        &self,
        mut user: User,
        profile: &ProfileData,
    ) -> Result<Reconciliation, AppError> {
        let changes = diff_profile(&user, profile);

        if !changes.is_empty() {
            let updates: Vec<(UserField, Option<&str>)> = changes
                .iter()
                .map(|change| (change.field, change.new.as_deref()))
                .collect();
            self.db.update_user_fields(user.id, &updates).await?;
        }

        for change in &changes {
            tracing::info!(
                user_id = user.id,
                field = %change.field,
                old = ?change.old,
                new = ?change.new,
                "User field changed"
            );
            crate::metrics::USER_FIELD_UPDATES_TOTAL
                .with_label_values(&[change.field.column()])
                .inc();
            apply_change(&mut user, change);
        }

        Ok(Reconciliation {
            user,
            created: false,
            changes,
        })
    }
}
