//! SQLite database operations
//!
//! All database access goes through this module.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Instant;

use super::models::*;
use crate::error::AppError;

const USER_COLUMNS: &str = "id, usos_id, first_name, last_name, email, student_number";

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

fn observe_query(operation: &str, started: Instant) {
    crate::metrics::DB_QUERIES_TOTAL
        .with_label_values(&[operation, "users"])
        .inc();
    crate::metrics::DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, "users"])
        .observe(started.elapsed().as_secs_f64());
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `url` - sqlx connection string (e.g. `sqlite:usos.db`)
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty schema.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Get a user by surrogate ID
    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let started = Instant::now();
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        observe_query("select", started);

        Ok(user)
    }

    /// Get a user by USOS identifier
    pub async fn find_user_by_usos_id(&self, usos_id: i64) -> Result<Option<User>, AppError> {
        let started = Instant::now();
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE usos_id = ?"
        ))
        .bind(usos_id)
        .fetch_optional(&self.pool)
        .await?;
        observe_query("select", started);

        Ok(user)
    }

    /// Insert a user unless one with the same USOS identifier exists.
    ///
    /// The unique index on `usos_id` decides the race between concurrent
    /// first logins; the loser reads back the winner's row.
    ///
    /// # Returns
    /// The stored user and `true` if this call created it.
    pub async fn insert_user_if_absent(&self, user: &NewUser) -> Result<(User, bool), AppError> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (usos_id, first_name, last_name, email, student_number)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(usos_id) DO NOTHING
            "#,
        )
        .bind(user.usos_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.student_number)
        .execute(&self.pool)
        .await?;
        observe_query("insert", started);

        let created = result.rows_affected() == 1;
        let stored = self
            .find_user_by_usos_id(user.usos_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "user with usos_id {} vanished after insert",
                    user.usos_id
                ))
            })?;

        Ok((stored, created))
    }

    /// Overwrite provider-synchronized columns of one user.
    ///
    /// Updates are applied one statement per field, in the given order,
    /// inside a single transaction.
    pub async fn update_user_fields(
        &self,
        id: i64,
        changes: &[(UserField, Option<&str>)],
    ) -> Result<(), AppError> {
        if changes.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        for (field, value) in changes {
            let sql = format!("UPDATE users SET {} = ? WHERE id = ?", field.column());
            let result = sqlx::query(&sql)
                .bind(*value)
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound);
            }
        }

        tx.commit().await?;
        observe_query("update", started);

        Ok(())
    }

    /// Count stored users
    pub async fn count_users(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
