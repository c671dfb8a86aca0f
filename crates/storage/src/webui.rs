//! Read-only access to the external UI datastore (`§6`).
//!
//! This is someone else's schema — `user(id, email)`, `group(id, name)`,
//! `group_member(user_id, group_id)` — that the gateway only ever reads
//! from, to resolve group membership for policy override lookup and to
//! list group names for the admin surface.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::StorageError;

#[derive(Clone)]
pub struct WebUiStore {
    pool: PgPool,
}

impl WebUiStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Resolve the group names for a user identified by email or opaque id.
    ///
    /// Failures here are tolerated by callers (`§4.2`) and treated as an
    /// empty group set rather than propagated.
    pub async fn groups_for_user(&self, identifier: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT g.name
            FROM "group" g
            JOIN group_member gm ON gm.group_id = g.id
            JOIN "user" u ON u.id = gm.user_id
            WHERE u.email = $1 OR u.id = $1
            "#,
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn list_group_names(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(r#"SELECT name FROM "group" ORDER BY name ASC"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
