// ABOUTME: User rows: opaque client identifiers plus the global-sharing consent flag
// ABOUTME: Users are created lazily on first contact; there is no authentication layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{now_unix, Database};
use crate::errors::{AppError, AppResult};

/// Database representation of a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Opaque per-client identifier
    pub id: String,
    /// Whether this user's derived insights may enter the global pool
    pub consent_global: bool,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
}

impl Database {
    pub(super) async fn migrate_users(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                consent_global INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a user, creating the row on first contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_or_create_user(&self, user_id: &str) -> AppResult<UserRecord> {
        if user_id.is_empty() {
            return Err(AppError::missing_field("userId"));
        }

        sqlx::query("INSERT OR IGNORE INTO users (id, consent_global, created_at) VALUES ($1, 0, $2)")
            .bind(user_id)
            .bind(now_unix())
            .execute(&self.pool)
            .await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| AppError::database("User row missing after upsert"))
    }

    /// Fetch a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_user(&self, user_id: &str) -> AppResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, consent_global, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| UserRecord {
            id: r.get("id"),
            consent_global: r.get::<i64, _>("consent_global") != 0,
            created_at: r.get("created_at"),
        }))
    }

    /// Set the global-sharing consent flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_user_consent(&self, user_id: &str, consent_global: bool) -> AppResult<()> {
        sqlx::query("UPDATE users SET consent_global = $1 WHERE id = $2")
            .bind(i64::from(consent_global))
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
