// ABOUTME: Conversation and message operations: creation, append, activity, soft delete
// ABOUTME: add_message serializes per-conversation writes via a single counter-bump transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_unix, Database, ANONYMOUS_USER_ID};
use crate::errors::{AppError, AppResult};
use crate::llm::MessageRole;

/// Database representation of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Summary produced by the deferred processor
    pub summary: Option<String>,
    /// Number of messages; kept equal to the messages table by `add_message`
    pub message_count: i64,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
    /// Last user-turn activity (UNIX seconds)
    pub updated_at: i64,
    /// Whether the processor has classified this conversation
    pub processed: bool,
    /// Processor verdict; `None` until classified
    pub is_useful: Option<bool>,
    /// Free-text verdict reason
    pub usefulness_reason: Option<String>,
    /// True iff PII was detected and the user declined sharing
    pub global_sharing_blocked: bool,
    /// Soft-delete marker
    pub deleted: bool,
    /// Soft-delete timestamp
    pub deleted_at: Option<i64>,
}

/// Database representation of a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Role of the sender (user or assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
}

fn map_conversation(r: &SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: r.get("id"),
        user_id: r.get("user_id"),
        summary: r.get("summary"),
        message_count: r.get("message_count"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        processed: r.get::<i64, _>("processed") != 0,
        is_useful: r.get::<Option<i64>, _>("is_useful").map(|v| v != 0),
        usefulness_reason: r.get("usefulness_reason"),
        global_sharing_blocked: r.get::<i64, _>("global_sharing_blocked") != 0,
        deleted: r.get::<i64, _>("deleted") != 0,
        deleted_at: r.get("deleted_at"),
    }
}

const CONVERSATION_COLUMNS: &str = "id, user_id, summary, message_count, created_at, updated_at, \
     processed, is_useful, usefulness_reason, global_sharing_blocked, deleted, deleted_at";

impl Database {
    pub(super) async fn migrate_conversations(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                summary TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                is_useful INTEGER,
                usefulness_reason TEXT,
                global_sharing_blocked INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_pending \
             ON conversations(processed, updated_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a new conversation for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create_conversation(&self, user_id: &str) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_unix();

        sqlx::query(
            r"
            INSERT INTO conversations (id, user_id, message_count, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $3)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ConversationRecord {
            id,
            user_id: user_id.to_owned(),
            summary: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
            processed: false,
            is_useful: None,
            usefulness_reason: None,
            global_sharing_blocked: false,
            deleted: false,
            deleted_at: None,
        })
    }

    /// Fetch a conversation by id, including soft-deleted rows. Ownership and
    /// deletion filtering are the caller's concern; user-scoped reads go
    /// through [`Self::get_user_conversation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_conversation(&r)))
    }

    /// Fetch a conversation scoped to its owner; soft-deleted rows are hidden.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_user_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE id = $1 AND user_id = $2 AND deleted = 0"
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_conversation(&r)))
    }

    /// List a user's conversations, most recently active first. Soft-deleted
    /// rows are hidden.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_user_active_conversations(
        &self,
        user_id: &str,
        limit: i64,
    ) -> AppResult<Vec<ConversationRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE user_id = $1 AND deleted = 0 \
             ORDER BY updated_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_conversation).collect())
    }

    /// Bump the conversation's activity timestamp. Only user-turn writes call
    /// this; processor writes deliberately leave `updated_at` untouched so
    /// true inactivity is never masked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn update_conversation_activity(&self, conversation_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(now_unix())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Set the PII-driven global sharing block.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_conversation_global_sharing_blocked(
        &self,
        conversation_id: &str,
        blocked: bool,
    ) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET global_sharing_blocked = $1 WHERE id = $2")
            .bind(i64::from(blocked))
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Check the PII-driven global sharing block.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn is_conversation_global_sharing_blocked(
        &self,
        conversation_id: &str,
    ) -> AppResult<bool> {
        let row =
            sqlx::query("SELECT global_sharing_blocked FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some_and(|r| r.get::<i64, _>("global_sharing_blocked") != 0))
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message.
    ///
    /// Insert, counter bump, and activity bump run in one transaction so a
    /// concurrent second turn on the same conversation observes the first
    /// turn's persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_unix();
        let role_str = role.as_str();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role_str)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            UPDATE conversations
            SET message_count = message_count + 1, updated_at = $1
            WHERE id = $2
            ",
        )
        .bind(now)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role: role_str.to_owned(),
            content: content.to_owned(),
            created_at: now,
        })
    }

    /// Get all messages of a conversation in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MessageRecord {
                id: r.get("id"),
                conversation_id: r.get("conversation_id"),
                role: r.get("role"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ========================================================================
    // Soft Delete
    // ========================================================================

    /// Remove a conversation from the user's view while preserving global
    /// knowledge: verifies ownership, rewrites owned insights to the
    /// anonymous user, deletes conversation-topic links, and marks the row
    /// deleted. Messages and global insight rows stay.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the conversation does not exist, is
    /// already deleted, or is owned by another user.
    pub async fn delete_conversation_from_user_graph(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<()> {
        let owned = self
            .get_user_conversation(conversation_id, user_id)
            .await?
            .is_some();
        if !owned {
            return Err(AppError::not_found("Conversation"));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE insights SET user_id = $1 WHERE conversation_id = $2 AND user_id = $3",
        )
        .bind(ANONYMOUS_USER_ID)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM conversation_topics WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE conversations SET deleted = 1, deleted_at = $1 WHERE id = $2",
        )
        .bind(now_unix())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
