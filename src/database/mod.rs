// ABOUTME: Core database management with idempotent migrations for the knowledge graph
// ABOUTME: Owns the SQLite pool; per-concern operations live in the sibling modules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Graph Store
//!
//! Ground truth for users, conversations, messages, topics, topic relations,
//! insights, global insights, link tables and the processing log. The store
//! exposes a command surface (`impl Database` methods split by concern), not
//! an ORM: raw SQL, short transactions, conflict-tolerant upserts.
//!
//! Module map:
//! - [`users`]: user rows and the global-sharing consent flag
//! - [`conversations`]: conversations, messages, soft delete
//! - [`topics`]: topic upserts, the co-occurrence reinforcement law, links
//! - [`insights`]: personal insights, global insights, filtered global reads
//! - [`processing`]: idle selection, the promotion transaction, audit log
//! - [`graph_views`]: node/edge aggregates for visualization

pub mod conversations;
pub mod graph_views;
pub mod insights;
pub mod processing;
pub mod topics;
pub mod users;

pub use conversations::{ConversationRecord, MessageRecord};
pub use graph_views::{GraphEdge, GraphNode, GraphStats, KnowledgeMap};
pub use insights::{GlobalInsightRecord, GlobalSummaryRecord, InsightRecord, InsightWithTopics};
pub use processing::{ConversationPromotion, ProcessingLogRecord, ProcessingStats, PromotionOutcome};
pub use topics::{TopicRecord, TopicRelationRecord};
pub use users::UserRecord;

use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};

/// Reserved owner id that soft-deleted conversations' insights are rewritten to
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Handle to the relational store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or any migration fails.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:")
            && !database_url.contains("mode=")
            && !database_url.contains(":memory:")
        {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_owned()
        };

        let pool = SqlitePool::connect(&connection_options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run all migrations. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if any table or index creation fails.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        self.migrate_users().await?;
        self.migrate_conversations().await?;
        self.migrate_topics().await?;
        self.migrate_insights().await?;
        self.migrate_processing().await?;

        Ok(())
    }
}

/// Current wall-clock time as UNIX seconds, the persisted timestamp unit.
#[must_use]
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
