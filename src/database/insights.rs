// ABOUTME: Personal insight and global insight operations with consent/PII-aware reads
// ABOUTME: Global queries exclude blocked conversations and the requesting author
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

use super::topics::placeholder_list;
use super::{now_unix, Database};
use crate::errors::AppResult;

/// Store default importance for an insight when no score is supplied
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Importance assigned to processor-extracted and externally ingested insights
pub const EXTRACTED_IMPORTANCE: f64 = 0.7;

/// Database representation of an insight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRecord {
    /// Unique insight ID
    pub id: String,
    /// Conversation the insight was derived from
    pub conversation_id: String,
    /// Owning user, or `"anonymous"` after soft delete
    pub user_id: String,
    /// Insight content
    pub content: String,
    /// Importance score in `[0, 1]`
    pub importance_score: f64,
    /// Reference to the vector-index row, if mirrored
    pub vector_ref: Option<String>,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
}

/// An insight together with its topic names
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightWithTopics {
    /// The insight row
    #[serde(flatten)]
    pub insight: InsightRecord,
    /// Names of linked topics
    pub topics: Vec<String>,
}

/// Database representation of a shareable, user-consented global insight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalInsightRecord {
    /// Reserved identifier form `global_{conversationId}`
    pub id: String,
    /// Source conversation (denormalized for post-hoc PII filtering)
    pub conversation_id: String,
    /// Authoring user (denormalized to exclude an author from their own feed)
    pub user_id: String,
    /// Shared content (the conversation summary)
    pub content: String,
    /// Comma-joined topic identifiers
    pub topic_ids: String,
    /// Times this insight was served as context
    pub use_count: i64,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
}

/// A conversation summary exposed to the global pool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummaryRecord {
    /// Source conversation
    pub conversation_id: String,
    /// Authoring user
    pub user_id: String,
    /// Processor-produced summary
    pub summary: String,
    /// Last activity of the source conversation (UNIX seconds)
    pub updated_at: i64,
}

/// Insert an insight inside an open transaction.
pub(super) async fn insert_insight_tx(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    user_id: &str,
    content: &str,
    importance_score: f64,
) -> AppResult<InsightRecord> {
    let id = Uuid::new_v4().to_string();
    let now = now_unix();

    sqlx::query(
        r"
        INSERT INTO insights (id, conversation_id, user_id, content, importance_score, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(&id)
    .bind(conversation_id)
    .bind(user_id)
    .bind(content)
    .bind(importance_score)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(InsightRecord {
        id,
        conversation_id: conversation_id.to_owned(),
        user_id: user_id.to_owned(),
        content: content.to_owned(),
        importance_score,
        vector_ref: None,
        created_at: now,
    })
}

/// Link an insight to topics inside an open transaction, ignoring duplicates.
pub(super) async fn link_insight_topics_tx(
    conn: &mut SqliteConnection,
    insight_id: &str,
    topic_ids: &[String],
) -> AppResult<()> {
    for topic_id in topic_ids {
        sqlx::query("INSERT OR IGNORE INTO insight_topics (insight_id, topic_id) VALUES ($1, $2)")
            .bind(insight_id)
            .bind(topic_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Upsert the global insight derived from a conversation inside an open
/// transaction. The identifier is the reserved `global_{conversationId}`
/// form, so a reprocessed conversation overwrites rather than duplicates.
pub(super) async fn upsert_global_insight_tx(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    user_id: &str,
    content: &str,
    topic_ids: &str,
) -> AppResult<String> {
    let id = format!("global_{conversation_id}");

    sqlx::query(
        r"
        INSERT INTO global_insights (id, conversation_id, user_id, content, topic_ids, use_count, created_at)
        VALUES ($1, $2, $3, $4, $5, 0, $6)
        ON CONFLICT(id) DO UPDATE SET content = excluded.content, topic_ids = excluded.topic_ids
        ",
    )
    .bind(&id)
    .bind(conversation_id)
    .bind(user_id)
    .bind(content)
    .bind(topic_ids)
    .bind(now_unix())
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

fn map_insight(r: &sqlx::sqlite::SqliteRow) -> InsightRecord {
    InsightRecord {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        user_id: r.get("user_id"),
        content: r.get("content"),
        importance_score: r.get("importance_score"),
        vector_ref: r.get("vector_ref"),
        created_at: r.get("created_at"),
    }
}

fn split_topics(joined: Option<String>) -> Vec<String> {
    joined
        .unwrap_or_default()
        .split(',')
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

const INSIGHT_WITH_TOPICS_SELECT: &str = r"
    SELECT i.id, i.conversation_id, i.user_id, i.content, i.importance_score,
           i.vector_ref, i.created_at,
           (SELECT GROUP_CONCAT(t.name)
            FROM insight_topics it JOIN topics t ON t.id = it.topic_id
            WHERE it.insight_id = i.id) AS topic_names
    FROM insights i
";

impl Database {
    pub(super) async fn migrate_insights(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS insights (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                importance_score REAL NOT NULL DEFAULT 0.5,
                vector_ref TEXT,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS global_insights (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                topic_ids TEXT NOT NULL,
                use_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_user ON insights(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_insights_conversation ON insights(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an insight.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn save_insight(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        importance_score: f64,
    ) -> AppResult<InsightRecord> {
        let mut conn = self.pool.acquire().await?;
        insert_insight_tx(&mut conn, conversation_id, user_id, content, importance_score).await
    }

    /// Link an insight to topics, ignoring duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn link_insight_to_topics(
        &self,
        insight_id: &str,
        topic_ids: &[String],
    ) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        link_insight_topics_tx(&mut conn, insight_id, topic_ids).await
    }

    /// Fetch an insight by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_insight(&self, insight_id: &str) -> AppResult<Option<InsightRecord>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, user_id, content, importance_score, vector_ref, created_at \
             FROM insights WHERE id = $1",
        )
        .bind(insight_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_insight(&r)))
    }

    /// Record (or clear) the vector-index reference of an insight.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_insight_vector_ref(
        &self,
        insight_id: &str,
        vector_ref: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE insights SET vector_ref = $1 WHERE id = $2")
            .bind(vector_ref)
            .bind(insight_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Most recent insights owned by a user, each with its topic names.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_recent_user_insights(
        &self,
        user_id: &str,
        limit: i64,
    ) -> AppResult<Vec<InsightWithTopics>> {
        let rows = sqlx::query(&format!(
            "{INSIGHT_WITH_TOPICS_SELECT} WHERE i.user_id = $1 \
             ORDER BY i.created_at DESC, i.rowid DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let topics = split_topics(r.get("topic_names"));
                InsightWithTopics {
                    insight: map_insight(&r),
                    topics,
                }
            })
            .collect())
    }

    /// Insights linked to any of the given topic ids, across users.
    ///
    /// Rows from blocked conversations are excluded unless the requesting
    /// user owns them; their own material is never hidden from them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_related_insights(
        &self,
        user_id: &str,
        topic_ids: &[String],
        limit: i64,
    ) -> AppResult<Vec<InsightWithTopics>> {
        if topic_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Positional `?` placeholders: binds follow textual order.
        let placeholders = placeholder_list(topic_ids.len());
        let query = format!(
            "{INSIGHT_WITH_TOPICS_SELECT}
             JOIN conversations c ON c.id = i.conversation_id
             WHERE (c.global_sharing_blocked = 0 OR i.user_id = ?)
               AND i.id IN (
                   SELECT insight_id FROM insight_topics WHERE topic_id IN ({placeholders})
               )
             ORDER BY i.importance_score DESC, i.created_at DESC
             LIMIT ?"
        );

        let mut q = sqlx::query(&query).bind(user_id);
        for topic_id in topic_ids {
            q = q.bind(topic_id);
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let topics = split_topics(r.get("topic_names"));
                InsightWithTopics {
                    insight: map_insight(&r),
                    topics,
                }
            })
            .collect())
    }

    /// Recent global insights, excluding rows authored by `exclude_user` and
    /// rows derived from conversations whose global sharing is blocked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_global_insights(
        &self,
        exclude_user: Option<&str>,
        limit: i64,
    ) -> AppResult<Vec<GlobalInsightRecord>> {
        let rows = sqlx::query(
            r"
            SELECT gi.id, gi.conversation_id, gi.user_id, gi.content, gi.topic_ids,
                   gi.use_count, gi.created_at
            FROM global_insights gi
            JOIN conversations c ON c.id = gi.conversation_id
            WHERE c.global_sharing_blocked = 0
              AND ($1 IS NULL OR gi.user_id != $1)
            ORDER BY gi.created_at DESC, gi.rowid DESC
            LIMIT $2
            ",
        )
        .bind(exclude_user)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GlobalInsightRecord {
                id: r.get("id"),
                conversation_id: r.get("conversation_id"),
                user_id: r.get("user_id"),
                content: r.get("content"),
                topic_ids: r.get("topic_ids"),
                use_count: r.get("use_count"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Recent global conversation summaries with the same exclusions as
    /// [`Self::get_global_insights`]; soft-deleted conversations are also
    /// excluded (their knowledge survives through the global insight rows).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_global_conversation_summaries(
        &self,
        exclude_user: Option<&str>,
        limit: i64,
    ) -> AppResult<Vec<GlobalSummaryRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, summary, updated_at
            FROM conversations
            WHERE summary IS NOT NULL
              AND global_sharing_blocked = 0
              AND deleted = 0
              AND ($1 IS NULL OR user_id != $1)
            ORDER BY updated_at DESC
            LIMIT $2
            ",
        )
        .bind(exclude_user)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GlobalSummaryRecord {
                conversation_id: r.get("id"),
                user_id: r.get("user_id"),
                summary: r.get("summary"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Bump the use counter of global insights served as context.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn increment_global_insight_use(&self, ids: &[String]) -> AppResult<()> {
        for id in ids {
            sqlx::query("UPDATE global_insights SET use_count = use_count + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Number of insights owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn count_user_insights(&self, user_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM insights WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("n"))
    }
}
