// ABOUTME: Topic upserts, normalized naming, and the co-occurrence reinforcement law
// ABOUTME: Relations are stored directed but reinforced and queried as an undirected graph
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

use super::{now_unix, Database};
use crate::errors::{AppError, AppResult};

/// Strength assigned to a relation on first co-occurrence
pub const DEFAULT_RELATION_STRENGTH: f64 = 0.5;

/// Strength added per subsequent co-occurrence, clamped at 1.0
pub const RELATION_REINFORCEMENT: f64 = 0.1;

/// Database representation of a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    /// Unique topic ID (the stable key; names are presentation-layer)
    pub id: String,
    /// Normalized name: lowercase, hyphen-separated, globally unique
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation timestamp (UNIX seconds)
    pub created_at: i64,
}

/// Database representation of a topic relation edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRelationRecord {
    /// Unique edge ID
    pub id: String,
    /// Source topic
    pub source_topic_id: String,
    /// Target topic
    pub target_topic_id: String,
    /// Edge strength in `[0, 1]`
    pub strength: f64,
    /// Relation kind, `"related"` unless set explicitly
    pub relation_type: String,
}

/// Normalize a raw topic name: lowercase, word runs joined by single
/// hyphens, punctuation other than word characters dropped.
#[must_use]
pub fn normalize_topic_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else if matches!(c, ' ' | '\t' | '\n' | '_' | '-' | '/') {
            pending_separator = true;
        }
        // Other punctuation is dropped without forcing a separator.
    }

    out
}

/// Upsert a topic by normalized name inside an open transaction.
pub(super) async fn upsert_topic_tx(
    conn: &mut SqliteConnection,
    raw_name: &str,
) -> AppResult<TopicRecord> {
    let name = normalize_topic_name(raw_name);
    if name.is_empty() {
        return Err(AppError::invalid_input("Topic name must not be empty"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO topics (id, name, created_at) VALUES ($1, $2, $3)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&name)
    .bind(now_unix())
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query("SELECT id, name, description, created_at FROM topics WHERE name = $1")
        .bind(&name)
        .fetch_one(&mut *conn)
        .await?;

    Ok(TopicRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

/// Reinforce (or create) the undirected relation between two topics inside an
/// open transaction. An existing edge in either direction gains
/// [`RELATION_REINFORCEMENT`] clamped at 1.0; a new edge starts at `initial`.
pub(super) async fn reinforce_relation_tx(
    conn: &mut SqliteConnection,
    topic_a: &str,
    topic_b: &str,
    initial: f64,
) -> AppResult<()> {
    if topic_a == topic_b {
        return Ok(());
    }

    let updated = sqlx::query(
        r"
        UPDATE topic_relations
        SET strength = MIN(1.0, strength + $1)
        WHERE (source_topic_id = $2 AND target_topic_id = $3)
           OR (source_topic_id = $3 AND target_topic_id = $2)
        ",
    )
    .bind(RELATION_REINFORCEMENT)
    .bind(topic_a)
    .bind(topic_b)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        sqlx::query(
            r"
            INSERT INTO topic_relations (id, source_topic_id, target_topic_id, strength, relation_type)
            VALUES ($1, $2, $3, $4, 'related')
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(topic_a)
        .bind(topic_b)
        .bind(initial.clamp(0.0, 1.0))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Link a conversation to topics inside an open transaction, ignoring
/// duplicates.
pub(super) async fn link_conversation_topics_tx(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    topic_ids: &[String],
) -> AppResult<()> {
    for topic_id in topic_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO conversation_topics (conversation_id, topic_id) VALUES ($1, $2)",
        )
        .bind(conversation_id)
        .bind(topic_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

impl Database {
    pub(super) async fn migrate_topics(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS topic_relations (
                id TEXT PRIMARY KEY,
                source_topic_id TEXT NOT NULL REFERENCES topics(id),
                target_topic_id TEXT NOT NULL REFERENCES topics(id),
                strength REAL NOT NULL DEFAULT 0.5,
                relation_type TEXT NOT NULL DEFAULT 'related',
                UNIQUE(source_topic_id, target_topic_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversation_topics (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                topic_id TEXT NOT NULL REFERENCES topics(id),
                PRIMARY KEY (conversation_id, topic_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS insight_topics (
                insight_id TEXT NOT NULL REFERENCES insights(id),
                topic_id TEXT NOT NULL REFERENCES topics(id),
                PRIMARY KEY (insight_id, topic_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_topics_name ON topics(name)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relations_source ON topic_relations(source_topic_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relations_target ON topic_relations(target_topic_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a topic by normalized name. Repeated creation requests resolve
    /// to the same row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for names that normalize to nothing, or a
    /// database error.
    pub async fn get_or_create_topic(&self, raw_name: &str) -> AppResult<TopicRecord> {
        let mut conn = self.pool.acquire().await?;
        upsert_topic_tx(&mut conn, raw_name).await
    }

    /// Fetch a topic by normalized name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_topic_by_name(&self, raw_name: &str) -> AppResult<Option<TopicRecord>> {
        let name = normalize_topic_name(raw_name);
        let row = sqlx::query("SELECT id, name, description, created_at FROM topics WHERE name = $1")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| TopicRecord {
            id: r.get("id"),
            name: r.get("name"),
            description: r.get("description"),
            created_at: r.get("created_at"),
        }))
    }

    /// Reinforce (or create) the relation between two topics by name,
    /// creating the topics if needed. Returns the resulting strength.
    ///
    /// # Errors
    ///
    /// Returns an error if either name is empty or the database fails.
    pub async fn link_topics(
        &self,
        topic_a: &str,
        topic_b: &str,
        initial_strength: Option<f64>,
    ) -> AppResult<f64> {
        let mut tx = self.pool.begin().await?;

        let a = upsert_topic_tx(&mut tx, topic_a).await?;
        let b = upsert_topic_tx(&mut tx, topic_b).await?;
        if a.id == b.id {
            return Err(AppError::invalid_input(
                "Cannot link a topic to itself",
            ));
        }

        reinforce_relation_tx(
            &mut tx,
            &a.id,
            &b.id,
            initial_strength.unwrap_or(DEFAULT_RELATION_STRENGTH),
        )
        .await?;

        let strength: f64 = sqlx::query(
            r"
            SELECT strength FROM topic_relations
            WHERE (source_topic_id = $1 AND target_topic_id = $2)
               OR (source_topic_id = $2 AND target_topic_id = $1)
            ",
        )
        .bind(&a.id)
        .bind(&b.id)
        .fetch_one(&mut *tx)
        .await?
        .get("strength");

        tx.commit().await?;

        Ok(strength)
    }

    /// Link a conversation to topics, ignoring duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn link_conversation_to_topics(
        &self,
        conversation_id: &str,
        topic_ids: &[String],
    ) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        link_conversation_topics_tx(&mut conn, conversation_id, topic_ids).await
    }

    /// All topics the user has engaged with, via the conversation-topic links
    /// of non-deleted conversations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_all_user_topics(&self, user_id: &str) -> AppResult<Vec<TopicRecord>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT t.id, t.name, t.description, t.created_at
            FROM topics t
            JOIN conversation_topics ct ON ct.topic_id = t.id
            JOIN conversations c ON c.id = ct.conversation_id
            WHERE c.user_id = $1 AND c.deleted = 0
            ORDER BY t.name ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TopicRecord {
                id: r.get("id"),
                name: r.get("name"),
                description: r.get("description"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Suggest topics adjacent to the given ones: edge neighbors in either
    /// direction, deduplicated, strongest first, current topics excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_suggested_topics(
        &self,
        current_topics: &[String],
        limit: i64,
    ) -> AppResult<Vec<TopicRecord>> {
        let normalized: Vec<String> = current_topics
            .iter()
            .map(|t| normalize_topic_name(t))
            .filter(|t| !t.is_empty())
            .collect();
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        // Positional `?` placeholders: binds follow textual order.
        let placeholders = placeholder_list(normalized.len());
        let query = format!(
            r"
            WITH current AS (
                SELECT id FROM topics WHERE name IN ({placeholders})
            ),
            neighbors AS (
                SELECT r.target_topic_id AS topic_id, r.strength
                FROM topic_relations r
                WHERE r.source_topic_id IN (SELECT id FROM current)
                UNION ALL
                SELECT r.source_topic_id AS topic_id, r.strength
                FROM topic_relations r
                WHERE r.target_topic_id IN (SELECT id FROM current)
            )
            SELECT t.id, t.name, t.description, t.created_at, MAX(n.strength) AS rank
            FROM neighbors n
            JOIN topics t ON t.id = n.topic_id
            WHERE t.id NOT IN (SELECT id FROM current)
            GROUP BY t.id
            ORDER BY rank DESC, t.name ASC
            LIMIT ?
            "
        );

        let mut q = sqlx::query(&query);
        for name in &normalized {
            q = q.bind(name);
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| TopicRecord {
                id: r.get("id"),
                name: r.get("name"),
                description: r.get("description"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

/// Build a `?, ?, …` positional placeholder list for dynamic IN clauses.
pub(super) fn placeholder_list(count: usize) -> String {
    vec!["?"; count].join(", ")
}
