// ABOUTME: Processor-side store operations: idle selection, verdict stamping, promotion
// ABOUTME: The useful branch runs in one transaction so retries cannot double-count
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

use super::insights::{insert_insight_tx, link_insight_topics_tx, upsert_global_insight_tx, EXTRACTED_IMPORTANCE};
use super::topics::{
    link_conversation_topics_tx, reinforce_relation_tx, upsert_topic_tx, DEFAULT_RELATION_STRENGTH,
};
use super::{now_unix, ConversationRecord, Database};
use crate::errors::AppResult;

/// Append-only audit row for a processor verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLogRecord {
    /// Row id
    pub id: i64,
    /// Classified conversation
    pub conversation_id: String,
    /// Owning user at classification time
    pub user_id: String,
    /// Verdict timestamp (UNIX seconds)
    pub processed_at: i64,
    /// The verdict
    pub is_useful: bool,
    /// Free-text reason
    pub reason: Option<String>,
    /// JSON-serialized list of extracted topic names
    pub topics_extracted: String,
    /// Number of insights created
    pub insights_count: i64,
}

/// Aggregate processor statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    /// Total verdicts logged
    pub total_processed: i64,
    /// Useful verdicts
    pub useful: i64,
    /// Not-useful verdicts
    pub not_useful: i64,
    /// Conversations not yet classified (any idle state)
    pub pending: i64,
}

/// Extraction results to promote into the graph
#[derive(Debug, Clone)]
pub struct ConversationPromotion {
    /// Raw topic names from the analyser (normalized during promotion)
    pub topics: Vec<String>,
    /// Extracted insight contents
    pub insights: Vec<String>,
    /// Conversation summary
    pub summary: String,
    /// Verdict reason
    pub reason: String,
}

/// What a promotion created
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    /// Upserted topic ids, in extraction order
    pub topic_ids: Vec<String>,
    /// Normalized topic names, parallel to `topic_ids`
    pub topic_names: Vec<String>,
    /// Created insight ids
    pub insight_ids: Vec<String>,
    /// Global insight id when the owner consented
    pub global_insight_id: Option<String>,
}

async fn append_log_tx(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    user_id: &str,
    is_useful: bool,
    reason: &str,
    topics_extracted: &str,
    insights_count: i64,
) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO processing_log
            (conversation_id, user_id, processed_at, is_useful, reason, topics_extracted, insights_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(now_unix())
    .bind(i64::from(is_useful))
    .bind(reason)
    .bind(topics_extracted)
    .bind(insights_count)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn map_log(r: &sqlx::sqlite::SqliteRow) -> ProcessingLogRecord {
    ProcessingLogRecord {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        user_id: r.get("user_id"),
        processed_at: r.get("processed_at"),
        is_useful: r.get::<i64, _>("is_useful") != 0,
        reason: r.get("reason"),
        topics_extracted: r.get("topics_extracted"),
        insights_count: r.get("insights_count"),
    }
}

impl Database {
    pub(super) async fn migrate_processing(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS processing_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                processed_at INTEGER NOT NULL,
                is_useful INTEGER NOT NULL,
                reason TEXT,
                topics_extracted TEXT NOT NULL,
                insights_count INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_processing_log_conversation \
             ON processing_log(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Conversations eligible for processing: unclassified, non-empty, not
    /// deleted, and idle longer than the threshold. Oldest first, bounded so
    /// one run cannot grow unboundedly.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_idle_unprocessed(
        &self,
        idle_threshold_secs: i64,
        limit: i64,
    ) -> AppResult<Vec<ConversationRecord>> {
        let cutoff = now_unix() - idle_threshold_secs;

        let rows = sqlx::query(
            r"
            SELECT id, user_id, summary, message_count, created_at, updated_at,
                   processed, is_useful, usefulness_reason, global_sharing_blocked,
                   deleted, deleted_at
            FROM conversations
            WHERE processed = 0 AND message_count > 0 AND deleted = 0 AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            ",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for r in rows {
            conversations.push(ConversationRecord {
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
            });
        }

        Ok(conversations)
    }

    /// Stamp a not-useful (or failed) verdict and append the audit row.
    ///
    /// The `processed` flag is what makes classification idempotent: a
    /// stamped conversation is never selected again.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn mark_conversation_not_useful(
        &self,
        conversation_id: &str,
        user_id: &str,
        reason: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            UPDATE conversations
            SET processed = 1, is_useful = 0, usefulness_reason = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        append_log_tx(&mut tx, conversation_id, user_id, false, reason, "[]", 0).await?;

        tx.commit().await?;

        Ok(())
    }

    /// Promote a useful conversation into the graph in one transaction:
    /// topic upserts, conversation-topic links, pairwise edge reinforcement,
    /// insight inserts with topic links, the consent-gated global insight,
    /// the verdict stamp, and the audit row. `updated_at` is deliberately
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the transaction rolls back and no
    /// partial state is visible.
    pub async fn promote_conversation(
        &self,
        conversation: &ConversationRecord,
        promotion: &ConversationPromotion,
        consent_global: bool,
    ) -> AppResult<PromotionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Upsert topics; raw names that normalize to the same tag collapse.
        let mut topic_ids = Vec::with_capacity(promotion.topics.len());
        let mut topic_names = Vec::with_capacity(promotion.topics.len());
        for raw in &promotion.topics {
            let topic = upsert_topic_tx(&mut tx, raw).await?;
            if !topic_ids.contains(&topic.id) {
                topic_ids.push(topic.id);
                topic_names.push(topic.name);
            }
        }

        link_conversation_topics_tx(&mut tx, &conversation.id, &topic_ids).await?;

        // Co-occurrence reinforcement over every extracted pair (i < j).
        for i in 0..topic_ids.len() {
            for j in (i + 1)..topic_ids.len() {
                reinforce_relation_tx(
                    &mut tx,
                    &topic_ids[i],
                    &topic_ids[j],
                    DEFAULT_RELATION_STRENGTH,
                )
                .await?;
            }
        }

        let mut insight_ids = Vec::with_capacity(promotion.insights.len());
        for content in &promotion.insights {
            let insight = insert_insight_tx(
                &mut tx,
                &conversation.id,
                &conversation.user_id,
                content,
                EXTRACTED_IMPORTANCE,
            )
            .await?;
            link_insight_topics_tx(&mut tx, &insight.id, &topic_ids).await?;
            insight_ids.push(insight.id);
        }

        let global_insight_id = if consent_global {
            Some(
                upsert_global_insight_tx(
                    &mut tx,
                    &conversation.id,
                    &conversation.user_id,
                    &promotion.summary,
                    &topic_ids.join(","),
                )
                .await?,
            )
        } else {
            None
        };

        sqlx::query(
            r"
            UPDATE conversations
            SET summary = $1, processed = 1, is_useful = 1, usefulness_reason = $2
            WHERE id = $3
            ",
        )
        .bind(&promotion.summary)
        .bind(&promotion.reason)
        .bind(&conversation.id)
        .execute(&mut *tx)
        .await?;

        let topics_json = serde_json::to_string(&topic_names)?;
        append_log_tx(
            &mut tx,
            &conversation.id,
            &conversation.user_id,
            true,
            &promotion.reason,
            &topics_json,
            insight_ids.len() as i64,
        )
        .await?;

        tx.commit().await?;

        Ok(PromotionOutcome {
            topic_ids,
            topic_names,
            insight_ids,
            global_insight_id,
        })
    }

    /// Recent processing-log rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_processing_logs(&self, limit: i64) -> AppResult<Vec<ProcessingLogRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, user_id, processed_at, is_useful, reason,
                   topics_extracted, insights_count
            FROM processing_log
            ORDER BY id DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_log).collect())
    }

    /// Processing-log rows for one conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_processing_logs_for_conversation(
        &self,
        conversation_id: &str,
    ) -> AppResult<Vec<ProcessingLogRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, user_id, processed_at, is_useful, reason,
                   topics_extracted, insights_count
            FROM processing_log
            WHERE conversation_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_log).collect())
    }

    /// Aggregate verdict counts plus the number of unclassified conversations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_processing_stats(&self) -> AppResult<ProcessingStats> {
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM processing_log) AS total_processed,
                (SELECT COUNT(*) FROM processing_log WHERE is_useful = 1) AS useful,
                (SELECT COUNT(*) FROM processing_log WHERE is_useful = 0) AS not_useful,
                (SELECT COUNT(*) FROM conversations
                 WHERE processed = 0 AND message_count > 0 AND deleted = 0) AS pending
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingStats {
            total_processed: row.get("total_processed"),
            useful: row.get("useful"),
            not_useful: row.get("not_useful"),
            pending: row.get("pending"),
        })
    }
}
