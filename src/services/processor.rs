// ABOUTME: Deferred conversation processor: idle scan, LLM analysis, graph promotion
// ABOUTME: Runs are single-flight; each conversation is classified exactly once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Deferred Conversation Processor
//!
//! Promotes idle conversations into the knowledge graph off the chat hot
//! path. Three trigger paths (background tick, the HTTP run endpoint, any
//! external scheduler calling that endpoint) converge on [`ConversationProcessor::run`].
//!
//! The `processed` flag makes classification idempotent: once stamped, a
//! conversation is never selected again. That includes promotion failures,
//! which are stamped "Processing error" so bad rows cannot retry-loop.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::database::{ConversationPromotion, ConversationRecord, Database};
use crate::errors::AppResult;
use crate::llm::LlmOperations;
use crate::vector::VectorIndex;

/// Verdict reason stamped on conversations with no messages
const REASON_NO_MESSAGES: &str = "No messages";

/// Verdict reason stamped when promotion fails, blocking retries
const REASON_PROCESSING_ERROR: &str = "Processing error";

/// Fallback verdict reason when the analyser returned none
const REASON_NOT_USEFUL: &str = "Not useful";

/// Outcome for one classified conversation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedConversation {
    /// The conversation
    pub conversation_id: String,
    /// The verdict
    pub is_useful: bool,
    /// Verdict reason
    pub reason: String,
    /// Normalized topic names extracted (empty when not useful)
    pub topics: Vec<String>,
    /// Number of insights created
    pub insights_count: usize,
}

/// Summary of one processor run
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRunResult {
    /// Conversations classified this run
    pub processed: usize,
    /// Useful verdicts
    pub useful: usize,
    /// Not-useful verdicts
    pub not_useful: usize,
    /// Per-conversation outcomes
    pub results: Vec<ProcessedConversation>,
}

/// The deferred processor
pub struct ConversationProcessor {
    database: Database,
    llm: LlmOperations,
    vector: Option<VectorIndex>,
    idle_threshold_secs: i64,
    batch_size: i64,
    run_lock: Arc<Mutex<()>>,
}

impl ConversationProcessor {
    /// Build a processor over the shared singletons.
    #[must_use]
    pub fn new(
        database: Database,
        llm: LlmOperations,
        vector: Option<VectorIndex>,
        idle_threshold_secs: i64,
        batch_size: i64,
    ) -> Self {
        Self {
            database,
            llm,
            vector,
            idle_threshold_secs,
            batch_size,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one pass, waiting for any in-flight run to finish first.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures; per-conversation analysis
    /// failures are absorbed into not-useful verdicts.
    pub async fn run(&self) -> AppResult<ProcessorRunResult> {
        let _guard = self.run_lock.lock().await;
        self.process_batch().await
    }

    /// Run one pass unless another run is already in flight, in which case
    /// `None` is returned and the caller should report the run as busy.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub async fn try_run(&self) -> Option<AppResult<ProcessorRunResult>> {
        match self.run_lock.try_lock() {
            Ok(_guard) => Some(self.process_batch().await),
            Err(_) => None,
        }
    }

    /// Conversations currently eligible for processing.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub async fn pending(&self) -> AppResult<Vec<ConversationRecord>> {
        self.database
            .find_idle_unprocessed(self.idle_threshold_secs, self.batch_size)
            .await
    }

    async fn process_batch(&self) -> AppResult<ProcessorRunResult> {
        let candidates = self
            .database
            .find_idle_unprocessed(self.idle_threshold_secs, self.batch_size)
            .await?;

        let mut summary = ProcessorRunResult::default();

        // Each iteration is a cancellation boundary: a shutdown that aborts
        // the task between conversations leaves every classified row fully
        // committed.
        for conversation in candidates {
            let outcome = self.process_one(&conversation).await?;
            summary.processed += 1;
            if outcome.is_useful {
                summary.useful += 1;
            } else {
                summary.not_useful += 1;
            }
            summary.results.push(outcome);
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                useful = summary.useful,
                "processor run complete"
            );
        }

        Ok(summary)
    }

    async fn process_one(
        &self,
        conversation: &ConversationRecord,
    ) -> AppResult<ProcessedConversation> {
        let messages = self.database.get_messages(&conversation.id).await?;

        if messages.is_empty() {
            self.database
                .mark_conversation_not_useful(
                    &conversation.id,
                    &conversation.user_id,
                    REASON_NO_MESSAGES,
                )
                .await?;
            return Ok(ProcessedConversation {
                conversation_id: conversation.id.clone(),
                is_useful: false,
                reason: REASON_NO_MESSAGES.to_owned(),
                topics: Vec::new(),
                insights_count: 0,
            });
        }

        let transcript: String = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let analysis = self.llm.analyze_conversation(&transcript).await;

        if !analysis.is_useful {
            let reason = if analysis.reason.is_empty() {
                REASON_NOT_USEFUL.to_owned()
            } else {
                analysis.reason
            };
            self.database
                .mark_conversation_not_useful(&conversation.id, &conversation.user_id, &reason)
                .await?;
            return Ok(ProcessedConversation {
                conversation_id: conversation.id.clone(),
                is_useful: false,
                reason,
                topics: Vec::new(),
                insights_count: 0,
            });
        }

        let consent_global = self
            .database
            .get_user(&conversation.user_id)
            .await?
            .is_some_and(|u| u.consent_global);

        let promotion = ConversationPromotion {
            topics: analysis.topics,
            insights: analysis.insights,
            summary: analysis.summary,
            reason: analysis.reason,
        };

        match self
            .database
            .promote_conversation(conversation, &promotion, consent_global)
            .await
        {
            Ok(outcome) => {
                self.mirror_insights_to_vector(conversation, &outcome.insight_ids, &promotion, &outcome.topic_names)
                    .await;
                Ok(ProcessedConversation {
                    conversation_id: conversation.id.clone(),
                    is_useful: true,
                    reason: promotion.reason,
                    topics: outcome.topic_names,
                    insights_count: outcome.insight_ids.len(),
                })
            }
            Err(e) => {
                // Stamp the row so persistently bad data never retry-loops.
                error!("promotion failed for conversation {}: {e}", conversation.id);
                self.database
                    .mark_conversation_not_useful(
                        &conversation.id,
                        &conversation.user_id,
                        REASON_PROCESSING_ERROR,
                    )
                    .await?;
                Ok(ProcessedConversation {
                    conversation_id: conversation.id.clone(),
                    is_useful: false,
                    reason: REASON_PROCESSING_ERROR.to_owned(),
                    topics: Vec::new(),
                    insights_count: 0,
                })
            }
        }
    }

    /// Mirror freshly created insights into the vector index, best effort.
    async fn mirror_insights_to_vector(
        &self,
        conversation: &ConversationRecord,
        insight_ids: &[String],
        promotion: &ConversationPromotion,
        topic_names: &[String],
    ) {
        let Some(vector) = self.vector.as_ref() else {
            return;
        };

        for (insight_id, content) in insight_ids.iter().zip(promotion.insights.iter()) {
            match vector
                .store(insight_id, content, &conversation.user_id, topic_names)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self
                        .database
                        .set_insight_vector_ref(insight_id, Some(insight_id))
                        .await
                    {
                        warn!("failed to record vector ref for insight {insight_id}: {e}");
                    }
                }
                Err(e) => {
                    warn!("vector mirror failed for insight {insight_id}: {e}");
                }
            }
        }
    }
}
