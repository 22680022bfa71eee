// ABOUTME: The chat turn pipeline: context, completion, persistence, PII gate
// ABOUTME: Streaming bridges the provider chunk stream into a bounded frame channel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Chat Pipeline
//!
//! One turn, end to end. The user message is persisted before the completion
//! is attempted, so history contains every user turn ever sent even when the
//! model call fails. No insight extraction happens here; that is the
//! deferred processor's job.
//!
//! Streaming is a producer/consumer pair: a spawned task feeds frames into a
//! bounded channel, the HTTP layer drains it into SSE records, and a dropped
//! receiver (client abort) cancels the producer at its next send.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::database::{ConversationRecord, Database};
use crate::errors::{AppError, AppResult};
use crate::llm::{ChatMessage, LlmOperations, MessageRole, PiiDetection, QueryClassification};
use crate::vector::VectorIndex;

use super::context::{assemble_context, AssembledContext, RelatedContextItem};

/// Capacity of the stream frame channel; backpressures a fast producer
/// against a slow client.
const STREAM_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Request/Response Types
// ============================================================================

/// One client-side message of the turn's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// `user` or `assistant`
    pub role: String,
    /// Message content
    pub content: String,
}

/// Input to a turn: the full client-side history; only the final element (a
/// user turn) is authoritative for routing and PII analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    /// Opaque client identifier
    pub user_id: String,
    /// Existing conversation, or `None` to start one
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Full client-side history ending in the user turn
    pub messages: Vec<IncomingMessage>,
    /// Consent decision for global sharing when PII is found
    #[serde(default)]
    pub global_sharing_consent: Option<bool>,
}

/// PII detection payload echoed to the client
#[derive(Debug, Clone, Serialize)]
pub struct PiiDetectionPayload {
    /// Whether PII was found
    pub detected: bool,
    /// Categories found
    pub types: Vec<String>,
    /// Model explanation
    pub explanation: String,
}

impl From<PiiDetection> for PiiDetectionPayload {
    fn from(d: PiiDetection) -> Self {
        Self {
            detected: d.contains_pii,
            types: d.pii_types,
            explanation: d.explanation,
        }
    }
}

/// Output of a blocking turn
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    /// Assistant reply
    pub response: String,
    /// Conversation the turn was routed to
    pub conversation_id: String,
    /// Personal-insight evidence used for grounding
    pub related_context: Vec<RelatedContextItem>,
    /// Topic suggestions adjacent to the user's graph
    pub suggested_topics: Vec<String>,
    /// Present when the PII probe ran and found something
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pii_detection: Option<PiiDetectionPayload>,
    /// Whether this conversation is excluded from global propagation
    pub global_sharing_blocked: bool,
}

/// One record of the streaming transport
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// A text chunk
    Text {
        /// Chunk content
        text: String,
        /// Conversation the turn was routed to
        conversation_id: String,
    },
    /// Clean end of stream; the assistant message has been persisted
    Done {
        /// Conversation the turn was routed to
        conversation_id: String,
    },
    /// Mid-stream failure; nothing further follows
    Error {
        /// Failure description
        message: String,
    },
}

impl StreamFrame {
    /// Wire shape of this frame as carried in an SSE `data:` record.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text {
                text,
                conversation_id,
            } => json!({ "text": text, "conversationId": conversation_id }),
            Self::Done { conversation_id } => {
                json!({ "done": true, "conversationId": conversation_id })
            }
            Self::Error { message } => json!({ "error": message }),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The chat turn pipeline
#[derive(Clone)]
pub struct ChatPipeline {
    database: Database,
    llm: LlmOperations,
    vector: Option<VectorIndex>,
}

/// Shared preparation for both completion modes
struct PreparedTurn {
    conversation: ConversationRecord,
    query: String,
    history: Vec<ChatMessage>,
    classification: QueryClassification,
    context: AssembledContext,
}

impl ChatPipeline {
    /// Build a pipeline over the shared singletons.
    #[must_use]
    pub fn new(database: Database, llm: LlmOperations, vector: Option<VectorIndex>) -> Self {
        Self {
            database,
            llm,
            vector,
        }
    }

    /// Handle a blocking turn.
    ///
    /// # Errors
    ///
    /// Returns 400-class errors for malformed input, 404 for unknown or
    /// foreign conversations, and 500-class errors for store or completion
    /// failures. Messages persisted before a failing step remain.
    pub async fn handle_turn(&self, request: ChatTurnRequest) -> AppResult<ChatTurnResponse> {
        let prepared = self.prepare_turn(&request).await?;

        let response_text = self
            .llm
            .chat(
                &prepared.history,
                prepared.context.prompt.as_deref(),
                prepared.classification.suggested_response_length,
            )
            .await?;

        self.database
            .add_message(&prepared.conversation.id, MessageRole::Assistant, &response_text)
            .await?;

        let (pii_detection, global_sharing_blocked) = self
            .run_pii_gate(&prepared, request.global_sharing_consent, &response_text)
            .await?;

        Ok(ChatTurnResponse {
            response: response_text,
            conversation_id: prepared.conversation.id,
            related_context: prepared.context.related,
            suggested_topics: prepared.context.suggested_topics,
            pii_detection,
            global_sharing_blocked,
        })
    }

    /// Handle a streaming turn: returns the frame receiver once the user
    /// message is persisted and the LLM stream is open.
    ///
    /// # Errors
    ///
    /// Same as [`Self::handle_turn`] for everything up to opening the
    /// stream; later failures arrive as an [`StreamFrame::Error`] frame.
    pub async fn handle_turn_stream(
        &self,
        request: ChatTurnRequest,
    ) -> AppResult<mpsc::Receiver<StreamFrame>> {
        let prepared = self.prepare_turn(&request).await?;

        let mut llm_stream = self
            .llm
            .chat_stream(
                &prepared.history,
                prepared.context.prompt.as_deref(),
                prepared.classification.suggested_response_length,
            )
            .await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let pipeline = self.clone();
        let consent = request.global_sharing_consent;

        tokio::spawn(async move {
            let conversation_id = prepared.conversation.id.clone();
            let mut assembled = String::new();

            while let Some(chunk_result) = llm_stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        if !chunk.delta.is_empty() {
                            assembled.push_str(&chunk.delta);
                            let frame = StreamFrame::Text {
                                text: chunk.delta,
                                conversation_id: conversation_id.clone(),
                            };
                            if tx.send(frame).await.is_err() {
                                // Client abort: drop the LLM stream, discard
                                // the partial assistant message.
                                debug!("stream client went away, cancelling turn");
                                return;
                            }
                        }
                        if chunk.is_final {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("mid-stream LLM failure: {e}");
                        let _ = tx
                            .send(StreamFrame::Error {
                                message: "stream failed".to_owned(),
                            })
                            .await;
                        return;
                    }
                }
            }

            // Clean end: persist the concatenated assistant message and bump
            // activity before signalling completion.
            if let Err(e) = pipeline
                .database
                .add_message(&conversation_id, MessageRole::Assistant, &assembled)
                .await
            {
                error!("failed to persist streamed assistant message: {e}");
                let _ = tx
                    .send(StreamFrame::Error {
                        message: "failed to persist response".to_owned(),
                    })
                    .await;
                return;
            }

            // The probe has no frame of its own; it only updates the block
            // flag so a declined consent still protects the conversation.
            if let Err(e) = pipeline.run_pii_gate(&prepared, consent, &assembled).await {
                warn!("post-stream PII gate failed: {e}");
            }

            let _ = tx.send(StreamFrame::Done { conversation_id }).await;
        });

        Ok(rx)
    }

    /// Shared turn preparation: validate input, resolve user and
    /// conversation, persist the user message, classify, assemble context.
    async fn prepare_turn(&self, request: &ChatTurnRequest) -> AppResult<PreparedTurn> {
        if request.user_id.is_empty() {
            return Err(AppError::missing_field("userId"));
        }

        let last = request
            .messages
            .last()
            .ok_or_else(|| AppError::invalid_input("messages must not be empty"))?;
        if last.role != "user" || last.content.trim().is_empty() {
            return Err(AppError::invalid_input(
                "messages must end with a non-empty user turn",
            ));
        }
        let query = last.content.clone();

        self.database.get_or_create_user(&request.user_id).await?;

        let conversation = match &request.conversation_id {
            Some(id) => self
                .database
                .get_user_conversation(id, &request.user_id)
                .await?
                .ok_or_else(|| AppError::not_found("Conversation"))?,
            None => self.database.create_conversation(&request.user_id).await?,
        };

        // Accountability: the user turn is persisted before any model call,
        // so history contains every turn ever sent.
        self.database
            .add_message(&conversation.id, MessageRole::User, &query)
            .await?;

        let classification = self.llm.classify_query(&query).await;
        debug!(
            trivial = classification.is_trivial,
            length = ?classification.suggested_response_length,
            "query classified"
        );

        let context = assemble_context(
            &self.database,
            self.vector.as_ref(),
            &request.user_id,
            &query,
        )
        .await?;

        let history: Vec<ChatMessage> = request
            .messages
            .iter()
            .map(|m| ChatMessage::new(MessageRole::parse(&m.role), m.content.clone()))
            .collect();

        Ok(PreparedTurn {
            conversation,
            query,
            history,
            classification,
            context,
        })
    }

    /// The PII gate. Skipped for trivial queries and already-blocked
    /// conversations. Detection plus a declined consent sets the block flag
    /// atomically; omitted consent just returns the payload for the UI to
    /// follow up on.
    async fn run_pii_gate(
        &self,
        prepared: &PreparedTurn,
        consent: Option<bool>,
        response_text: &str,
    ) -> AppResult<(Option<PiiDetectionPayload>, bool)> {
        if prepared.conversation.global_sharing_blocked {
            return Ok((None, true));
        }
        if prepared.classification.is_trivial {
            return Ok((None, false));
        }

        let detection = self.llm.detect_pii(&prepared.query, response_text).await;
        if !detection.contains_pii {
            return Ok((None, false));
        }

        let mut blocked = false;
        if consent == Some(false) {
            self.database
                .set_conversation_global_sharing_blocked(&prepared.conversation.id, true)
                .await?;
            blocked = true;
        }

        Ok((Some(detection.into()), blocked))
    }
}
