// ABOUTME: Chat route handlers: blocking send, SSE streaming, consent, history, delete
// ABOUTME: Transport only; turn semantics live in the chat pipeline service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! Chat routes.
//!
//! `/api/chat/stream` frames the pipeline's channel as server-sent events:
//! `data: {"text", "conversationId"}` per chunk, a final
//! `data: {"done": true, "conversationId"}`, or `data: {"error"}` on a
//! mid-stream failure.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::resources::ServerResources;
use crate::services::chat::ChatTurnRequest;
use crate::services::context::assemble_context;

use super::no_store_json;

/// Default number of conversations returned by the history endpoint
const DEFAULT_HISTORY_LIMIT: i64 = 20;

// ============================================================================
// Request Types
// ============================================================================

/// Body of the PII consent follow-up call
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiConsentRequest {
    /// Conversation the consent decision applies to
    pub conversation_id: String,
    /// `false` blocks the conversation from global propagation
    pub consent: bool,
}

/// Body of the conversation delete call
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConversationRequest {
    /// Requesting user; must own the conversation
    pub user_id: String,
}

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    /// Maximum conversations to return
    pub limit: Option<i64>,
}

/// Query parameters for the debug context endpoint
#[derive(Debug, Deserialize, Default)]
pub struct ContextQuery {
    /// Query text used for the vector shortlist
    pub q: Option<String>,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat/send", post(Self::send))
            .route("/api/chat/stream", post(Self::stream))
            .route("/api/chat/pii-consent", post(Self::pii_consent))
            .route("/api/chat/history/:user_id", get(Self::history))
            .route("/api/chat/context/:user_id", get(Self::context))
            .route("/api/chat/status/:conversation_id", get(Self::status))
            .route("/api/chat/:conversation_id", delete(Self::delete_conversation))
            .with_state(resources)
    }

    /// Blocking turn
    async fn send(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Response, AppError> {
        let response = resources.pipeline.handle_turn(request).await?;
        Ok(no_store_json(response))
    }

    /// Streaming turn over server-sent events
    async fn stream(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let frames = resources.pipeline.handle_turn_stream(request).await?;

        let stream = ReceiverStream::new(frames)
            .map(|frame| Ok(Event::default().data(frame.to_json().to_string())));

        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    /// Apply a PII consent decision. Declining blocks the conversation from
    /// global propagation; consenting is a no-op on the flag.
    async fn pii_consent(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<PiiConsentRequest>,
    ) -> Result<Response, AppError> {
        resources
            .database
            .get_conversation(&request.conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        if !request.consent {
            resources
                .database
                .set_conversation_global_sharing_blocked(&request.conversation_id, true)
                .await?;
        }

        let blocked = resources
            .database
            .is_conversation_global_sharing_blocked(&request.conversation_id)
            .await?;

        Ok(no_store_json(json!({
            "success": true,
            "globalSharingBlocked": blocked
        })))
    }

    /// List a user's conversations, most recently active first
    async fn history(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
        Query(query): Query<HistoryQuery>,
    ) -> Result<Response, AppError> {
        let conversations = resources
            .database
            .get_user_active_conversations(&user_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?;

        Ok(Json(json!({ "conversations": conversations })).into_response())
    }

    /// Debug view of what context assembly would produce for this user
    async fn context(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
        Query(query): Query<ContextQuery>,
    ) -> Result<Response, AppError> {
        let assembled = assemble_context(
            &resources.database,
            resources.vector.as_ref(),
            &user_id,
            query.q.as_deref().unwrap_or(""),
        )
        .await?;

        Ok(Json(json!({
            "context": assembled.prompt,
            "relatedContext": assembled.related,
            "suggestedTopics": assembled.suggested_topics
        }))
        .into_response())
    }

    /// Processing status of a conversation, with its audit trail
    async fn status(
        State(resources): State<Arc<ServerResources>>,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let conversation = resources
            .database
            .get_conversation(&conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        let logs = resources
            .database
            .get_processing_logs_for_conversation(&conversation_id)
            .await?;

        Ok(Json(json!({
            "processed": conversation.processed,
            "isUseful": conversation.is_useful,
            "usefulnessReason": conversation.usefulness_reason,
            "processingLog": if logs.is_empty() { None } else { Some(logs) }
        }))
        .into_response())
    }

    /// Soft-delete a conversation from the user's graph
    async fn delete_conversation(
        State(resources): State<Arc<ServerResources>>,
        Path(conversation_id): Path<String>,
        Json(request): Json<DeleteConversationRequest>,
    ) -> Result<Response, AppError> {
        if request.user_id.is_empty() {
            return Err(AppError::missing_field("userId"));
        }

        resources
            .database
            .delete_conversation_from_user_graph(&conversation_id, &request.user_id)
            .await?;

        Ok(no_store_json(json!({ "success": true })))
    }
}
