// ABOUTME: Knowledge route handlers: semantic search, external insight ingestion, stats
// ABOUTME: The add endpoint is the store-side half of out-of-process ingestion wrappers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::database::insights::EXTRACTED_IMPORTANCE;
use crate::errors::AppError;
use crate::resources::ServerResources;

use super::no_store_json;

/// Default result count for semantic search
const DEFAULT_SEARCH_TOP_K: usize = 5;

// ============================================================================
// Request Types
// ============================================================================

/// Body of the semantic search call
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchRequest {
    /// Query text
    pub query: String,
    /// Optional user scope
    #[serde(default)]
    pub user_id: Option<String>,
    /// Result count
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Body of the external insight ingestion call
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeAddRequest {
    /// Owning user
    pub user_id: String,
    /// Insight content
    pub content: String,
    /// Topic names to link
    #[serde(default)]
    pub topics: Vec<String>,
    /// Conversation to anchor the insight to; one is created when omitted
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// ============================================================================
// Knowledge Routes
// ============================================================================

/// Knowledge routes handler
pub struct KnowledgeRoutes;

impl KnowledgeRoutes {
    /// Create all knowledge routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/knowledge/search", post(Self::search))
            .route("/api/knowledge/add", post(Self::add))
            .route("/api/knowledge/:insight_id", delete(Self::delete_insight))
            .route("/api/knowledge/stats/:user_id", get(Self::stats))
            .with_state(resources)
    }

    /// Semantic search over the vector index. Degrades to an empty result
    /// set when the index is absent or failing.
    async fn search(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<KnowledgeSearchRequest>,
    ) -> Result<Response, AppError> {
        if request.query.trim().is_empty() {
            return Err(AppError::invalid_input("query must not be empty"));
        }

        let results = match resources.vector.as_ref() {
            Some(vector) => vector
                .search(
                    &request.query,
                    request.user_id.as_deref(),
                    request.top_k.unwrap_or(DEFAULT_SEARCH_TOP_K),
                )
                .await
                .unwrap_or_else(|e| {
                    warn!("knowledge search degraded to empty results: {e}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        Ok(Json(json!({ "results": results })).into_response())
    }

    /// Ingest an externally supplied insight: topics are upserted and
    /// linked, the row is written at extraction importance, and the content
    /// is mirrored to the vector index best-effort.
    async fn add(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<KnowledgeAddRequest>,
    ) -> Result<Response, AppError> {
        if request.user_id.is_empty() {
            return Err(AppError::missing_field("userId"));
        }
        if request.content.trim().is_empty() {
            return Err(AppError::invalid_input("content must not be empty"));
        }

        resources.database.get_or_create_user(&request.user_id).await?;

        // Every insight anchors to a conversation; external sources that
        // have none get a fresh empty one (invisible to the processor, which
        // only selects conversations with messages).
        let conversation_id = match &request.conversation_id {
            Some(id) => {
                resources
                    .database
                    .get_user_conversation(id, &request.user_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Conversation"))?;
                id.clone()
            }
            None => {
                resources
                    .database
                    .create_conversation(&request.user_id)
                    .await?
                    .id
            }
        };

        let mut topic_ids = Vec::with_capacity(request.topics.len());
        let mut topic_names = Vec::with_capacity(request.topics.len());
        for raw in &request.topics {
            let topic = resources.database.get_or_create_topic(raw).await?;
            if !topic_ids.contains(&topic.id) {
                topic_ids.push(topic.id);
                topic_names.push(topic.name);
            }
        }

        let insight = resources
            .database
            .save_insight(
                &conversation_id,
                &request.user_id,
                &request.content,
                EXTRACTED_IMPORTANCE,
            )
            .await?;
        resources
            .database
            .link_insight_to_topics(&insight.id, &topic_ids)
            .await?;

        if let Some(vector) = resources.vector.as_ref() {
            match vector
                .store(&insight.id, &request.content, &request.user_id, &topic_names)
                .await
            {
                Ok(()) => {
                    resources
                        .database
                        .set_insight_vector_ref(&insight.id, Some(&insight.id))
                        .await?;
                }
                Err(e) => warn!("vector mirror failed for ingested insight: {e}"),
            }
        }

        Ok(no_store_json(json!({
            "success": true,
            "insight": insight,
            "topics": topic_names
        })))
    }

    /// Remove an insight from semantic recall. The graph row survives; only
    /// its vector mirror is dropped.
    async fn delete_insight(
        State(resources): State<Arc<ServerResources>>,
        Path(insight_id): Path<String>,
    ) -> Result<Response, AppError> {
        let insight = resources
            .database
            .get_insight(&insight_id)
            .await?
            .ok_or_else(|| AppError::not_found("Insight"))?;

        if let Some(vector) = resources.vector.as_ref() {
            if let Err(e) = vector.delete(&insight.id).await {
                warn!("vector delete failed for insight {insight_id}: {e}");
            }
        }
        resources
            .database
            .set_insight_vector_ref(&insight_id, None)
            .await?;

        Ok(no_store_json(json!({ "success": true })))
    }

    /// Per-user knowledge stats
    async fn stats(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
    ) -> Result<Response, AppError> {
        let insight_count = resources.database.count_user_insights(&user_id).await?;
        let topics = resources.database.get_all_user_topics(&user_id).await?;

        Ok(Json(json!({
            "userId": user_id,
            "insightCount": insight_count,
            "topicCount": topics.len()
        }))
        .into_response())
    }
}
