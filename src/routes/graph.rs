// ABOUTME: Graph route handlers: per-user and global maps, topics, suggestions, linking
// ABOUTME: Map responses expose stats, nodes/edges, topics, relations, insights, conversations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::resources::ServerResources;

use super::no_store_json;

/// Cap on insights embedded in a map response
const MAP_INSIGHT_LIMIT: i64 = 50;

/// Cap on conversations embedded in a map response
const MAP_CONVERSATION_LIMIT: i64 = 50;

/// Default number of topic suggestions
const DEFAULT_SUGGESTION_LIMIT: i64 = 5;

// ============================================================================
// Request Types
// ============================================================================

/// Query parameters for the suggestions endpoint
#[derive(Debug, Deserialize, Default)]
pub struct SuggestionsQuery {
    /// Comma-separated topic names to expand from
    pub topics: Option<String>,
    /// Maximum suggestions to return
    pub limit: Option<i64>,
}

/// Body of the manual topic-link call
#[derive(Debug, Deserialize)]
pub struct LinkTopicsRequest {
    /// First topic name
    pub topic1: String,
    /// Second topic name
    pub topic2: String,
    /// Initial strength when the edge does not exist yet
    #[serde(default)]
    pub strength: Option<f64>,
}

// ============================================================================
// Graph Routes
// ============================================================================

/// Graph routes handler
pub struct GraphRoutes;

impl GraphRoutes {
    /// Create all graph routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/graph/user/:user_id/map", get(Self::user_map))
            .route("/api/graph/user/:user_id/topics", get(Self::user_topics))
            .route("/api/graph/user/:user_id/full", get(Self::user_full))
            .route("/api/graph/global", get(Self::global_map))
            .route("/api/graph/suggestions", get(Self::suggestions))
            .route("/api/graph/link-topics", post(Self::link_topics))
            .with_state(resources)
    }

    /// Per-user knowledge map for visualization
    async fn user_map(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
    ) -> Result<Response, AppError> {
        let map = resources.database.get_user_knowledge_map(&user_id).await?;
        let topics = resources.database.get_all_user_topics(&user_id).await?;
        let insights = resources
            .database
            .get_recent_user_insights(&user_id, MAP_INSIGHT_LIMIT)
            .await?;
        let conversations = resources
            .database
            .get_user_active_conversations(&user_id, MAP_CONVERSATION_LIMIT)
            .await?;

        Ok(Json(json!({
            "stats": map.stats,
            "graph": { "nodes": &map.nodes, "edges": &map.edges },
            "topics": topics,
            "relations": &map.edges,
            "insights": insights,
            "conversations": conversations
        }))
        .into_response())
    }

    /// Topics the user has engaged with
    async fn user_topics(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
    ) -> Result<Response, AppError> {
        let topics = resources.database.get_all_user_topics(&user_id).await?;
        Ok(Json(json!({ "topics": topics })).into_response())
    }

    /// Full per-user graph dump: the map plus uncapped insight history
    async fn user_full(
        State(resources): State<Arc<ServerResources>>,
        Path(user_id): Path<String>,
    ) -> Result<Response, AppError> {
        let map = resources.database.get_user_knowledge_map(&user_id).await?;
        let topics = resources.database.get_all_user_topics(&user_id).await?;
        let insights = resources
            .database
            .get_recent_user_insights(&user_id, i64::MAX)
            .await?;
        let conversations = resources
            .database
            .get_user_active_conversations(&user_id, i64::MAX)
            .await?;

        Ok(Json(json!({
            "userId": user_id,
            "stats": map.stats,
            "graph": { "nodes": &map.nodes, "edges": &map.edges },
            "topics": topics,
            "relations": &map.edges,
            "insights": insights,
            "conversations": conversations
        }))
        .into_response())
    }

    /// Global knowledge map across all users
    async fn global_map(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let map = resources.database.get_global_knowledge_map().await?;
        let insights = resources
            .database
            .get_global_insights(None, MAP_INSIGHT_LIMIT)
            .await?;
        let conversations = resources
            .database
            .get_global_conversation_summaries(None, MAP_CONVERSATION_LIMIT)
            .await?;

        Ok(Json(json!({
            "stats": map.stats,
            "graph": { "nodes": &map.nodes, "edges": &map.edges },
            "topics": &map.nodes,
            "relations": &map.edges,
            "insights": insights,
            "conversations": conversations
        }))
        .into_response())
    }

    /// Topic suggestions adjacent to the given topics
    async fn suggestions(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<SuggestionsQuery>,
    ) -> Result<Response, AppError> {
        let topics: Vec<String> = query
            .topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if topics.is_empty() {
            return Err(AppError::invalid_input(
                "topics query parameter must list at least one topic",
            ));
        }

        let suggestions = resources
            .database
            .get_suggested_topics(&topics, query.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT))
            .await?;

        Ok(Json(json!({ "suggestions": suggestions })).into_response())
    }

    /// Manually reinforce (or create) a relation between two topics
    async fn link_topics(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<LinkTopicsRequest>,
    ) -> Result<Response, AppError> {
        if request.topic1.trim().is_empty() || request.topic2.trim().is_empty() {
            return Err(AppError::invalid_input("topic1 and topic2 are required"));
        }

        let strength = resources
            .database
            .link_topics(&request.topic1, &request.topic2, request.strength)
            .await?;

        Ok(no_store_json(json!({
            "success": true,
            "strength": strength
        })))
    }
}
