// ABOUTME: Processor route handlers: manual runs, pending queue, audit logs, stats
// ABOUTME: Concurrent run triggers get a 202 instead of spawning a parallel pass
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::resources::ServerResources;

use super::no_store_json;

/// Default number of log rows returned
const DEFAULT_LOG_LIMIT: i64 = 50;

/// Query parameters for the logs endpoint
#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    /// Maximum log rows to return
    pub limit: Option<i64>,
}

/// Processor routes handler
pub struct ProcessorRoutes;

impl ProcessorRoutes {
    /// Create all processor routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/processor/run", post(Self::run))
            .route("/api/processor/pending", get(Self::pending))
            .route("/api/processor/logs", get(Self::logs))
            .route("/api/processor/stats", get(Self::stats))
            .with_state(resources)
    }

    /// Trigger a processor run. If a run is already in flight the caller
    /// gets a 202 rather than a parallel pass.
    async fn run(State(resources): State<Arc<ServerResources>>) -> Result<Response, AppError> {
        match resources.processor.try_run().await {
            Some(result) => Ok(no_store_json(result?)),
            None => Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "status": "already_running" })),
            )
                .into_response()),
        }
    }

    /// Conversations currently eligible for processing
    async fn pending(State(resources): State<Arc<ServerResources>>) -> Result<Response, AppError> {
        let conversations = resources.processor.pending().await?;

        Ok(Json(json!({
            "count": conversations.len(),
            "conversations": conversations
        }))
        .into_response())
    }

    /// Recent processing-log rows
    async fn logs(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<LogsQuery>,
    ) -> Result<Response, AppError> {
        let logs = resources
            .database
            .get_processing_logs(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
            .await?;

        Ok(Json(json!({ "logs": logs })).into_response())
    }

    /// Aggregate processor statistics
    async fn stats(State(resources): State<Arc<ServerResources>>) -> Result<Response, AppError> {
        let stats = resources.database.get_processing_stats().await?;
        Ok(Json(stats).into_response())
    }
}
