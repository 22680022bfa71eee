// ABOUTME: HTTP surface: route registration and shared response helpers
// ABOUTME: Mutation endpoints set Cache-Control no-store so visualizations refetch
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

pub mod chat;
pub mod graph;
pub mod health;
pub mod knowledge;
pub mod processor;

use std::sync::Arc;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::resources::ServerResources;

pub use chat::ChatRoutes;
pub use graph::GraphRoutes;
pub use health::HealthRoutes;
pub use knowledge::KnowledgeRoutes;
pub use processor::ProcessorRoutes;

/// Build the complete API router.
pub fn build_router(resources: Arc<ServerResources>) -> axum::Router {
    axum::Router::new()
        .merge(HealthRoutes::routes())
        .merge(ChatRoutes::routes(Arc::clone(&resources)))
        .merge(GraphRoutes::routes(Arc::clone(&resources)))
        .merge(KnowledgeRoutes::routes(Arc::clone(&resources)))
        .merge(ProcessorRoutes::routes(resources))
}

/// JSON response with `Cache-Control: no-store`, used by every mutation
/// endpoint that changes user-visible graph state.
pub(crate) fn no_store_json<T: Serialize>(body: T) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}
