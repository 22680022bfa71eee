// ABOUTME: Health and ping route handlers for monitoring and load balancers
// ABOUTME: Stateless; deeper dependency checks belong to the graph/processor stats endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check routes
    pub fn routes() -> axum::Router {
        use axum::{routing::get, Json, Router};

        async fn ping_handler() -> Json<serde_json::Value> {
            Json(serde_json::json!({ "status": "ok" }))
        }

        async fn health_handler() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().timestamp()
            }))
        }

        Router::new()
            .route("/api/ping", get(ping_handler))
            .route("/api/health", get(health_handler))
    }
}
