// ABOUTME: Integration tests for the HTTP surface: endpoints, codecs, error shapes
// ABOUTME: Exercises routers via tower oneshot without a running server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{
    analysis_json, backdate_conversation, classification_json, create_test_resources, pii_json,
    MockLlmProvider,
};
use helpers::axum_test::AxumTestRequest;
use mnemograph::llm::MessageRole;
use mnemograph::resources::ServerResources;
use mnemograph::routes::build_router;
use serde_json::{json, Value};

async fn test_app(provider: Arc<MockLlmProvider>) -> (axum::Router, Arc<ServerResources>) {
    let resources = create_test_resources(provider).await;
    (build_router(Arc::clone(&resources)), resources)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn ping_and_health_respond() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let ping = AxumTestRequest::get("/api/ping").send(app.clone()).await;
    assert_eq!(ping.status_code(), StatusCode::OK);
    let body: Value = ping.json();
    assert_eq!(body["status"], "ok");

    let health = AxumTestRequest::get("/api/health").send(app).await;
    assert_eq!(health.status_code(), StatusCode::OK);
    let body: Value = health.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_i64());
}

// ============================================================================
// Chat Endpoints
// ============================================================================

#[tokio::test]
async fn chat_send_returns_grounded_response_with_no_store() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "an answer",
        &pii_json(false, &[]),
    ]);
    let (app, _resources) = test_app(provider).await;

    let response = AxumTestRequest::post("/api/chat/send")
        .json(&json!({
            "userId": "alice",
            "messages": [{"role": "user", "content": "what is a monad?"}]
        }))
        .send(app)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("cache-control").as_deref(), Some("no-store"));

    let body: Value = response.json();
    assert_eq!(body["response"], "an answer");
    assert!(body["conversationId"].is_string());
    assert_eq!(body["globalSharingBlocked"], false);
    assert!(body["relatedContext"].is_array());
    assert!(body["suggestedTopics"].is_array());
}

#[tokio::test]
async fn chat_send_validates_input_with_spec_error_shape() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::post("/api/chat/send")
        .json(&json!({ "userId": "", "messages": [] }))
        .send(app)
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn chat_history_excludes_deleted_conversations() {
    let provider = MockLlmProvider::scripted(&[]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("bob").await.unwrap();
    let keep = resources.database.create_conversation("bob").await.unwrap();
    resources
        .database
        .add_message(&keep.id, MessageRole::User, "keep me")
        .await
        .unwrap();
    let drop = resources.database.create_conversation("bob").await.unwrap();
    resources
        .database
        .add_message(&drop.id, MessageRole::User, "delete me")
        .await
        .unwrap();
    resources
        .database
        .delete_conversation_from_user_graph(&drop.id, "bob")
        .await
        .unwrap();

    let response = AxumTestRequest::get("/api/chat/history/bob").send(app).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    let conversations = body["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["id"], keep.id.as_str());
}

#[tokio::test]
async fn chat_delete_rejects_non_owner() {
    let provider = MockLlmProvider::scripted(&[]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("owner").await.unwrap();
    let conv = resources.database.create_conversation("owner").await.unwrap();

    let response = AxumTestRequest::delete(&format!("/api/chat/{}", conv.id))
        .json(&json!({ "userId": "intruder" }))
        .send(app)
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn chat_status_reports_verdict_and_log() {
    let provider = MockLlmProvider::scripted(&[&analysis_json(
        false,
        "greeting",
        &[],
        &[],
        "",
    )]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("u").await.unwrap();
    let conv = resources.database.create_conversation("u").await.unwrap();
    resources
        .database
        .add_message(&conv.id, MessageRole::User, "hi")
        .await
        .unwrap();
    backdate_conversation(&resources.database, &conv.id, 300).await;

    // Before processing.
    let before = AxumTestRequest::get(&format!("/api/chat/status/{}", conv.id))
        .send(app.clone())
        .await;
    let body: Value = before.json();
    assert_eq!(body["processed"], false);
    assert!(body["isUseful"].is_null());

    resources.processor.run().await.unwrap();

    let after = AxumTestRequest::get(&format!("/api/chat/status/{}", conv.id))
        .send(app)
        .await;
    let body: Value = after.json();
    assert_eq!(body["processed"], true);
    assert_eq!(body["isUseful"], false);
    assert_eq!(body["usefulnessReason"], "greeting");
    assert_eq!(body["processingLog"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn chat_status_unknown_conversation_is_404() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;
    let response = AxumTestRequest::get("/api/chat/status/nope").send(app).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pii_consent_decline_blocks_global_sharing() {
    let provider = MockLlmProvider::scripted(&[]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("u").await.unwrap();
    let conv = resources.database.create_conversation("u").await.unwrap();

    let response = AxumTestRequest::post("/api/chat/pii-consent")
        .json(&json!({ "conversationId": conv.id, "consent": false }))
        .send(app.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["globalSharingBlocked"], true);

    // Consenting later does not unblock.
    let again = AxumTestRequest::post("/api/chat/pii-consent")
        .json(&json!({ "conversationId": conv.id, "consent": true }))
        .send(app)
        .await;
    let body: Value = again.json();
    assert_eq!(body["globalSharingBlocked"], true);
}

// ============================================================================
// Graph Endpoints
// ============================================================================

#[tokio::test]
async fn link_topics_then_global_map_has_no_dangling_edges() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let link = AxumTestRequest::post("/api/graph/link-topics")
        .json(&json!({ "topic1": "Rust", "topic2": "WebAssembly" }))
        .send(app.clone())
        .await;
    assert_eq!(link.status_code(), StatusCode::OK);
    assert_eq!(link.header("cache-control").as_deref(), Some("no-store"));
    let body: Value = link.json();
    assert!((body["strength"].as_f64().unwrap() - 0.5).abs() < 1e-9);

    let map = AxumTestRequest::get("/api/graph/global").send(app).await;
    assert_eq!(map.status_code(), StatusCode::OK);
    let body: Value = map.json();

    let nodes = body["graph"]["nodes"].as_array().unwrap();
    let edges = body["graph"]["edges"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(edges.len(), 1);

    let node_ids: Vec<&str> = nodes.iter().map(|n| n["id"].as_str().unwrap()).collect();
    for edge in edges {
        assert!(node_ids.contains(&edge["source"].as_str().unwrap()));
        assert!(node_ids.contains(&edge["target"].as_str().unwrap()));
    }

    for node in nodes {
        let nf = node["normalizedFrequency"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&nf));
    }
}

#[tokio::test]
async fn link_topics_requires_both_names() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::post("/api/graph/link-topics")
        .json(&json!({ "topic1": "rust", "topic2": "  " }))
        .send(app)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn suggestions_require_topics_parameter() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::get("/api/graph/suggestions").send(app).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn suggestions_return_neighbors() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    AxumTestRequest::post("/api/graph/link-topics")
        .json(&json!({ "topic1": "rust", "topic2": "tokio" }))
        .send(app.clone())
        .await;

    let response = AxumTestRequest::get("/api/graph/suggestions?topics=rust&limit=3")
        .send(app)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["name"], "tokio");
}

#[tokio::test]
async fn user_map_and_topics_reflect_promotions() {
    let provider = MockLlmProvider::scripted(&[&analysis_json(
        true,
        "useful",
        &["tls", "handshake"],
        &["tls 1.3 is one round trip"],
        "tls chat",
    )]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("carol").await.unwrap();
    let conv = resources.database.create_conversation("carol").await.unwrap();
    resources
        .database
        .add_message(&conv.id, MessageRole::User, "Explain TLS 1.3 handshake")
        .await
        .unwrap();
    backdate_conversation(&resources.database, &conv.id, 300).await;
    resources.processor.run().await.unwrap();

    let topics = AxumTestRequest::get("/api/graph/user/carol/topics").send(app.clone()).await;
    let body: Value = topics.json();
    let names: Vec<&str> = body["topics"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["handshake", "tls"]);

    let map = AxumTestRequest::get("/api/graph/user/carol/map").send(app).await;
    let body: Value = map.json();
    assert_eq!(body["stats"]["topicCount"], 2);
    assert_eq!(body["stats"]["relationCount"], 1);
    assert_eq!(body["stats"]["insightCount"], 1);
    assert_eq!(body["insights"].as_array().unwrap().len(), 1);
    assert_eq!(body["conversations"].as_array().unwrap().len(), 1);
}

// ============================================================================
// Knowledge Endpoints
// ============================================================================

#[tokio::test]
async fn knowledge_add_creates_anchored_insight_with_topics() {
    let (app, resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::post("/api/knowledge/add")
        .json(&json!({
            "userId": "importer",
            "content": "the quarterly report is due friday",
            "topics": ["Quarterly Report", "deadlines"]
        }))
        .send(app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("cache-control").as_deref(), Some("no-store"));
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["topics"][0], "quarterly-report");
    assert!((body["insight"]["importanceScore"].as_f64().unwrap() - 0.7).abs() < 1e-9);

    let insights = resources
        .database
        .get_recent_user_insights("importer", 10)
        .await
        .unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].topics.len(), 2);

    let stats = AxumTestRequest::get("/api/knowledge/stats/importer").send(app).await;
    let body: Value = stats.json();
    assert_eq!(body["insightCount"], 1);
}

#[tokio::test]
async fn knowledge_search_degrades_to_empty_without_vector_index() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::post("/api/knowledge/search")
        .json(&json!({ "query": "anything" }))
        .send(app)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn knowledge_delete_unknown_insight_is_404() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::delete("/api/knowledge/nope").send(app).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Processor Endpoints
// ============================================================================

#[tokio::test]
async fn processor_run_with_nothing_pending_returns_zero_summary() {
    let (app, _resources) = test_app(MockLlmProvider::scripted(&[])).await;

    let response = AxumTestRequest::post("/api/processor/run").send(app).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["processed"], 0);
    assert_eq!(body["useful"], 0);
    assert_eq!(body["notUseful"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn processor_pending_and_stats_track_the_queue() {
    let provider = MockLlmProvider::scripted(&[&analysis_json(
        false,
        "small talk",
        &[],
        &[],
        "",
    )]);
    let (app, resources) = test_app(provider).await;

    resources.database.get_or_create_user("u").await.unwrap();
    let conv = resources.database.create_conversation("u").await.unwrap();
    resources
        .database
        .add_message(&conv.id, MessageRole::User, "hello")
        .await
        .unwrap();
    backdate_conversation(&resources.database, &conv.id, 300).await;

    let pending = AxumTestRequest::get("/api/processor/pending").send(app.clone()).await;
    let body: Value = pending.json();
    assert_eq!(body["count"], 1);

    let run = AxumTestRequest::post("/api/processor/run").send(app.clone()).await;
    let body: Value = run.json();
    assert_eq!(body["processed"], 1);
    assert_eq!(body["notUseful"], 1);

    let stats = AxumTestRequest::get("/api/processor/stats").send(app.clone()).await;
    let body: Value = stats.json();
    assert_eq!(body["totalProcessed"], 1);
    assert_eq!(body["notUseful"], 1);
    assert_eq!(body["pending"], 0);

    let logs = AxumTestRequest::get("/api/processor/logs?limit=5").send(app).await;
    let body: Value = logs.json();
    assert_eq!(body["logs"].as_array().unwrap().len(), 1);
}
