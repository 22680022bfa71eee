// ABOUTME: Shared test utilities: in-memory database, scripted mock LLM provider
// ABOUTME: Provides resource builders used across the integration suites
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! Shared test setup for the integration suites.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use mnemograph::config::{LlmConfig, ServerConfig};
use mnemograph::database::Database;
use mnemograph::errors::AppError;
use mnemograph::llm::{
    ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider, StreamChunk,
};
use mnemograph::resources::ServerResources;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// Standard in-memory test database
pub async fn create_test_database() -> Database {
    init_test_logging();
    Database::connect("sqlite::memory:").await.unwrap()
}

/// Marker script entry that makes the mock stream fail mid-flight
pub const STREAM_FAILURE: &str = "<stream-failure>";

/// Scripted LLM provider: pops one canned response per call and records
/// every request it receives.
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<String>>,
    /// Every request the mock has served, in order
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockLlmProvider {
    /// Build a provider with a response script
    pub fn scripted(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| (*s).to_owned()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Append a response to the script
    pub fn push(&self, response: &str) {
        self.responses.lock().unwrap().push_back(response.to_owned());
    }

    /// Number of requests served so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Copy of the nth request served
    pub fn request(&self, index: usize) -> ChatRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "mock response".to_owned())
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChatResponse {
            content: self.next_response(),
            model: "mock-model".to_owned(),
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        let text = self.next_response();

        // Deterministic chunking: fixed-size character groups whose
        // concatenation reproduces the blocking response exactly.
        let chars: Vec<char> = text.chars().collect();
        let mut chunks: Vec<Result<StreamChunk, AppError>> = chars
            .chunks(5)
            .map(|group| {
                Ok(StreamChunk {
                    delta: group.iter().collect(),
                    is_final: false,
                    finish_reason: None,
                })
            })
            .collect();

        if text == STREAM_FAILURE {
            chunks = vec![
                Ok(StreamChunk {
                    delta: "partial".to_owned(),
                    is_final: false,
                    finish_reason: None,
                }),
                Err(AppError::external_service("llm", "scripted stream failure")),
            ];
        } else {
            chunks.push(Ok(StreamChunk {
                delta: String::new(),
                is_final: true,
                finish_reason: Some("stop".to_owned()),
            }));
        }

        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

/// Test server configuration: in-memory store, no vector index, scheduler off
pub fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        database_url: "sqlite::memory:".to_owned(),
        llm: LlmConfig {
            base_url: "http://localhost:0/v1".to_owned(),
            api_key: None,
            model: "mock-model".to_owned(),
        },
        vector: None,
        idle_threshold_secs: 120,
        processor_batch: 10,
        scheduler_interval_secs: 0,
        max_concurrent_requests: 16,
        cors_origin: None,
    }
}

/// Full resource bundle over an in-memory database and a scripted provider
pub async fn create_test_resources(provider: Arc<MockLlmProvider>) -> Arc<ServerResources> {
    let database = create_test_database().await;
    Arc::new(ServerResources::new(
        test_config(),
        database,
        provider,
        None,
    ))
}

/// Age a conversation so the processor considers it idle
pub async fn backdate_conversation(database: &Database, conversation_id: &str, secs: i64) {
    sqlx::query("UPDATE conversations SET updated_at = updated_at - $1 WHERE id = $2")
        .bind(secs)
        .bind(conversation_id)
        .execute(database.pool())
        .await
        .unwrap();
}

// ============================================================================
// Scripted LLM payloads
// ============================================================================

/// Classifier verdict JSON
pub fn classification_json(trivial: bool, length: &str) -> String {
    format!(r#"{{"isTrivial": {trivial}, "suggestedResponseLength": "{length}"}}"#)
}

/// PII probe JSON
pub fn pii_json(contains: bool, types: &[&str]) -> String {
    let types = types
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{"containsPII": {contains}, "piiTypes": [{types}], "explanation": "scripted"}}"#
    )
}

/// Analyser verdict JSON
pub fn analysis_json(useful: bool, reason: &str, topics: &[&str], insights: &[&str], summary: &str) -> String {
    let topics = topics
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let insights = insights
        .iter()
        .map(|i| format!("\"{i}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{"isUseful": {useful}, "reason": "{reason}", "topics": [{topics}], "insights": [{insights}], "summary": "{summary}", "relatedTopics": [], "isComplete": true}}"#
    )
}
