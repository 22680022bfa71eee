// ABOUTME: Process-wide resource bundle: store handle, LLM operations, vector adapter
// ABOUTME: Constructed once at startup from injected configuration; no ambient globals
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::database::Database;
use crate::llm::{LlmOperations, LlmProvider};
use crate::services::{ChatPipeline, ConversationProcessor};
use crate::vector::VectorIndex;

/// Singletons shared by every request handler, injected as axum state.
pub struct ServerResources {
    /// Loaded configuration
    pub config: ServerConfig,
    /// Graph store handle
    pub database: Database,
    /// Typed LLM operations
    pub llm: LlmOperations,
    /// Optional vector index
    pub vector: Option<VectorIndex>,
    /// The chat turn pipeline
    pub pipeline: ChatPipeline,
    /// The deferred conversation processor
    pub processor: ConversationProcessor,
}

impl ServerResources {
    /// Wire the resource graph from its roots.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        database: Database,
        provider: Arc<dyn LlmProvider>,
        vector: Option<VectorIndex>,
    ) -> Self {
        let llm = LlmOperations::new(provider);
        let pipeline = ChatPipeline::new(database.clone(), llm.clone(), vector.clone());
        let processor = ConversationProcessor::new(
            database.clone(),
            llm.clone(),
            vector.clone(),
            config.idle_threshold_secs,
            config.processor_batch,
        );

        Self {
            config,
            database,
            llm,
            vector,
            pipeline,
            processor,
        }
    }
}
