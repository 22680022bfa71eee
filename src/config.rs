// ABOUTME: Environment-based server configuration with logged defaults
// ABOUTME: Covers HTTP, database, LLM endpoint, vector index, and processor tuning
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! Server configuration loaded from environment variables.
//!
//! Every knob has a development-friendly default so `mnemograph-server` runs
//! with nothing but an LLM endpoint configured. Production deployments set
//! the `MNEMOGRAPH_*` variables explicitly.

use std::env;

use tracing::info;

/// Default HTTP port
const DEFAULT_PORT: u16 = 8087;

/// Default SQLite database URL
const DEFAULT_DATABASE_URL: &str = "sqlite:data/mnemograph.db";

/// Default idle threshold before a conversation is eligible for processing
const DEFAULT_IDLE_THRESHOLD_SECS: i64 = 120;

/// Default per-run processor batch size
const DEFAULT_PROCESSOR_BATCH: i64 = 10;

/// Default background processor tick interval
const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 60;

/// Default cap on concurrently served requests
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// LLM endpoint configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible chat-completions service
    pub base_url: String,
    /// API key, omitted for unauthenticated local servers
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    pub model: String,
}

/// Remote vector index configuration
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Base URL of the auto-embedding vector index
    pub base_url: String,
    /// Bearer token
    pub token: Option<String>,
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub port: u16,
    /// SQLite database URL
    pub database_url: String,
    /// LLM endpoint settings
    pub llm: LlmConfig,
    /// Vector index settings; `None` disables semantic recall
    pub vector: Option<VectorConfig>,
    /// Seconds of inactivity before the processor may claim a conversation
    pub idle_threshold_secs: i64,
    /// Maximum conversations promoted per processor run
    pub processor_batch: i64,
    /// Background processor tick interval in seconds; 0 disables the scheduler
    pub scheduler_interval_secs: u64,
    /// Concurrency limit applied to the whole router
    pub max_concurrent_requests: usize,
    /// Allowed CORS origin; `None` allows any
    pub cors_origin: Option<String>,
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        let port = env_parse("MNEMOGRAPH_PORT", DEFAULT_PORT);
        let database_url = env::var("MNEMOGRAPH_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned());

        let llm = LlmConfig {
            base_url: env::var("MNEMOGRAPH_LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_owned()),
            api_key: env::var("MNEMOGRAPH_LLM_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            model: env::var("MNEMOGRAPH_LLM_MODEL")
                .unwrap_or_else(|_| "qwen2.5:14b-instruct".to_owned()),
        };

        // Vector recall is optional: without an endpoint the pipeline runs
        // graph-only.
        let vector = env::var("MNEMOGRAPH_VECTOR_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .map(|base_url| VectorConfig {
                base_url,
                token: env::var("MNEMOGRAPH_VECTOR_TOKEN")
                    .ok()
                    .filter(|t| !t.is_empty()),
            });

        let config = Self {
            port,
            database_url,
            llm,
            vector,
            idle_threshold_secs: env_parse(
                "MNEMOGRAPH_IDLE_THRESHOLD_SECS",
                DEFAULT_IDLE_THRESHOLD_SECS,
            ),
            processor_batch: env_parse("MNEMOGRAPH_PROCESSOR_BATCH", DEFAULT_PROCESSOR_BATCH),
            scheduler_interval_secs: env_parse(
                "MNEMOGRAPH_SCHEDULER_INTERVAL_SECS",
                DEFAULT_SCHEDULER_INTERVAL_SECS,
            ),
            max_concurrent_requests: env_parse(
                "MNEMOGRAPH_MAX_CONCURRENT_REQUESTS",
                DEFAULT_MAX_CONCURRENT_REQUESTS,
            ),
            cors_origin: env::var("MNEMOGRAPH_CORS_ORIGIN")
                .ok()
                .filter(|o| !o.is_empty()),
        };

        info!(
            port = config.port,
            database = %config.database_url,
            llm = %config.llm.base_url,
            model = %config.llm.model,
            vector_enabled = config.vector.is_some(),
            idle_threshold_secs = config.idle_threshold_secs,
            "configuration loaded"
        );

        config
    }
}

/// Parse an environment variable, falling back to a default on absence or
/// malformed values.
fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("MNEMOGRAPH_TEST_PORT", "not-a-number");
        assert_eq!(env_parse("MNEMOGRAPH_TEST_PORT", 42u16), 42);
        std::env::remove_var("MNEMOGRAPH_TEST_PORT");
    }
}
