// ABOUTME: Thin adapter over a remote auto-embedding vector index for semantic recall
// ABOUTME: Upsert/query/delete with user-scoped metadata filters; every failure is non-fatal
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Vector Index Adapter
//!
//! The index embeds on write: we send raw text, it stores the vector. The
//! chat pipeline uses it for a small semantic-similarity shortlist on top of
//! the relational graph; the whole adapter is best-effort and the pipeline
//! proceeds graph-only when it is absent or failing.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VectorConfig;
use crate::errors::AppError;

/// Connection timeout
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Request timeout
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct UpsertRecord<'a> {
    id: &'a str,
    data: &'a str,
    metadata: RecordMetadata,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RecordMetadata {
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(default)]
    topics: String,
    #[serde(rename = "createdAt", default)]
    created_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    data: &'a str,
    top_k: usize,
    include_metadata: bool,
    include_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
}

// ============================================================================
// Adapter
// ============================================================================

/// One semantic-similarity hit
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    /// Stored record identifier (insight id)
    pub id: String,
    /// Stored content
    pub content: String,
    /// Topic tags recorded at write time
    pub topics: Vec<String>,
    /// Cosine similarity in `[0, 1]`, descending in results
    pub score: f64,
}

/// Remote vector index adapter
#[derive(Clone)]
pub struct VectorIndex {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl VectorIndex {
    /// Create an adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &VectorConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref token) = self.token {
            request.header("Authorization", format!("Bearer {token}"))
        } else {
            request
        }
    }

    /// Upsert a record; the index embeds `content` server-side.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or non-2xx status. Callers treat this
    /// as a soft failure.
    pub async fn store(
        &self,
        id: &str,
        content: &str,
        user_id: &str,
        topics: &[String],
    ) -> Result<(), AppError> {
        let record = UpsertRecord {
            id,
            data: content,
            metadata: RecordMetadata {
                user_id: user_id.to_owned(),
                topics: topics.join(","),
                created_at: chrono::Utc::now().timestamp(),
            },
        };

        let response = self
            .add_auth_header(self.client.post(self.endpoint("upsert-data")).json(&[record]))
            .send()
            .await
            .map_err(|e| AppError::external_service("vector", format!("upsert failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                "vector",
                format!("upsert returned {}", response.status()),
            ));
        }

        debug!(id, "vector record upserted");
        Ok(())
    }

    /// Query the index by raw text, optionally scoped to one user via the
    /// index's string-predicate metadata filter.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, non-2xx status, or body parse failure.
    pub async fn search(
        &self,
        query: &str,
        user_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<VectorHit>, AppError> {
        let request = QueryRequest {
            data: query,
            top_k,
            include_metadata: true,
            include_data: true,
            filter: user_id.map(|u| format!("userId = '{}'", u.replace('\'', ""))),
        };

        let response = self
            .add_auth_header(self.client.post(self.endpoint("query-data")).json(&request))
            .send()
            .await
            .map_err(|e| AppError::external_service("vector", format!("query failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                "vector",
                format!("query returned {}", response.status()),
            ));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::external_service("vector", format!("bad query body: {e}")))?;

        Ok(body
            .result
            .into_iter()
            .map(|m| {
                let metadata = m.metadata.unwrap_or_default();
                VectorHit {
                    id: m.id,
                    content: m.data.unwrap_or_default(),
                    topics: metadata
                        .topics
                        .split(',')
                        .filter(|t| !t.is_empty())
                        .map(ToOwned::to_owned)
                        .collect(),
                    score: m.score,
                }
            })
            .collect())
    }

    /// Delete a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or non-2xx status.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let response = self
            .add_auth_header(
                self.client
                    .post(self.endpoint("delete"))
                    .json(&serde_json::json!({ "ids": [id] })),
            )
            .send()
            .await
            .map_err(|e| AppError::external_service("vector", format!("delete failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                "vector",
                format!("delete returned {}", response.status()),
            ));
        }

        Ok(())
    }
}
