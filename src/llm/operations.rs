// ABOUTME: Typed LLM operations: query classification, chat, PII detection, analysis
// ABOUTME: Narrows duck-typed model JSON into structs with defaults; soft failures never propagate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Typed LLM Operations
//!
//! The rest of the server never builds raw [`ChatRequest`]s for structured
//! work; it calls these operations. Each structured operation validates the
//! model's JSON against an explicit schema with typed defaults, tolerates
//! code-fence wrapping, and returns its neutral default on any network or
//! parse failure. Only the user-facing completions (`chat`, `chat_stream`)
//! surface hard errors, since a failed turn must fail the request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::prompts;
use super::{ChatMessage, ChatRequest, ChatStream, LlmProvider, ResponseLength};
use crate::errors::AppResult;

/// Temperature for deterministic structured outputs
const STRUCTURED_TEMPERATURE: f32 = 0.1;

/// Temperature for conversation analysis
const ANALYSIS_TEMPERATURE: f32 = 0.2;

/// Temperature for user-facing completions
const CHAT_TEMPERATURE: f32 = 0.7;

/// Token budget for the query classifier
const CLASSIFY_MAX_TOKENS: u32 = 100;

/// Token budget for the PII probe
const PII_MAX_TOKENS: u32 = 256;

/// Token budget for conversation analysis
const ANALYSIS_MAX_TOKENS: u32 = 600;

/// Maximum topics retained from an analysis
const MAX_TOPICS: usize = 6;

/// Maximum insights retained from an analysis
const MAX_INSIGHTS: usize = 4;

// ============================================================================
// Operation Result Types
// ============================================================================

/// Verdict of the pre-completion query classifier
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryClassification {
    /// Whether the query is small talk with no informational content
    pub is_trivial: bool,
    /// Desired verbosity of the reply
    pub suggested_response_length: ResponseLength,
}

/// Result of the PII probe over a (query, response) pair
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PiiDetection {
    /// Whether personally identifiable information was found
    pub contains_pii: bool,
    /// Categories detected (e.g. "email", "phone")
    pub pii_types: Vec<String>,
    /// Model's explanation of the finding
    pub explanation: String,
}

/// Structured verdict of the deferred conversation analyser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationAnalysis {
    /// Whether the conversation contains durable knowledge
    pub is_useful: bool,
    /// Free-text reason for the verdict
    pub reason: String,
    /// Extracted topic tags, at most [`MAX_TOPICS`]
    pub topics: Vec<String>,
    /// Extracted takeaways, at most [`MAX_INSIGHTS`]
    pub insights: Vec<String>,
    /// One-paragraph conversation summary
    pub summary: String,
    /// Adjacent topics the model suggests
    pub related_topics: Vec<String>,
    /// Whether the conversation reached a natural end
    pub is_complete: bool,
}

impl Default for ConversationAnalysis {
    fn default() -> Self {
        Self {
            is_useful: false,
            reason: String::new(),
            topics: Vec::new(),
            insights: Vec::new(),
            summary: String::new(),
            related_topics: Vec::new(),
            is_complete: true,
        }
    }
}

impl ConversationAnalysis {
    /// Clamp the analysis to its documented bounds.
    fn validated(mut self) -> Self {
        self.topics.truncate(MAX_TOPICS);
        self.insights.truncate(MAX_INSIGHTS);
        self.topics.retain(|t| !t.trim().is_empty());
        self.insights.retain(|i| !i.trim().is_empty());
        self
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Typed operations over any [`LlmProvider`]
#[derive(Clone)]
pub struct LlmOperations {
    provider: Arc<dyn LlmProvider>,
}

impl LlmOperations {
    /// Wrap a provider
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Access the underlying provider (health checks)
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Classify a user query as trivial/substantive with a suggested reply
    /// length. Failures default to `{ isTrivial: false, length: medium }`.
    pub async fn classify_query(&self, query: &str) -> QueryClassification {
        let request = ChatRequest::new(vec![ChatMessage::user(prompts::classification_prompt(
            query,
        ))])
        .with_temperature(STRUCTURED_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        match self.provider.complete(&request).await {
            Ok(response) => parse_lenient::<QueryClassification>(&response.content)
                .unwrap_or_else(|| {
                    warn!("query classifier returned unparseable output, defaulting");
                    QueryClassification::default()
                }),
            Err(e) => {
                warn!("query classification failed: {e}, defaulting");
                QueryClassification::default()
            }
        }
    }

    /// Grounded user-facing completion.
    ///
    /// # Errors
    ///
    /// Returns the provider error: a failed completion fails the turn.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        context: Option<&str>,
        length: ResponseLength,
    ) -> AppResult<String> {
        let request = self.chat_request(history, context, length);
        let response = self.provider.complete(&request).await?;
        Ok(response.content)
    }

    /// Streaming variant of [`Self::chat`], same parameters.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the stream cannot be opened.
    pub async fn chat_stream(
        &self,
        history: &[ChatMessage],
        context: Option<&str>,
        length: ResponseLength,
    ) -> AppResult<ChatStream> {
        let request = self.chat_request(history, context, length).with_streaming();
        self.provider.complete_stream(&request).await
    }

    fn chat_request(
        &self,
        history: &[ChatMessage],
        context: Option<&str>,
        length: ResponseLength,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(prompts::system_prompt(context, length)));
        messages.extend_from_slice(history);

        ChatRequest::new(messages)
            .with_temperature(CHAT_TEMPERATURE)
            .with_max_tokens(length.max_tokens())
    }

    /// Probe a (query, response) pair for PII. Failures default to all-clear.
    pub async fn detect_pii(&self, user_query: &str, assistant_response: &str) -> PiiDetection {
        let request = ChatRequest::new(vec![ChatMessage::user(prompts::pii_detection_prompt(
            user_query,
            assistant_response,
        ))])
        .with_temperature(STRUCTURED_TEMPERATURE)
        .with_max_tokens(PII_MAX_TOKENS);

        match self.provider.complete(&request).await {
            Ok(response) => {
                parse_lenient::<PiiDetection>(&response.content).unwrap_or_else(|| {
                    warn!("PII probe returned unparseable output, defaulting to all-clear");
                    PiiDetection::default()
                })
            }
            Err(e) => {
                warn!("PII detection failed: {e}, defaulting to all-clear");
                PiiDetection::default()
            }
        }
    }

    /// Analyze a conversation transcript for the deferred processor.
    /// Failures default to a not-useful verdict with empty extractions.
    pub async fn analyze_conversation(&self, transcript: &str) -> ConversationAnalysis {
        let request = ChatRequest::new(vec![ChatMessage::user(prompts::analysis_prompt(
            transcript,
        ))])
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        match self.provider.complete(&request).await {
            Ok(response) => parse_lenient::<ConversationAnalysis>(&response.content)
                .map(ConversationAnalysis::validated)
                .unwrap_or_else(|| {
                    warn!("conversation analyser returned unparseable output, defaulting");
                    ConversationAnalysis::default()
                }),
            Err(e) => {
                warn!("conversation analysis failed: {e}, defaulting");
                ConversationAnalysis::default()
            }
        }
    }
}

// ============================================================================
// Lenient JSON Narrowing
// ============================================================================

/// Parse model output that is supposed to be a JSON object, tolerating
/// code-fence wrapping and stray prose around the outermost braces.
fn parse_lenient<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let candidate = extract_json_object(raw)?;
    serde_json::from_str(candidate).ok()
}

/// Slice out the outermost `{ … }` object from raw model output.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}
