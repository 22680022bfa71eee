// ABOUTME: System prompts for LLM interactions: persona, classification, PII, analysis
// ABOUTME: Centralizes all prompt text so model behavior is auditable in one place
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # System Prompts
//!
//! All prompt text used by the typed LLM operations. The assistant persona is
//! fixed; retrieval context is appended as a labeled block so the model can
//! distinguish memory from the live conversation.

use super::ResponseLength;

/// Assistant persona used for every completion
pub const ASSISTANT_SYSTEM_PROMPT: &str = "\
You are a thoughtful assistant with a persistent memory of past \
conversations. You ground your answers in what you already know about the \
user and the shared knowledge pool when it is relevant, without quoting it \
verbatim or mentioning the memory system itself. Be accurate and concrete; \
say so plainly when you do not know something.";

/// Label introducing the retrieval context block inside the system prompt
const CONTEXT_BLOCK_LABEL: &str = "## Relevant knowledge from memory";

/// Build the full system prompt: persona, optional labeled context block,
/// and the length directive for this turn.
#[must_use]
pub fn system_prompt(context: Option<&str>, length: ResponseLength) -> String {
    let mut prompt = String::from(ASSISTANT_SYSTEM_PROMPT);
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(CONTEXT_BLOCK_LABEL);
        prompt.push('\n');
        prompt.push_str(context);
    }
    prompt.push_str("\n\n");
    prompt.push_str(length.directive());
    prompt
}

/// Build the query classification prompt.
///
/// The classifier decides whether a turn is trivial (greetings, thanks,
/// small talk) and how long the reply should be.
#[must_use]
pub fn classification_prompt(query: &str) -> String {
    format!(
        "Classify the user query below. Respond with ONLY a JSON object:\n\
         {{\"isTrivial\": boolean, \"suggestedResponseLength\": \"short\"|\"medium\"|\"long\"}}\n\
         \n\
         A query is trivial if it is a greeting, pleasantry, or small talk \
         with no informational content.\n\
         \n\
         Query: {query}"
    )
}

/// Build the PII detection prompt over a (query, response) pair.
#[must_use]
pub fn pii_detection_prompt(user_query: &str, assistant_response: &str) -> String {
    format!(
        "Examine the exchange below for personally identifiable information. \
         Check for: personal names, email addresses, phone numbers, physical \
         addresses, government ID numbers, medical information, financial \
         information, dates of birth, and account credentials.\n\
         \n\
         Respond with ONLY a JSON object:\n\
         {{\"containsPII\": boolean, \"piiTypes\": [string], \"explanation\": string}}\n\
         \n\
         User: {user_query}\n\
         Assistant: {assistant_response}"
    )
}

/// Build the conversation analysis prompt for the deferred processor.
#[must_use]
pub fn analysis_prompt(transcript: &str) -> String {
    format!(
        "Analyze the conversation below. Decide whether it contains durable \
         knowledge worth remembering. Greetings, tests, and small talk are \
         not useful.\n\
         \n\
         Respond with ONLY a JSON object:\n\
         {{\n\
         \x20 \"isUseful\": boolean,\n\
         \x20 \"reason\": string,\n\
         \x20 \"topics\": [string],          // at most 6, short conceptual tags\n\
         \x20 \"insights\": [string],        // at most 4 concrete takeaways\n\
         \x20 \"summary\": string,           // one-paragraph summary\n\
         \x20 \"relatedTopics\": [string],\n\
         \x20 \"isComplete\": boolean        // did the conversation reach a natural end\n\
         }}\n\
         \n\
         Conversation:\n{transcript}"
    )
}
