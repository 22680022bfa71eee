// ABOUTME: Context assembly: composes the grounded prompt preamble for a chat turn
// ABOUTME: Personal insights, global pool, topic-driven fallback, then vector shortlist
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Context Assembly
//!
//! Builds the memory preamble for one turn in a fixed section order. Every
//! section degrades to absence: an empty graph or a failing vector index
//! produces a smaller preamble, never an error. Only store failures
//! propagate, failing the turn.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::database::Database;
use crate::vector::VectorIndex;

use crate::errors::AppResult;

/// Cap on recent personal insights in the preamble
const PERSONAL_INSIGHT_LIMIT: i64 = 15;

/// Cap on global conversation summaries in the preamble
const GLOBAL_SUMMARY_LIMIT: i64 = 15;

/// Cap on global insights in the preamble
const GLOBAL_INSIGHT_LIMIT: i64 = 15;

/// Cap on topic-driven fallback insights
const RELATED_INSIGHT_LIMIT: i64 = 3;

/// Cap on semantic-similarity hits
const VECTOR_HIT_LIMIT: usize = 3;

/// Minimum cosine score for a vector hit to be used
const VECTOR_SCORE_FLOOR: f64 = 0.5;

/// Cap on suggested topics returned with a turn
const SUGGESTED_TOPIC_LIMIT: i64 = 5;

/// Personal-insight evidence echoed to the client
#[derive(Debug, Clone, Serialize)]
pub struct RelatedContextItem {
    /// Topic name
    pub topic: String,
    /// Importance score of the strongest insight under that topic
    pub score: f64,
}

/// Everything context assembly produces for one turn
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Prompt preamble; `None` when every section came up empty
    pub prompt: Option<String>,
    /// Evidence used to ground the answer
    pub related: Vec<RelatedContextItem>,
    /// Topic suggestions adjacent to the user's graph
    pub suggested_topics: Vec<String>,
}

/// Assemble the grounded context for a user's query.
///
/// # Errors
///
/// Returns an error only on store failures; vector failures log and fall
/// through.
pub async fn assemble_context(
    database: &Database,
    vector: Option<&VectorIndex>,
    user_id: &str,
    query: &str,
) -> AppResult<AssembledContext> {
    let mut sections: Vec<String> = Vec::new();
    let mut related: Vec<RelatedContextItem> = Vec::new();

    // 1. Recent personal insights, each with its topic list.
    let personal = database
        .get_recent_user_insights(user_id, PERSONAL_INSIGHT_LIMIT)
        .await?;
    if !personal.is_empty() {
        let mut lines = vec!["### What you already know about this user".to_owned()];
        for item in &personal {
            if item.topics.is_empty() {
                lines.push(format!("- {}", item.insight.content));
            } else {
                lines.push(format!(
                    "- {} [topics: {}]",
                    item.insight.content,
                    item.topics.join(", ")
                ));
            }
        }
        sections.push(lines.join("\n"));

        related = collect_evidence(personal.iter().map(|i| (&i.topics, i.insight.importance_score)));
    }

    // 2. Global pool: summaries and insights from other users, minus
    //    anything from blocked conversations.
    let summaries = database
        .get_global_conversation_summaries(Some(user_id), GLOBAL_SUMMARY_LIMIT)
        .await?;
    let global_insights = database
        .get_global_insights(Some(user_id), GLOBAL_INSIGHT_LIMIT)
        .await?;

    if !summaries.is_empty() {
        let mut lines = vec!["### Summaries from the shared knowledge pool".to_owned()];
        for summary in &summaries {
            lines.push(format!("- {}", summary.summary));
        }
        sections.push(lines.join("\n"));
    }

    if !global_insights.is_empty() {
        let mut lines = vec!["### Shared insights".to_owned()];
        for insight in &global_insights {
            lines.push(format!("- {}", insight.content));
        }
        sections.push(lines.join("\n"));

        let used_ids: Vec<String> = global_insights.iter().map(|g| g.id.clone()).collect();
        if let Err(e) = database.increment_global_insight_use(&used_ids).await {
            warn!("failed to bump global insight use counts: {e}");
        }
    }

    // 3. Topic-driven fallback, only when the personal pool was empty.
    let user_topics = database.get_all_user_topics(user_id).await?;
    if personal.is_empty() && !user_topics.is_empty() {
        let topic_ids: Vec<String> = user_topics.iter().map(|t| t.id.clone()).collect();
        let fallback = database
            .get_related_insights(user_id, &topic_ids, RELATED_INSIGHT_LIMIT)
            .await?;
        if !fallback.is_empty() {
            let mut lines =
                vec!["### Insights on topics this user has explored".to_owned()];
            for item in &fallback {
                lines.push(format!("- {}", item.insight.content));
            }
            sections.push(lines.join("\n"));

            related =
                collect_evidence(fallback.iter().map(|i| (&i.topics, i.insight.importance_score)));
        }
    }

    // 4. Semantic shortlist. Failures fall through to graph-only context.
    if let Some(vector) = vector {
        match vector.search(query, Some(user_id), VECTOR_HIT_LIMIT).await {
            Ok(hits) => {
                let strong: Vec<_> = hits
                    .into_iter()
                    .filter(|h| h.score >= VECTOR_SCORE_FLOOR)
                    .collect();
                if !strong.is_empty() {
                    let mut lines = vec!["### Semantically similar past material".to_owned()];
                    for hit in &strong {
                        lines.push(format!("- {}", hit.content));
                    }
                    sections.push(lines.join("\n"));
                }
            }
            Err(e) => {
                warn!("vector search unavailable, proceeding with graph-only context: {e}");
            }
        }
    }

    // Suggested topics: edge neighbors of the user's engaged topics.
    let suggested_topics = if user_topics.is_empty() {
        Vec::new()
    } else {
        let names: Vec<String> = user_topics.iter().map(|t| t.name.clone()).collect();
        database
            .get_suggested_topics(&names, SUGGESTED_TOPIC_LIMIT)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect()
    };

    Ok(AssembledContext {
        prompt: if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        },
        related,
        suggested_topics,
    })
}

/// Flatten (topics, score) pairs into per-topic evidence, keeping the
/// strongest score per topic.
fn collect_evidence<'a>(
    items: impl Iterator<Item = (&'a Vec<String>, f64)>,
) -> Vec<RelatedContextItem> {
    let mut best: HashMap<String, f64> = HashMap::new();
    for (topics, score) in items {
        for topic in topics {
            let entry = best.entry(topic.clone()).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
    }

    let mut evidence: Vec<RelatedContextItem> = best
        .into_iter()
        .map(|(topic, score)| RelatedContextItem { topic, score })
        .collect();
    evidence.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    evidence
}
