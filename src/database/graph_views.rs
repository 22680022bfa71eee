// ABOUTME: Visualization aggregates: topic nodes with frequency tiers and undirected edges
// ABOUTME: Edges are returned only when both endpoints are present in the node set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

use std::collections::HashMap;

use serde::Serialize;
use sqlx::Row;

use super::Database;
use crate::errors::AppResult;

/// A topic node sized for visualization
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Topic id (stable key)
    pub id: String,
    /// Normalized topic name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// `COUNT(DISTINCT conversation_id)` in the requested scope
    pub frequency: i64,
    /// `frequency / max(frequency)` over the returned node set
    pub normalized_frequency: f64,
}

/// An undirected edge between two present nodes
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    /// One endpoint topic id
    pub source: String,
    /// Other endpoint topic id
    pub target: String,
    /// Strength in `[0, 1]`
    pub strength: f64,
    /// Relation kind
    #[serde(rename = "type")]
    pub relation_type: String,
}

/// Aggregate counts for a map response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    /// Nodes in the map
    pub topic_count: usize,
    /// Edges in the map
    pub relation_count: usize,
    /// Insights in scope
    pub insight_count: i64,
    /// Conversations in scope
    pub conversation_count: i64,
}

/// Node/edge aggregate for one scope (a user, or global)
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeMap {
    /// Topic nodes, most frequent first
    pub nodes: Vec<GraphNode>,
    /// Edges between present nodes
    pub edges: Vec<GraphEdge>,
    /// Aggregate counts
    pub stats: GraphStats,
}

/// Raw relation row used while filtering edges to the node set
struct RelationRow {
    source: String,
    target: String,
    strength: f64,
    relation_type: String,
}

impl Database {
    /// Knowledge map for one user: topics from their non-deleted
    /// conversations, frequency scoped to their conversations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_user_knowledge_map(&self, user_id: &str) -> AppResult<KnowledgeMap> {
        let rows = sqlx::query(
            r"
            SELECT t.id, t.name, t.description,
                   COUNT(DISTINCT ct.conversation_id) AS frequency
            FROM topics t
            JOIN conversation_topics ct ON ct.topic_id = t.id
            JOIN conversations c ON c.id = ct.conversation_id
            WHERE c.user_id = $1 AND c.deleted = 0
            GROUP BY t.id
            ORDER BY frequency DESC, t.name ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let nodes = Self::build_nodes(
            rows.iter()
                .map(|r| {
                    (
                        r.get::<String, _>("id"),
                        r.get::<String, _>("name"),
                        r.get::<Option<String>, _>("description"),
                        r.get::<i64, _>("frequency"),
                    )
                })
                .collect(),
        );
        let edges = self.edges_among(&nodes).await?;

        let insight_count = self.count_user_insights(user_id).await?;
        let conversation_count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM conversations WHERE user_id = $1 AND deleted = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .get("n");

        let stats = GraphStats {
            topic_count: nodes.len(),
            relation_count: edges.len(),
            insight_count,
            conversation_count,
        };

        Ok(KnowledgeMap { nodes, edges, stats })
    }

    /// Global knowledge map: every topic, frequency over all conversations.
    /// Topics created by hand (no conversations yet) appear at frequency 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_global_knowledge_map(&self) -> AppResult<KnowledgeMap> {
        let rows = sqlx::query(
            r"
            SELECT t.id, t.name, t.description,
                   COUNT(DISTINCT ct.conversation_id) AS frequency
            FROM topics t
            LEFT JOIN conversation_topics ct ON ct.topic_id = t.id
            GROUP BY t.id
            ORDER BY frequency DESC, t.name ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let nodes = Self::build_nodes(
            rows.iter()
                .map(|r| {
                    (
                        r.get::<String, _>("id"),
                        r.get::<String, _>("name"),
                        r.get::<Option<String>, _>("description"),
                        r.get::<i64, _>("frequency"),
                    )
                })
                .collect(),
        );
        let edges = self.edges_among(&nodes).await?;

        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM insights) AS insight_count,
                (SELECT COUNT(*) FROM conversations WHERE deleted = 0) AS conversation_count
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        let stats = GraphStats {
            topic_count: nodes.len(),
            relation_count: edges.len(),
            insight_count: row.get("insight_count"),
            conversation_count: row.get("conversation_count"),
        };

        Ok(KnowledgeMap { nodes, edges, stats })
    }

    fn build_nodes(raw: Vec<(String, String, Option<String>, i64)>) -> Vec<GraphNode> {
        let max_frequency = raw.iter().map(|(_, _, _, f)| *f).max().unwrap_or(0);

        raw.into_iter()
            .map(|(id, name, description, frequency)| GraphNode {
                id,
                name,
                description,
                frequency,
                normalized_frequency: if max_frequency > 0 {
                    frequency as f64 / max_frequency as f64
                } else {
                    0.0
                },
            })
            .collect()
    }

    /// Relations restricted to the node set, directions unioned and
    /// deduplicated by unordered id pair (strongest wins).
    async fn edges_among(&self, nodes: &[GraphNode]) -> AppResult<Vec<GraphEdge>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let node_ids: std::collections::HashSet<&str> =
            nodes.iter().map(|n| n.id.as_str()).collect();

        let rows = sqlx::query(
            "SELECT source_topic_id, target_topic_id, strength, relation_type FROM topic_relations",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_pair: HashMap<(String, String), RelationRow> = HashMap::new();
        for r in rows {
            let source: String = r.get("source_topic_id");
            let target: String = r.get("target_topic_id");
            if !node_ids.contains(source.as_str()) || !node_ids.contains(target.as_str()) {
                continue;
            }

            let strength: f64 = r.get("strength");
            let relation_type: String = r.get("relation_type");
            let key = if source <= target {
                (source.clone(), target.clone())
            } else {
                (target.clone(), source.clone())
            };

            let replace = by_pair
                .get(&key)
                .map_or(true, |existing| strength > existing.strength);
            if replace {
                by_pair.insert(
                    key,
                    RelationRow {
                        source,
                        target,
                        strength,
                        relation_type,
                    },
                );
            }
        }

        let mut edges: Vec<GraphEdge> = by_pair
            .into_values()
            .map(|r| GraphEdge {
                source: r.source,
                target: r.target,
                strength: r.strength,
                relation_type: r.relation_type,
            })
            .collect();
        edges.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
        });

        Ok(edges)
    }
}
