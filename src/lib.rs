// ABOUTME: Library entry point for the Mnemograph conversational knowledge-graph server
// ABOUTME: Chat relay plus per-user and global topic/insight graphs with deferred promotion
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

#![deny(unsafe_code)]

//! # Mnemograph
//!
//! A conversational knowledge-graph server: it mediates chat sessions
//! against a remote LLM while incrementally building, per user and globally,
//! a typed graph of topics, insights, conversation summaries and the edges
//! relating them. Retrieval from that graph feeds back into subsequent
//! prompts, giving the assistant persistent cross-session memory.
//!
//! ## Architecture
//!
//! Layers, top to bottom; each knows nothing of the layers above:
//! - [`routes`]: the HTTP surface (axum)
//! - [`services`]: the chat turn pipeline and the deferred processor
//! - [`llm`]: typed operations over a remote chat-completions endpoint
//! - [`database`]: the relational graph store (SQLite via sqlx)
//! - [`vector`]: best-effort adapter over a remote embedding index
//!
//! Insight extraction never runs on the chat hot path: the deferred
//! processor scans for idle conversations and promotes them into the graph
//! under a consent/PII gate.

pub mod config;
pub mod database;
pub mod errors;
pub mod llm;
pub mod resources;
pub mod routes;
pub mod services;
pub mod vector;

// Re-export dependencies that appear in public signatures so tests and
// downstream users resolve the same versions.
pub use chrono;
pub use serde_json;
pub use uuid;
