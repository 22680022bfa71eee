// ABOUTME: Domain services between the HTTP surface and the store/adapters
// ABOUTME: Context assembly, the chat turn pipeline, and the deferred processor
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

pub mod chat;
pub mod context;
pub mod processor;

pub use chat::{ChatPipeline, ChatTurnRequest, ChatTurnResponse, IncomingMessage, StreamFrame};
pub use context::{AssembledContext, RelatedContextItem};
pub use processor::{ConversationProcessor, ProcessedConversation, ProcessorRunResult};
