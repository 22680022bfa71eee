// ABOUTME: Integration tests for the chat pipeline: turns, grounding, PII gate, streaming
// ABOUTME: Verifies persist ordering and stream/blocking equivalence under a scripted provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{
    classification_json, create_test_resources, pii_json, MockLlmProvider, STREAM_FAILURE,
};
use mnemograph::services::chat::{ChatTurnRequest, IncomingMessage, StreamFrame};

fn turn_request(user_id: &str, conversation_id: Option<String>, text: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        user_id: user_id.to_owned(),
        conversation_id,
        messages: vec![IncomingMessage {
            role: "user".to_owned(),
            content: text.to_owned(),
        }],
        global_sharing_consent: None,
    }
}

// ============================================================================
// Blocking Turns
// ============================================================================

#[tokio::test]
async fn first_turn_creates_conversation_and_persists_both_messages() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "Lifetimes tie borrows to scopes.",
        &pii_json(false, &[]),
    ]);
    let resources = create_test_resources(provider.clone()).await;

    let response = resources
        .pipeline
        .handle_turn(turn_request("alice", None, "what are rust lifetimes?"))
        .await
        .unwrap();

    assert_eq!(response.response, "Lifetimes tie borrows to scopes.");
    assert!(!response.global_sharing_blocked);
    assert!(response.pii_detection.is_none());

    let messages = resources
        .database
        .get_messages(&response.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "what are rust lifetimes?");
    assert_eq!(messages[1].role, "assistant");

    let conv = resources
        .database
        .get_conversation(&response.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.message_count, 2);
    assert!(!conv.processed);
}

#[tokio::test]
async fn input_validation_rejects_malformed_turns() {
    let provider = MockLlmProvider::scripted(&[]);
    let resources = create_test_resources(provider).await;

    let missing_user = resources
        .pipeline
        .handle_turn(turn_request("", None, "hello"))
        .await;
    assert_eq!(missing_user.unwrap_err().http_status(), 400);

    let empty_messages = resources
        .pipeline
        .handle_turn(ChatTurnRequest {
            user_id: "u".to_owned(),
            conversation_id: None,
            messages: Vec::new(),
            global_sharing_consent: None,
        })
        .await;
    assert_eq!(empty_messages.unwrap_err().http_status(), 400);

    let assistant_last = resources
        .pipeline
        .handle_turn(ChatTurnRequest {
            user_id: "u".to_owned(),
            conversation_id: None,
            messages: vec![IncomingMessage {
                role: "assistant".to_owned(),
                content: "I am out of turn".to_owned(),
            }],
            global_sharing_consent: None,
        })
        .await;
    assert_eq!(assistant_last.unwrap_err().http_status(), 400);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let provider = MockLlmProvider::scripted(&[]);
    let resources = create_test_resources(provider).await;

    let result = resources
        .pipeline
        .handle_turn(turn_request("u", Some("no-such-conversation".to_owned()), "hi"))
        .await;
    assert_eq!(result.unwrap_err().http_status(), 404);
}

#[tokio::test]
async fn foreign_conversation_is_not_found() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(true, "short"),
        "hello!",
    ]);
    let resources = create_test_resources(provider).await;

    let first = resources
        .pipeline
        .handle_turn(turn_request("owner", None, "hi"))
        .await
        .unwrap();

    let stolen = resources
        .pipeline
        .handle_turn(turn_request("intruder", Some(first.conversation_id), "hi"))
        .await;
    assert_eq!(stolen.unwrap_err().http_status(), 404);
}

#[tokio::test]
async fn trivial_turns_use_short_budget_and_skip_the_pii_probe() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(true, "short"),
        "hello there!",
    ]);
    let resources = create_test_resources(provider.clone()).await;

    let response = resources
        .pipeline
        .handle_turn(turn_request("greeter", None, "hi"))
        .await
        .unwrap();

    assert_eq!(response.response, "hello there!");
    assert!(response.pii_detection.is_none());

    // Exactly two model calls: classify + complete. No PII probe.
    assert_eq!(provider.request_count(), 2);

    let completion = provider.request(1);
    assert_eq!(completion.max_tokens, Some(100));
}

#[tokio::test]
async fn substantive_turns_get_medium_budget_and_grounded_prompt() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "grounded answer",
        &pii_json(false, &[]),
    ]);
    let resources = create_test_resources(provider.clone()).await;

    // Seed a personal insight so context assembly has something to ground on.
    resources.database.get_or_create_user("bob").await.unwrap();
    let conv = resources.database.create_conversation("bob").await.unwrap();
    let topic = resources.database.get_or_create_topic("kubernetes").await.unwrap();
    let insight = resources
        .database
        .save_insight(&conv.id, "bob", "bob runs a homelab k8s cluster", 0.7)
        .await
        .unwrap();
    resources
        .database
        .link_insight_to_topics(&insight.id, &[topic.id])
        .await
        .unwrap();

    let response = resources
        .pipeline
        .handle_turn(turn_request("bob", None, "how do I debug a crashloop?"))
        .await
        .unwrap();

    assert_eq!(provider.request_count(), 3);
    let completion = provider.request(1);
    assert_eq!(completion.max_tokens, Some(512));

    // The system prompt carries the personal-insight section.
    let system = &completion.messages[0].content;
    assert!(system.contains("bob runs a homelab k8s cluster"));
    assert!(system.contains("[topics: kubernetes]"));

    // The evidence is echoed back with topic and score.
    assert_eq!(response.related_context.len(), 1);
    assert_eq!(response.related_context[0].topic, "kubernetes");
    assert!((response.related_context[0].score - 0.7).abs() < 1e-9);
}

// ============================================================================
// PII Gate
// ============================================================================

#[tokio::test]
async fn detected_pii_with_declined_consent_blocks_the_conversation() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "I noted that address.",
        &pii_json(true, &["email"]),
    ]);
    let resources = create_test_resources(provider).await;

    let mut request = turn_request("carol", None, "my email is carol@example.com");
    request.global_sharing_consent = Some(false);

    let response = resources.pipeline.handle_turn(request).await.unwrap();

    let detection = response.pii_detection.unwrap();
    assert!(detection.detected);
    assert!(detection.types.contains(&"email".to_owned()));
    assert!(response.global_sharing_blocked);

    assert!(resources
        .database
        .is_conversation_global_sharing_blocked(&response.conversation_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn detected_pii_with_omitted_consent_returns_payload_without_blocking() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "Understood.",
        &pii_json(true, &["phone"]),
    ]);
    let resources = create_test_resources(provider).await;

    let response = resources
        .pipeline
        .handle_turn(turn_request("dave", None, "call me at 555-0100"))
        .await
        .unwrap();

    assert!(response.pii_detection.unwrap().detected);
    assert!(!response.global_sharing_blocked);
    assert!(!resources
        .database
        .is_conversation_global_sharing_blocked(&response.conversation_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn positive_consent_is_a_noop_on_the_flag() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "Noted.",
        &pii_json(true, &["name"]),
    ]);
    let resources = create_test_resources(provider).await;

    let mut request = turn_request("erin", None, "I'm Erin from accounting");
    request.global_sharing_consent = Some(true);

    let response = resources.pipeline.handle_turn(request).await.unwrap();
    assert!(!response.global_sharing_blocked);
}

#[tokio::test]
async fn already_blocked_conversation_skips_the_probe() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(false, "medium"),
        "first answer",
        &pii_json(true, &["email"]),
        // Second turn: classify + complete only; a probe would pop a third.
        &classification_json(false, "medium"),
        "second answer",
    ]);
    let resources = create_test_resources(provider.clone()).await;

    let mut request = turn_request("frank", None, "email: frank@example.com");
    request.global_sharing_consent = Some(false);
    let first = resources.pipeline.handle_turn(request).await.unwrap();
    assert!(first.global_sharing_blocked);

    let second = resources
        .pipeline
        .handle_turn(turn_request(
            "frank",
            Some(first.conversation_id),
            "follow-up question",
        ))
        .await
        .unwrap();

    assert!(second.global_sharing_blocked);
    assert!(second.pii_detection.is_none());
    assert_eq!(provider.request_count(), 5);
}

// ============================================================================
// Streaming
// ============================================================================

async fn collect_frames(
    mut rx: tokio::sync::mpsc::Receiver<StreamFrame>,
) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn stream_frames_concatenate_to_the_blocking_response() {
    const ANSWER: &str = "Streaming and blocking must agree on every byte.";

    // Blocking run.
    let provider = MockLlmProvider::scripted(&[
        &classification_json(true, "short"),
        ANSWER,
    ]);
    let resources = create_test_resources(provider).await;
    let blocking = resources
        .pipeline
        .handle_turn(turn_request("stream-user", None, "hi"))
        .await
        .unwrap();

    // Streaming run with an identical script.
    let provider = MockLlmProvider::scripted(&[
        &classification_json(true, "short"),
        ANSWER,
    ]);
    let resources = create_test_resources(provider).await;
    let rx = resources
        .pipeline
        .handle_turn_stream(turn_request("stream-user", None, "hi"))
        .await
        .unwrap();
    let frames = collect_frames(rx).await;

    let mut assembled = String::new();
    let mut conversation_id = None;
    for frame in &frames {
        match frame {
            StreamFrame::Text { text, .. } => assembled.push_str(text),
            StreamFrame::Done {
                conversation_id: id,
            } => conversation_id = Some(id.clone()),
            StreamFrame::Error { message } => panic!("unexpected error frame: {message}"),
        }
    }

    assert_eq!(assembled, blocking.response);

    // The done frame closed the stream and the assistant message landed.
    let conversation_id = conversation_id.expect("missing done frame");
    let messages = resources
        .database
        .get_messages(&conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, ANSWER);
}

#[tokio::test]
async fn stream_frame_wire_shapes() {
    let text = StreamFrame::Text {
        text: "chunk".to_owned(),
        conversation_id: "c1".to_owned(),
    };
    assert_eq!(
        text.to_json(),
        serde_json::json!({"text": "chunk", "conversationId": "c1"})
    );

    let done = StreamFrame::Done {
        conversation_id: "c1".to_owned(),
    };
    assert_eq!(
        done.to_json(),
        serde_json::json!({"done": true, "conversationId": "c1"})
    );

    let error = StreamFrame::Error {
        message: "boom".to_owned(),
    };
    assert_eq!(error.to_json(), serde_json::json!({"error": "boom"}));
}

#[tokio::test]
async fn mid_stream_failure_emits_error_and_discards_partial_message() {
    let provider = MockLlmProvider::scripted(&[
        &classification_json(true, "short"),
        STREAM_FAILURE,
    ]);
    let resources = create_test_resources(provider).await;

    let rx = resources
        .pipeline
        .handle_turn_stream(turn_request("ghost", None, "hi"))
        .await
        .unwrap();
    let frames = collect_frames(rx).await;

    assert!(matches!(frames.last(), Some(StreamFrame::Error { .. })));
    assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Done { .. })));

    // Only the user message survived: the partial assistant text is gone.
    let conversations = resources
        .database
        .get_user_active_conversations("ghost", 10)
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = resources
        .database
        .get_messages(&conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}
