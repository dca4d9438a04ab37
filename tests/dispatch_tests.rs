use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use action_relay::{
    clients::remote::RemoteError,
    handlers::ActionHandler,
    models::{
        action::{ActionCatalog, ActionDefinition},
        completion::{CompletionMessage, MAX_COMPLETION_MESSAGE_CHARS, WireCompletion},
        notification::{InboundMessage, Notification},
        result::{FailureReason, HandlerResult},
    },
    pipeline::Outcome,
    registry::HandlerRegistry,
    replay::{MemoryReplayGuard, NoReplayGuard},
    responder::Responder,
};
use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::json;

use crate::common::{
    BrokenSink, RecordingSink, SpyHandler, fast_retry, inbound, pipeline, pipeline_with,
    responder, unique_correlation,
};

struct FailingHandler {
    error: fn() -> Error,
}

#[async_trait]
impl ActionHandler for FailingHandler {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn process(&self, _notification: &Notification) -> Result<HandlerResult, Error> {
        Err((self.error)())
    }
}

struct PanickingHandler;

#[async_trait]
impl ActionHandler for PanickingHandler {
    fn kind(&self) -> &'static str {
        "panicking"
    }

    async fn process(&self, _notification: &Notification) -> Result<HandlerResult, Error> {
        panic!("reference table index out of range");
    }
}

struct StalledHandler;

#[async_trait]
impl ActionHandler for StalledHandler {
    fn kind(&self) -> &'static str {
        "stalled"
    }

    async fn process(&self, _notification: &Notification) -> Result<HandlerResult, Error> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(HandlerResult::success("too late"))
    }
}

fn incident_action(action: &str, record_id: i64) -> serde_json::Value {
    json!({
        "action_name": action,
        "object_type": "incident",
        "incident": { "id": record_id, "name": "Suspicious login" }
    })
}

fn registry_with(action: &str, handler: Arc<dyn ActionHandler>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(action, "relay", handler).unwrap();
    registry
}

fn expect_completed(outcome: Outcome) -> CompletionMessage {
    match outcome {
        Outcome::Completed(completion) => completion,
        other => panic!("expected a completion, got {:?}", other),
    }
}

/// Test: A handled notification yields exactly one success completion
#[tokio::test]
async fn test_handled_notification_completes_once() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let pipeline = pipeline(registry_with("taskadd", spy.clone()));
    let sink = Arc::new(RecordingSink::default());
    let responder = responder(sink.clone());

    let correlation_id = unique_correlation();
    let outcome = pipeline
        .handle(&inbound(&correlation_id, &incident_action("taskadd", 42)), &responder)
        .await;

    let completion = expect_completed(outcome);
    assert!(completion.success);
    assert_eq!(completion.message.as_deref(), Some("done"));
    assert_eq!(spy.calls(), 1);

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation.correlation_id, correlation_id);
    assert_eq!(sent[0].correlation.reply_to, crate::common::REPLY_QUEUE);

    Ok(())
}

/// Test: Unknown actions fail without touching any handler
#[tokio::test]
async fn test_unhandled_action_is_reported() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let pipeline = pipeline(registry_with("taskadd", spy.clone()));
    let sink = Arc::new(RecordingSink::default());

    let outcome = pipeline
        .handle(
            &inbound(&unique_correlation(), &incident_action("escalate", 7)),
            &responder(sink.clone()),
        )
        .await;

    let completion = expect_completed(outcome);
    assert!(!completion.success);
    assert_eq!(completion.reason, Some(FailureReason::UnhandledAction));
    assert_eq!(spy.calls(), 0);
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}

/// Test: Handler errors become handler faults carrying the error text
#[tokio::test]
async fn test_handler_error_becomes_fault() -> Result<()> {
    let handler = Arc::new(FailingHandler {
        error: || anyhow!("reference table unavailable"),
    });
    let pipeline = pipeline(registry_with("file-lookup", handler));
    let sink = Arc::new(RecordingSink::default());

    let completion = expect_completed(
        pipeline
            .handle(
                &inbound(&unique_correlation(), &incident_action("file_lookup", 3)),
                &responder(sink.clone()),
            )
            .await,
    );

    assert_eq!(completion.reason, Some(FailureReason::HandlerFault));
    assert!(
        completion
            .message
            .as_deref()
            .is_some_and(|m| m.contains("reference table unavailable"))
    );

    Ok(())
}

/// Test: Remote API errors keep their classification
#[tokio::test]
async fn test_remote_errors_are_classified() -> Result<()> {
    fn rejected() -> Error {
        RemoteError::Validation {
            status: 400,
            body: "name is required".to_string(),
        }
        .into()
    }
    fn expired() -> Error {
        RemoteError::Authentication("session expired".to_string()).into()
    }
    fn unavailable() -> Error {
        RemoteError::Status {
            status: 503,
            body: String::new(),
        }
        .into()
    }

    let cases: [(fn() -> Error, FailureReason); 3] = [
        (rejected, FailureReason::RemoteValidation),
        (expired, FailureReason::Authentication),
        (unavailable, FailureReason::Transport),
    ];

    for (error, expected) in cases {
        let pipeline = pipeline(registry_with("taskadd", Arc::new(FailingHandler { error })));
        let sink = Arc::new(RecordingSink::default());

        let completion = expect_completed(
            pipeline
                .handle(
                    &inbound(&unique_correlation(), &incident_action("taskadd", 1)),
                    &responder(sink),
                )
                .await,
        );
        assert_eq!(completion.reason, Some(expected));
    }

    Ok(())
}

/// Test: A panicking handler is contained and reported
#[tokio::test]
async fn test_handler_panic_is_contained() -> Result<()> {
    let pipeline = pipeline(registry_with("file-lookup", Arc::new(PanickingHandler)));
    let sink = Arc::new(RecordingSink::default());

    let completion = expect_completed(
        pipeline
            .handle(
                &inbound(&unique_correlation(), &incident_action("file-lookup", 5)),
                &responder(sink.clone()),
            )
            .await,
    );

    assert_eq!(completion.reason, Some(FailureReason::HandlerFault));
    assert_eq!(
        completion.message.as_deref(),
        Some("reference table index out of range")
    );
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}

/// Test: A handler exceeding its window yields a timeout completion
#[tokio::test]
async fn test_slow_handler_times_out() -> Result<()> {
    let pipeline = pipeline_with(
        registry_with("taskadd", Arc::new(StalledHandler)),
        ActionCatalog::default(),
        Arc::new(NoReplayGuard),
        Duration::from_millis(50),
    );
    let sink = Arc::new(RecordingSink::default());

    let completion = expect_completed(
        pipeline
            .handle(
                &inbound(&unique_correlation(), &incident_action("taskadd", 9)),
                &responder(sink.clone()),
            )
            .await,
    );

    assert_eq!(completion.reason, Some(FailureReason::HandlerTimeout));
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}

/// Test: Oversized failure text is truncated on the wire
#[tokio::test]
async fn test_long_failure_message_is_truncated() -> Result<()> {
    let handler = Arc::new(FailingHandler {
        error: || anyhow!("{}", "x".repeat(5_000)),
    });
    let pipeline = pipeline(registry_with("taskadd", handler));
    let sink = Arc::new(RecordingSink::default());

    let completion = expect_completed(
        pipeline
            .handle(
                &inbound(&unique_correlation(), &incident_action("taskadd", 11)),
                &responder(sink),
            )
            .await,
    );

    let wire: WireCompletion = serde_json::from_slice(&completion.payload()?)?;
    assert_eq!(wire.message_type, 1);
    assert!(wire.complete);
    assert_eq!(wire.reason, Some(FailureReason::HandlerFault));
    assert_eq!(wire.message.chars().count(), MAX_COMPLETION_MESSAGE_CHARS);
    assert!(wire.message.ends_with('…'));

    Ok(())
}

/// Test: Malformed bodies with reply routing get a failure completion
#[tokio::test]
async fn test_malformed_body_with_reply_routing() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let pipeline = pipeline(registry_with("taskadd", spy.clone()));
    let sink = Arc::new(RecordingSink::default());

    let mut message = inbound(&unique_correlation(), &json!({}));
    message.body = b"{ not json".to_vec();

    let completion = expect_completed(pipeline.handle(&message, &responder(sink.clone())).await);

    assert_eq!(completion.reason, Some(FailureReason::MalformedNotification));
    assert_eq!(spy.calls(), 0);
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}

/// Test: Bodies that name no record are malformed
#[tokio::test]
async fn test_body_without_record_is_malformed() -> Result<()> {
    let pipeline = pipeline(HandlerRegistry::new());
    let sink = Arc::new(RecordingSink::default());

    let body = json!({ "action_name": "taskadd", "object_type": "incident" });
    let completion = expect_completed(
        pipeline
            .handle(&inbound(&unique_correlation(), &body), &responder(sink))
            .await,
    );

    assert_eq!(completion.reason, Some(FailureReason::MalformedNotification));

    Ok(())
}

/// Test: Messages without reply routing are dropped silently
#[tokio::test]
async fn test_message_without_reply_routing_is_dropped() -> Result<()> {
    let pipeline = pipeline(HandlerRegistry::new());
    let sink = Arc::new(RecordingSink::default());

    let message = InboundMessage {
        message_id: Some("orphan".to_string()),
        body: b"garbage".to_vec(),
        ..InboundMessage::default()
    };

    let outcome = pipeline.handle(&message, &responder(sink.clone())).await;

    assert!(matches!(outcome, Outcome::Dropped));
    assert!(sink.sent().is_empty());

    Ok(())
}

/// Test: Action ids resolve through the catalog
#[tokio::test]
async fn test_action_id_resolves_through_catalog() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let catalog = ActionCatalog::from_definitions([ActionDefinition {
        id: 17,
        name: "Add Task".to_string(),
    }]);
    let pipeline = pipeline_with(
        registry_with("add-task", spy.clone()),
        catalog,
        Arc::new(NoReplayGuard),
        Duration::from_secs(5),
    );
    let sink = Arc::new(RecordingSink::default());

    let body = json!({ "action_id": 17, "incident": { "id": 8 } });
    let completion = expect_completed(
        pipeline
            .handle(&inbound(&unique_correlation(), &body), &responder(sink))
            .await,
    );

    assert!(completion.success);
    assert_eq!(spy.calls(), 1);

    Ok(())
}

/// Test: Redelivered correlation ids are not processed twice
#[tokio::test]
async fn test_redelivery_is_skipped_by_replay_guard() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let pipeline = pipeline_with(
        registry_with("taskadd", spy.clone()),
        ActionCatalog::default(),
        Arc::new(MemoryReplayGuard::new(Duration::from_secs(60))),
        Duration::from_secs(5),
    );
    let sink = Arc::new(RecordingSink::default());
    let responder = responder(sink.clone());

    let message = inbound(&unique_correlation(), &incident_action("taskadd", 42));

    let first = pipeline.handle(&message, &responder).await;
    let second = pipeline.handle(&message, &responder).await;

    assert!(matches!(first, Outcome::Completed(_)));
    assert!(matches!(second, Outcome::Duplicate));
    assert_eq!(spy.calls(), 1);
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}

/// Test: A completion that cannot be published is retried, then surfaced
#[tokio::test]
async fn test_unpublishable_completion_is_undeliverable() -> Result<()> {
    let spy = SpyHandler::new(HandlerResult::success("done"));
    let pipeline = pipeline_with(
        registry_with("taskadd", spy.clone()),
        ActionCatalog::default(),
        Arc::new(MemoryReplayGuard::new(Duration::from_secs(60))),
        Duration::from_secs(5),
    );

    let broken = Arc::new(BrokenSink::default());
    let broken_responder = Responder::new(broken.clone(), fast_retry(3));
    let message = inbound(&unique_correlation(), &incident_action("taskadd", 42));

    let outcome = pipeline.handle(&message, &broken_responder).await;
    assert!(matches!(outcome, Outcome::Undeliverable(_)));
    assert_eq!(broken.attempts.load(Ordering::SeqCst), 3);

    // Not marked completed, so the redelivery is processed again.
    let sink = Arc::new(RecordingSink::default());
    let outcome = pipeline.handle(&message, &responder(sink.clone())).await;
    assert!(matches!(outcome, Outcome::Completed(_)));
    assert_eq!(spy.calls(), 2);
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}
