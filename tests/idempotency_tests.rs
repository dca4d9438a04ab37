//! Replay guard against a real Redis. Run with `cargo test -- --ignored` on a
//! machine with Docker.

use std::{sync::Arc, time::Duration};

use action_relay::{
    clients::redis::RedisReplayGuard,
    models::{action::ActionCatalog, result::HandlerResult},
    pipeline::Outcome,
    registry::HandlerRegistry,
    replay::ReplayGuard,
};
use anyhow::Result;
use serde_json::json;
use testcontainers::{
    ContainerAsync, GenericImage,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

use crate::common::{
    RecordingSink, SpyHandler, fast_retry, inbound, pipeline_with, responder, unique_correlation,
};

async fn start_redis() -> Result<(ContainerAsync<GenericImage>, String)> {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await?;

    let url = format!(
        "redis://{}:{}",
        container.get_host().await?,
        container.get_host_port_ipv4(6379.tcp()).await?
    );

    Ok((container, url))
}

/// Test: Completed correlation ids are remembered
#[tokio::test]
#[ignore = "requires docker"]
async fn test_completed_ids_are_remembered() -> Result<()> {
    let (_container, url) = start_redis().await?;
    let guard = RedisReplayGuard::connect(&url, 60, fast_retry(3)).await?;

    let correlation_id = unique_correlation();
    assert!(!guard.is_completed(&correlation_id).await?);

    guard.mark_completed(&correlation_id).await?;
    assert!(guard.is_completed(&correlation_id).await?);

    // Marking twice is harmless.
    guard.mark_completed(&correlation_id).await?;
    assert!(guard.is_completed(&correlation_id).await?);

    Ok(())
}

/// Test: Replay markers expire after their TTL
#[tokio::test]
#[ignore = "requires docker"]
async fn test_replay_markers_expire() -> Result<()> {
    let (_container, url) = start_redis().await?;
    let guard = RedisReplayGuard::connect(&url, 1, fast_retry(3)).await?;

    let correlation_id = unique_correlation();
    guard.mark_completed(&correlation_id).await?;
    assert!(guard.is_completed(&correlation_id).await?);

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(!guard.is_completed(&correlation_id).await?);

    Ok(())
}

/// Test: Two relay instances sharing Redis complete a notification once
#[tokio::test]
#[ignore = "requires docker"]
async fn test_shared_guard_deduplicates_across_instances() -> Result<()> {
    let (_container, url) = start_redis().await?;

    let spy = SpyHandler::new(HandlerResult::success("done"));
    let mut instances = Vec::new();
    for _ in 0..2 {
        let mut registry = HandlerRegistry::new();
        registry.register("taskadd", "taskadd", spy.clone())?;
        let guard = RedisReplayGuard::connect(&url, 60, fast_retry(3)).await?;
        instances.push(pipeline_with(
            registry,
            ActionCatalog::default(),
            Arc::new(guard),
            Duration::from_secs(5),
        ));
    }

    let sink = Arc::new(RecordingSink::default());
    let responder = responder(sink.clone());
    let message = inbound(
        &unique_correlation(),
        &json!({ "action_name": "taskadd", "incident": { "id": 42 } }),
    );

    let first = instances[0].handle(&message, &responder).await;
    let second = instances[1].handle(&message, &responder).await;

    assert!(matches!(first, Outcome::Completed(_)));
    assert!(matches!(second, Outcome::Duplicate));
    assert_eq!(spy.calls(), 1);
    assert_eq!(sink.sent().len(), 1);

    Ok(())
}
