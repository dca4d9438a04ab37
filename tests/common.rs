use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use action_relay::{
    dispatcher::Dispatcher,
    handlers::ActionHandler,
    models::{
        action::ActionCatalog,
        completion::CompletionMessage,
        notification::{InboundMessage, Notification},
        result::HandlerResult,
        retry::RetryConfig,
    },
    pipeline::Pipeline,
    registry::HandlerRegistry,
    replay::{NoReplayGuard, ReplayGuard},
    responder::{CompletionSink, Responder},
};
use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

pub const REPLY_QUEUE: &str = "acks.201.relay";

/// Keeps every completion it is given.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<CompletionMessage>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<CompletionMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSink for RecordingSink {
    async fn send_completion(&self, completion: &CompletionMessage) -> Result<(), Error> {
        self.sent.lock().unwrap().push(completion.clone());
        Ok(())
    }
}

/// Refuses every completion, counting the attempts.
#[derive(Default)]
pub struct BrokenSink {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl CompletionSink for BrokenSink {
    async fn send_completion(&self, _completion: &CompletionMessage) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("reply channel closed"))
    }
}

/// Returns a fixed result and counts its invocations.
pub struct SpyHandler {
    calls: AtomicUsize,
    result: HandlerResult,
}

impl SpyHandler {
    pub fn new(result: HandlerResult) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionHandler for SpyHandler {
    fn kind(&self) -> &'static str {
        "spy"
    }

    async fn process(&self, _notification: &Notification) -> Result<HandlerResult, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2,
    }
}

pub fn responder(sink: Arc<dyn CompletionSink>) -> Responder {
    Responder::new(sink, fast_retry(2))
}

pub fn pipeline_with(
    registry: HandlerRegistry,
    catalog: ActionCatalog,
    replay: Arc<dyn ReplayGuard>,
    handler_timeout: Duration,
) -> Pipeline {
    Pipeline::new(
        Arc::new(catalog),
        Dispatcher::new(Arc::new(registry), handler_timeout),
        replay,
    )
}

pub fn pipeline(registry: HandlerRegistry) -> Pipeline {
    pipeline_with(
        registry,
        ActionCatalog::default(),
        Arc::new(NoReplayGuard),
        Duration::from_secs(5),
    )
}

pub fn inbound(correlation_id: &str, body: &Value) -> InboundMessage {
    InboundMessage {
        message_id: Some(format!("msg-{}", correlation_id)),
        correlation_id: Some(correlation_id.to_string()),
        reply_to: Some(REPLY_QUEUE.to_string()),
        context_token: None,
        body: serde_json::to_vec(body).unwrap(),
    }
}

pub fn unique_correlation() -> String {
    uuid::Uuid::new_v4().to_string()
}
