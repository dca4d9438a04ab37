use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    models::{
        completion::CompletionMessage, notification::CorrelationToken, result::HandlerResult,
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

/// Transport a completion is written to.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn send_completion(&self, completion: &CompletionMessage) -> Result<(), Error>;
}

pub struct Responder {
    sink: Arc<dyn CompletionSink>,
    retry_config: RetryConfig,
}

impl Responder {
    pub fn new(sink: Arc<dyn CompletionSink>, retry_config: RetryConfig) -> Self {
        Self { sink, retry_config }
    }

    /// Builds and sends the one completion owed for `correlation`.
    ///
    /// Publishing is retried with backoff; an error means nothing reached the
    /// broker.
    pub async fn complete(
        &self,
        correlation: &CorrelationToken,
        result: &HandlerResult,
    ) -> Result<CompletionMessage, Error> {
        let completion = CompletionMessage::from_result(correlation, result);

        retry_with_backoff(&self.retry_config, || {
            let sink = Arc::clone(&self.sink);
            let completion = completion.clone();
            async move { sink.send_completion(&completion).await }
        })
        .await
        .inspect_err(|e| {
            warn!(
                correlation_id = %correlation.correlation_id,
                reply_to = %correlation.reply_to,
                error = %e,
                "Completion could not be published"
            );
        })?;

        match completion.reason {
            None => info!(
                correlation_id = %correlation.correlation_id,
                "Completion sent"
            ),
            Some(reason) => info!(
                correlation_id = %correlation.correlation_id,
                reason = %reason,
                "Failure completion sent"
            ),
        }

        Ok(completion)
    }
}
