use std::sync::Arc;

use anyhow::Error;
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::Dispatcher,
    models::{
        action::ActionCatalog,
        completion::CompletionMessage,
        notification::{InboundMessage, Notification},
        result::{FailureReason, HandlerResult},
        state::{Lifecycle, NotificationState},
    },
    replay::ReplayGuard,
    responder::Responder,
};

/// What happened to one broker message.
#[derive(Debug)]
pub enum Outcome {
    /// A completion was published.
    Completed(CompletionMessage),
    /// The correlation id had already been completed; nothing was sent.
    Duplicate,
    /// Unreadable and without reply routing; nothing could be sent.
    Dropped,
    /// The completion could not be published.
    Undeliverable(Error),
}

/// Decode, dispatch and complete, for one destination.
pub struct Pipeline {
    catalog: Arc<ActionCatalog>,
    dispatcher: Dispatcher,
    replay: Arc<dyn ReplayGuard>,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<ActionCatalog>,
        dispatcher: Dispatcher,
        replay: Arc<dyn ReplayGuard>,
    ) -> Self {
        Self {
            catalog,
            dispatcher,
            replay,
        }
    }

    pub async fn handle(&self, message: &InboundMessage, responder: &Responder) -> Outcome {
        let notification = match Notification::decode(message, &self.catalog) {
            Ok(notification) => notification,
            Err(e) => return self.reject_malformed(message, e.to_string(), responder).await,
        };

        self.process(&notification, responder).await
    }

    pub async fn process(&self, notification: &Notification, responder: &Responder) -> Outcome {
        let correlation_id = notification.correlation.correlation_id.as_str();
        let mut lifecycle = Lifecycle::new();

        match self.replay.is_completed(correlation_id).await {
            Ok(true) => {
                info!(
                    correlation_id,
                    action = %notification.action,
                    "Notification already completed, skipping redelivery"
                );
                return Outcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => warn!(correlation_id, error = %e, "Replay check failed, processing anyway"),
        }

        track(&mut lifecycle, NotificationState::Dispatched, correlation_id);
        let result = self.dispatcher.route(notification).await;

        let settled = if result.is_success() {
            NotificationState::Succeeded
        } else {
            NotificationState::Failed
        };
        track(&mut lifecycle, settled, correlation_id);

        match responder.complete(&notification.correlation, &result).await {
            Ok(completion) => {
                track(&mut lifecycle, NotificationState::Acknowledged, correlation_id);

                if let Err(e) = self.replay.mark_completed(correlation_id).await {
                    warn!(correlation_id, error = %e, "Failed to record completion for replay checks");
                }

                Outcome::Completed(completion)
            }
            Err(e) => Outcome::Undeliverable(e),
        }
    }

    async fn reject_malformed(
        &self,
        message: &InboundMessage,
        reason: String,
        responder: &Responder,
    ) -> Outcome {
        let Some(correlation) = message.correlation() else {
            warn!(
                message_id = ?message.message_id,
                error = %reason,
                "Dropping malformed message without reply routing"
            );
            return Outcome::Dropped;
        };

        warn!(
            correlation_id = %correlation.correlation_id,
            error = %reason,
            "Malformed notification"
        );

        let result = HandlerResult::failure(FailureReason::MalformedNotification, reason);
        match responder.complete(&correlation, &result).await {
            Ok(completion) => Outcome::Completed(completion),
            Err(e) => Outcome::Undeliverable(e),
        }
    }
}

fn track(lifecycle: &mut Lifecycle, next: NotificationState, correlation_id: &str) {
    match lifecycle.advance(next) {
        Ok(()) => debug!(correlation_id, state = %next, "Notification state changed"),
        Err(e) => error!(correlation_id, error = %e, "Notification state machine violated"),
    }
}
