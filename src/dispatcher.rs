use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::{
    clients::remote::RemoteError,
    models::{
        notification::Notification,
        result::{FailureReason, HandlerResult},
    },
    registry::HandlerRegistry,
};

/// Routes a notification to the handler registered for its action.
///
/// Every outcome, including a missing handler, a timeout, an error or a
/// panic inside the handler, comes back as a [`HandlerResult`].
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registry,
            handler_timeout,
        }
    }

    pub async fn route(&self, notification: &Notification) -> HandlerResult {
        let Some(handler) = self.registry.lookup(&notification.action) else {
            warn!(
                action = %notification.action,
                record_id = notification.record_id,
                "No handler registered for action"
            );
            return HandlerResult::failure(
                FailureReason::UnhandledAction,
                format!("no handler is registered for action '{}'", notification.action),
            );
        };

        info!(
            action = %notification.action,
            record_id = notification.record_id,
            handler = handler.kind(),
            "Dispatching notification"
        );

        let invocation = AssertUnwindSafe(handler.process(notification)).catch_unwind();

        match timeout(self.handler_timeout, invocation).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                let reason = e
                    .downcast_ref::<RemoteError>()
                    .map(RemoteError::failure_reason)
                    .unwrap_or(FailureReason::HandlerFault);

                warn!(
                    action = %notification.action,
                    reason = %reason,
                    error = %e,
                    "Handler failed"
                );
                HandlerResult::failure(reason, format!("{:#}", e))
            }
            Ok(Err(panic)) => {
                let description = panic_description(panic.as_ref());
                error!(
                    action = %notification.action,
                    panic = %description,
                    "Handler panicked"
                );
                HandlerResult::failure(FailureReason::HandlerFault, description)
            }
            Err(_) => {
                warn!(
                    action = %notification.action,
                    timeout_ms = self.handler_timeout.as_millis() as u64,
                    "Handler exceeded its processing window"
                );
                HandlerResult::failure(
                    FailureReason::HandlerTimeout,
                    format!("handler did not finish within {:?}", self.handler_timeout),
                )
            }
        }
    }
}

fn panic_description(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
