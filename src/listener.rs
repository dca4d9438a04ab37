use std::sync::Arc;

use futures_util::StreamExt;
use lapin::{Consumer, message::Delivery};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        health::StatusBoard,
        rbmq::{BrokerSession, BrokerSettings, inbound_from_delivery},
    },
    config::DeliveryGuarantee,
    models::{
        health::ListenerPhase,
        retry::{ReconnectConfig, RetryConfig},
    },
    pipeline::{Outcome, Pipeline},
    responder::Responder,
    utils::Backoff,
};

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub destination: String,
    pub broker: Arc<BrokerSettings>,
    pub reconnect: ReconnectConfig,
    pub publish_retry: RetryConfig,
    pub guarantee: DeliveryGuarantee,
}

struct ActiveSession {
    session: BrokerSession,
    consumer: Consumer,
    responder: Responder,
}

enum ListenerEvent {
    /// Carries whether the shutdown sender is gone.
    Shutdown(bool),
    Delivery(Option<Result<Delivery, lapin::Error>>),
}

/// Consumes one destination, one delivery at a time, in receipt order.
pub struct Listener {
    settings: ListenerSettings,
    pipeline: Arc<Pipeline>,
    status: StatusBoard,
    shutdown: watch::Receiver<bool>,
    shutdown_sender_gone: bool,
    active: Option<ActiveSession>,
}

impl Listener {
    pub fn new(
        settings: ListenerSettings,
        pipeline: Arc<Pipeline>,
        status: StatusBoard,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        status.register(&settings.destination);

        Self {
            settings,
            pipeline,
            status,
            shutdown,
            shutdown_sender_gone: false,
            active: None,
        }
    }

    pub fn destination(&self) -> &str {
        &self.settings.destination
    }

    /// Runs until shutdown is signalled, then releases the broker session.
    pub async fn run(mut self) {
        info!(destination = %self.settings.destination, "Listener started");

        while let Some(delivery) = self.next_delivery().await {
            self.handle(delivery).await;
        }

        if let Some(active) = self.active.take() {
            active.session.close().await;
        }
        self.status
            .set_phase(&self.settings.destination, ListenerPhase::Stopped);

        info!(destination = %self.settings.destination, "Listener stopped");
    }

    /// Next delivery from the destination, reconnecting as often as needed.
    /// Returns `None` only once shutdown has been signalled.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            if self.is_shutting_down() {
                return None;
            }

            if self.active.is_none() && !self.establish().await {
                return None;
            }

            let event = {
                let Some(active) = self.active.as_mut() else {
                    continue;
                };

                tokio::select! {
                    changed = self.shutdown.changed() => ListenerEvent::Shutdown(changed.is_err()),
                    next = active.consumer.next() => ListenerEvent::Delivery(next),
                }
            };

            match event {
                ListenerEvent::Shutdown(sender_gone) => {
                    self.shutdown_sender_gone |= sender_gone;
                }
                ListenerEvent::Delivery(Some(Ok(delivery))) => return Some(delivery),
                ListenerEvent::Delivery(Some(Err(e))) => {
                    warn!(
                        destination = %self.settings.destination,
                        error = %e,
                        "Consumer failed, reconnecting"
                    );
                    self.disconnect(e.to_string()).await;
                }
                ListenerEvent::Delivery(None) => {
                    warn!(
                        destination = %self.settings.destination,
                        "Consumer stream ended, reconnecting"
                    );
                    self.disconnect("consumer stream ended".to_string()).await;
                }
            }
        }
    }

    async fn handle(&mut self, delivery: Delivery) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let destination = self.settings.destination.as_str();
        let delivery_tag = delivery.delivery_tag;
        let message = inbound_from_delivery(&delivery);

        debug!(destination, delivery_tag, "Delivery received");

        if self.settings.guarantee == DeliveryGuarantee::AtMostOnce {
            if let Err(e) = active.session.acknowledge(delivery_tag).await {
                warn!(destination, error = %e, "Early acknowledgement failed");
            }
        }

        let outcome = self.pipeline.handle(&message, &active.responder).await;

        let settle = match &outcome {
            Outcome::Completed(completion) => {
                self.status.record_completion(destination, completion.success);
                Settle::Ack
            }
            Outcome::Duplicate | Outcome::Dropped => Settle::Ack,
            Outcome::Undeliverable(e) => {
                error!(
                    destination,
                    delivery_tag,
                    error = %e,
                    "Completion was not delivered"
                );
                Settle::Requeue
            }
        };

        if self.settings.guarantee == DeliveryGuarantee::AtMostOnce {
            return;
        }

        let settled = match settle {
            Settle::Ack => active.session.acknowledge(delivery_tag).await,
            Settle::Requeue => active.session.reject(delivery_tag, true).await,
        };
        if let Err(e) = settled {
            warn!(destination, delivery_tag, error = %e, "Failed to settle delivery");
        }
    }

    /// Connects with bounded, jittered backoff until it works or shutdown is
    /// signalled. Returns whether a session is active.
    async fn establish(&mut self) -> bool {
        let destination = self.settings.destination.clone();
        let mut backoff = Backoff::from_reconnect(&self.settings.reconnect);

        loop {
            if self.is_shutting_down() {
                return false;
            }

            match self.open_session().await {
                Ok(active) => {
                    self.status.record_connect_success(&destination);
                    self.active = Some(active);
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        destination = %destination,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Broker connection failed, will retry"
                    );
                    self.status.record_connect_failure(&destination, e.to_string());

                    let sender_gone = tokio::select! {
                        _ = sleep(delay) => false,
                        changed = self.shutdown.changed() => changed.is_err(),
                    };
                    self.shutdown_sender_gone |= sender_gone;
                }
            }
        }
    }

    async fn open_session(&self) -> anyhow::Result<ActiveSession> {
        self.status
            .set_phase(&self.settings.destination, ListenerPhase::Connecting);

        let session = BrokerSession::connect(&self.settings.broker, &self.settings.destination).await?;
        let consumer = match session.create_consumer().await {
            Ok(consumer) => consumer,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        let responder = Responder::new(
            Arc::new(session.reply_publisher()),
            self.settings.publish_retry.clone(),
        );

        Ok(ActiveSession {
            session,
            consumer,
            responder,
        })
    }

    async fn disconnect(&mut self, reason: String) {
        if let Some(active) = self.active.take() {
            active.session.close().await;
        }
        self.status
            .record_connect_failure(&self.settings.destination, reason);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown_sender_gone || *self.shutdown.borrow()
    }
}

enum Settle {
    Ack,
    Requeue,
}
