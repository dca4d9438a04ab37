use std::path::PathBuf;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    tcp::OwnedTLSConfig,
    types::{AMQPValue, FieldTable},
};
use reqwest::Url;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::read_trust_store,
    models::{completion::CompletionMessage, notification::InboundMessage},
    responder::CompletionSink,
};

const CONTEXT_HEADER: &str = "Co3ContextToken";

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub cafile: Option<PathBuf>,
    pub prefetch: u16,
    pub declare_destinations: bool,
}

impl BrokerSettings {
    pub fn uri(&self) -> Result<String, Error> {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        let mut url = Url::parse(&format!("{}://{}:{}", scheme, self.host, self.port))
            .map_err(|e| anyhow!("Invalid broker address {}: {}", self.host, e))?;

        url.set_username(&self.username)
            .map_err(|_| anyhow!("Broker username cannot be encoded"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| anyhow!("Broker password cannot be encoded"))?;
        url.set_path(&format!("/{}", self.vhost.replace('/', "%2f")));

        Ok(url.to_string())
    }
}

/// One connection and channel, owned by a single listener.
pub struct BrokerSession {
    connection: Connection,
    channel: Channel,
    destination: String,
}

impl BrokerSession {
    pub async fn connect(settings: &BrokerSettings, destination: &str) -> Result<Self, Error> {
        debug!(host = %settings.host, port = settings.port, destination, "Connecting to broker");

        let uri = settings.uri()?;
        let properties = ConnectionProperties::default();

        let connection = match (&settings.cafile, settings.tls) {
            (Some(cafile), true) => {
                let pem = read_trust_store(cafile)?;
                let tls = OwnedTLSConfig {
                    identity: None,
                    cert_chain: Some(pem),
                };
                Connection::connect_with_config(&uri, properties, tls).await
            }
            _ => Connection::connect(&uri, properties).await,
        }
        .map_err(|e| anyhow!("Failed to connect to broker: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("Broker channel creation failed: {}", e))?;

        channel
            .basic_qos(settings.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        if settings.declare_destinations {
            channel
                .queue_declare(
                    destination.into(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare {}: {}", destination, e))?;
        }

        info!(destination, "Broker session established");

        Ok(Self {
            connection,
            channel,
            destination: destination.to_string(),
        })
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer_tag = format!("action-relay-{}", self.destination);

        let consumer = self
            .channel
            .basic_consume(
                self.destination.as_str().into(),
                consumer_tag.as_str().into(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to subscribe to {}: {}", self.destination, e))?;

        info!(destination = %self.destination, "Subscribed to destination");

        Ok(consumer)
    }

    pub fn reply_publisher(&self) -> ReplyPublisher {
        ReplyPublisher {
            channel: self.channel.clone(),
        }
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "listener stopped".into()).await {
            debug!(error = %e, "Channel was already closed");
        }
        if let Err(e) = self.connection.close(200, "listener stopped".into()).await {
            debug!(error = %e, "Connection was already closed");
        }
        info!(destination = %self.destination, "Broker session closed");
    }
}

/// Publishes completions to the reply destination named by each notification.
#[derive(Clone)]
pub struct ReplyPublisher {
    channel: Channel,
}

#[async_trait]
impl CompletionSink for ReplyPublisher {
    async fn send_completion(&self, completion: &CompletionMessage) -> Result<(), Error> {
        let payload = completion.payload()?;
        let properties = BasicProperties::default()
            .with_correlation_id(completion.correlation.correlation_id.clone().into())
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        self.channel
            .basic_publish(
                "".into(),
                completion.correlation.reply_to.as_str().into(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish completion: {}", e))?;

        Ok(())
    }
}

pub fn inbound_from_delivery(delivery: &Delivery) -> InboundMessage {
    let properties = &delivery.properties;

    InboundMessage {
        message_id: properties.message_id().as_ref().map(|s| s.as_str().to_string()),
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        reply_to: properties.reply_to().as_ref().map(|s| s.as_str().to_string()),
        context_token: header_text(properties, CONTEXT_HEADER),
        body: delivery.data.clone(),
    }
}

fn header_text(properties: &BasicProperties, name: &str) -> Option<String> {
    let headers = properties.headers().as_ref()?;

    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .and_then(|(_, value)| match value {
            AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
            AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
            other => {
                warn!(header = name, value = ?other, "Ignoring non-string header");
                None
            }
        })
}
