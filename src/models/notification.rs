use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::action::{ActionCatalog, normalize_action_name};

/// Where a completion for a notification has to go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationToken {
    pub correlation_id: String,
    pub reply_to: String,
}

impl CorrelationToken {
    pub fn new(correlation_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reply_to: reply_to.into(),
        }
    }
}

/// A broker message before it has been decoded.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub context_token: Option<String>,
    pub body: Vec<u8>,
}

impl InboundMessage {
    pub fn correlation(&self) -> Option<CorrelationToken> {
        let correlation_id = self.correlation_id.as_deref().filter(|s| !s.is_empty())?;
        let reply_to = self.reply_to.as_deref().filter(|s| !s.is_empty())?;
        Some(CorrelationToken::new(correlation_id, reply_to))
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("message has no correlation id or reply-to destination")]
    MissingCorrelation,
    #[error("message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message body is not a JSON object")]
    NotAnObject,
    #[error("message has neither action_name nor action_id")]
    MissingAction,
    #[error("message does not identify an incident record")]
    MissingRecord,
}

/// An action fired on a platform record.
#[derive(Debug, Clone)]
pub struct Notification {
    pub action: String,
    pub action_id: Option<i64>,
    pub object_type: Option<String>,
    pub record_id: i64,
    pub correlation: CorrelationToken,
    /// Incident fields, with custom `properties` overlaid on the built-in ones.
    pub fields: BTreeMap<String, Value>,
    /// Values entered on a manual action's form.
    pub action_fields: BTreeMap<String, Value>,
    pub message_id: Option<String>,
    pub context_token: Option<String>,
    pub raw: Value,
}

impl Notification {
    pub fn new(action: &str, record_id: i64, correlation: CorrelationToken) -> Self {
        Self {
            action: normalize_action_name(action),
            action_id: None,
            object_type: None,
            record_id,
            correlation,
            fields: BTreeMap::new(),
            action_fields: BTreeMap::new(),
            message_id: None,
            context_token: None,
            raw: Value::Null,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_action_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.action_fields.insert(name.into(), value);
        self
    }

    pub fn decode(message: &InboundMessage, catalog: &ActionCatalog) -> Result<Self, NotificationError> {
        let correlation = message
            .correlation()
            .ok_or(NotificationError::MissingCorrelation)?;

        let raw: Value = serde_json::from_slice(&message.body)?;
        let body = raw.as_object().ok_or(NotificationError::NotAnObject)?;

        let action_id = body.get("action_id").and_then(Value::as_i64);
        let action = match body.get("action_name").and_then(Value::as_str) {
            Some(name) => normalize_action_name(name),
            None => catalog.resolve(action_id.ok_or(NotificationError::MissingAction)?),
        };

        let incident = body
            .get("incident")
            .and_then(Value::as_object)
            .ok_or(NotificationError::MissingRecord)?;
        let record_id = incident
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(NotificationError::MissingRecord)?;

        Ok(Self {
            action,
            action_id,
            object_type: body
                .get("object_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            record_id,
            correlation,
            fields: record_fields(incident),
            action_fields: body
                .get("properties")
                .and_then(Value::as_object)
                .map(|properties| properties.clone().into_iter().collect())
                .unwrap_or_default(),
            message_id: message.message_id.clone(),
            context_token: message.context_token.clone(),
            raw,
        })
    }

    /// String form of a field, for lookups keyed by text.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

fn record_fields(record: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut fields: BTreeMap<String, Value> = record
        .iter()
        .filter(|(name, value)| name.as_str() != "properties" && !value.is_object())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if let Some(Value::Object(properties)) = record.get("properties") {
        for (name, value) in properties {
            fields.insert(name.clone(), value.clone());
        }
    }

    fields
}
