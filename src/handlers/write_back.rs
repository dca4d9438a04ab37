use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    clients::remote::RemoteClient,
    handlers::ActionHandler,
    models::{notification::Notification, result::HandlerResult},
};

/// Stores a successful result's updates as custom fields of the source
/// incident. Results without updates and failures pass through untouched.
pub struct WriteBackHandler {
    inner: Arc<dyn ActionHandler>,
    client: Arc<RemoteClient>,
}

impl WriteBackHandler {
    pub fn new(inner: Arc<dyn ActionHandler>, client: Arc<RemoteClient>) -> Self {
        Self { inner, client }
    }
}

#[async_trait]
impl ActionHandler for WriteBackHandler {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn process(&self, notification: &Notification) -> Result<HandlerResult, Error> {
        let result = self.inner.process(notification).await?;

        let updates = match result.updates() {
            Some(updates) if !updates.is_empty() => updates.clone(),
            _ => return Ok(result),
        };

        let path = format!("/incidents/{}", notification.record_id);
        self.client
            .get_put(
                &path,
                |incident| apply_properties(incident, &updates),
                notification.context_token.as_deref(),
            )
            .await?;

        info!(
            record_id = notification.record_id,
            fields = ?updates.keys().collect::<Vec<_>>(),
            "Incident fields stored"
        );

        Ok(result)
    }
}

fn apply_properties<'a>(
    incident: &mut Value,
    updates: impl IntoIterator<Item = (&'a String, &'a Value)>,
) {
    let Some(incident) = incident.as_object_mut() else {
        return;
    };

    let properties = incident
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if !properties.is_object() {
        *properties = Value::Object(Map::new());
    }

    if let Value::Object(properties) = properties {
        for (field, value) in updates {
            properties.insert(field.clone(), value.clone());
        }
    }
}
