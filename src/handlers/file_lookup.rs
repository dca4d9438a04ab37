use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    handlers::ActionHandler,
    models::{notification::Notification, result::HandlerResult},
    reference::ReferenceTable,
};

/// Maps one record field to another through the reference table. Never does
/// I/O and never fails: a miss is a success without updates.
pub struct FileLookupHandler {
    table: Arc<ReferenceTable>,
    source_field: String,
    dest_field: String,
}

impl FileLookupHandler {
    pub fn new(table: Arc<ReferenceTable>, source_field: &str, dest_field: &str) -> Self {
        Self {
            table,
            source_field: source_field.to_string(),
            dest_field: dest_field.to_string(),
        }
    }

    fn not_updated(&self) -> HandlerResult {
        HandlerResult::success(format!("field {} not updated", self.dest_field))
    }
}

#[async_trait]
impl ActionHandler for FileLookupHandler {
    fn kind(&self) -> &'static str {
        "file_lookup"
    }

    async fn process(&self, notification: &Notification) -> Result<HandlerResult, Error> {
        let Some(source_value) = notification
            .field_text(&self.source_field)
            .filter(|value| !value.trim().is_empty())
        else {
            warn!(
                record_id = notification.record_id,
                source_field = %self.source_field,
                "Source field missing or empty"
            );
            return Ok(self.not_updated());
        };

        let Some(value) = self.table.get(&source_value) else {
            warn!(
                record_id = notification.record_id,
                source_field = %self.source_field,
                source_value = %source_value,
                "No reference entry for value"
            );
            return Ok(self.not_updated());
        };

        info!(
            record_id = notification.record_id,
            source_field = %self.source_field,
            source_value = %source_value,
            dest_field = %self.dest_field,
            value,
            "Reference value found"
        );

        Ok(
            HandlerResult::success(format!("field {} updated", self.dest_field))
                .with_update(self.dest_field.clone(), Value::String(value.to_string())),
        )
    }
}
