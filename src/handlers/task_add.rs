use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::{
    clients::remote::{RemoteClient, RemoteError},
    handlers::ActionHandler,
    models::{
        notification::Notification,
        remote::{NewTask, Task},
        result::HandlerResult,
    },
};

/// Creates a task on the incident the action fired on.
///
/// A task with the same name already on the incident counts as done, so a
/// redelivered notification does not create a duplicate.
pub struct TaskAddHandler {
    client: Arc<RemoteClient>,
    name_template: String,
}

impl TaskAddHandler {
    pub fn new(client: Arc<RemoteClient>, name_template: &str) -> Self {
        Self {
            client,
            name_template: name_template.to_string(),
        }
    }

    fn task_for(&self, notification: &Notification) -> NewTask {
        let form_text = |name: &str| {
            notification
                .action_fields
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let name = form_text("task_name").unwrap_or_else(|| {
            self.name_template
                .replace("{incident}", &notification.record_id.to_string())
                .replace(
                    "{incident_name}",
                    &notification.field_text("name").unwrap_or_default(),
                )
        });

        NewTask {
            name,
            instructions: form_text("task_instructions"),
            phase_id: form_text("task_phase"),
        }
    }
}

#[async_trait]
impl ActionHandler for TaskAddHandler {
    fn kind(&self) -> &'static str {
        "task_add"
    }

    async fn process(&self, notification: &Notification) -> Result<HandlerResult, Error> {
        let task = self.task_for(notification);
        let path = format!("/incidents/{}/tasks", notification.record_id);
        let context = notification.context_token.as_deref();

        let existing: Vec<Value> = self.client.get_as(&path, context).await?;
        let duplicate = existing
            .iter()
            .any(|t| t.get("name").and_then(Value::as_str) == Some(task.name.as_str()));

        if duplicate {
            info!(
                record_id = notification.record_id,
                task = %task.name,
                "Task already present, not creating another"
            );
            return Ok(HandlerResult::success(format!(
                "task '{}' already exists on incident {}",
                task.name, notification.record_id
            )));
        }

        let body = serde_json::to_value(&task)?;
        let created = self.client.post(&path, &body, context).await?;
        let created: Task =
            serde_json::from_value(created).map_err(|e| RemoteError::Decode(e.to_string()))?;

        info!(
            record_id = notification.record_id,
            task_id = created.id,
            task = %created.name,
            "Task created"
        );

        Ok(HandlerResult::success(format!(
            "task {} '{}' created on incident {}",
            created.id, created.name, notification.record_id
        )))
    }
}
