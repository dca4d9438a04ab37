use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use tracing::info;

use crate::{config::ConfigError, handlers::ActionHandler, models::action::normalize_action_name};

struct Registration {
    destination: String,
    handler: Arc<dyn ActionHandler>,
}

/// Action name to handler table. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: HashMap<String, Registration>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.registrations.iter().map(|(action, registration)| (action, &registration.destination)))
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `action` to `handler`, listening on `destination`. Registering the
    /// same (normalized) action twice is a configuration error.
    pub fn register(
        &mut self,
        action: &str,
        destination: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), ConfigError> {
        let action = normalize_action_name(action);
        if action.is_empty() {
            return Err(ConfigError::Invalid(
                "action name",
                "must contain at least one word character".to_string(),
            ));
        }
        if self.registrations.contains_key(&action) {
            return Err(ConfigError::DuplicateHandler(action));
        }

        info!(
            action = %action,
            destination,
            handler = handler.kind(),
            "Handler registered"
        );

        self.registrations.insert(
            action,
            Registration {
                destination: destination.to_string(),
                handler,
            },
        );

        Ok(())
    }

    pub fn lookup(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.registrations
            .get(action)
            .map(|registration| Arc::clone(&registration.handler))
    }

    /// Destinations with at least one registered action, sorted and unique.
    pub fn destinations(&self) -> Vec<String> {
        self.registrations
            .values()
            .map(|registration| registration.destination.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
