use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use chrono::Utc;

use crate::models::health::{HealthCheckResponse, HealthStatus, ListenerHealth, ListenerPhase};

/// Per-destination listener status, written by listeners and read by the
/// health endpoint.
#[derive(Clone, Default)]
pub struct StatusBoard {
    listeners: Arc<RwLock<HashMap<String, ListenerHealth>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, destination: &str) {
        self.update(destination, |_| {});
    }

    pub fn set_phase(&self, destination: &str, phase: ListenerPhase) {
        self.update(destination, |health| {
            health.phase = phase;
            if phase == ListenerPhase::Consuming {
                health.last_error = None;
            }
        });
    }

    pub fn record_connect_failure(&self, destination: &str, error: String) {
        self.update(destination, |health| {
            health.phase = ListenerPhase::Reconnecting;
            health.connect_attempts += 1;
            health.last_error = Some(error);
        });
    }

    pub fn record_connect_success(&self, destination: &str) {
        self.update(destination, |health| {
            health.phase = ListenerPhase::Consuming;
            health.connect_attempts += 1;
            health.last_error = None;
        });
    }

    pub fn record_completion(&self, destination: &str, success: bool) {
        self.update(destination, |health| {
            health.completions_sent += 1;
            if !success {
                health.failures_reported += 1;
            }
            health.last_activity = Some(Utc::now());
        });
    }

    pub fn listener(&self, destination: &str) -> Option<ListenerHealth> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(destination)
            .cloned()
    }

    pub fn check_all(&self) -> HealthCheckResponse {
        let listeners: BTreeMap<String, ListenerHealth> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(destination, health)| (destination.clone(), health.clone()))
            .collect();

        HealthCheckResponse {
            status: Self::determine_overall_status(&listeners),
            timestamp: Utc::now(),
            listeners,
        }
    }

    fn determine_overall_status(listeners: &BTreeMap<String, ListenerHealth>) -> HealthStatus {
        let consuming = listeners
            .values()
            .filter(|health| health.phase == ListenerPhase::Consuming)
            .count();

        if listeners.is_empty() || consuming == 0 {
            HealthStatus::Unhealthy
        } else if consuming < listeners.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    fn update(&self, destination: &str, change: impl FnOnce(&mut ListenerHealth)) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let health = listeners
            .entry(destination.to_string())
            .or_insert_with(ListenerHealth::connecting);
        change(health);
    }
}
