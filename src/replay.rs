use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Remembers which correlation ids already received their completion.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    async fn is_completed(&self, correlation_id: &str) -> Result<bool, Error>;

    async fn mark_completed(&self, correlation_id: &str) -> Result<(), Error>;
}

/// Treats every delivery as new.
pub struct NoReplayGuard;

#[async_trait]
impl ReplayGuard for NoReplayGuard {
    async fn is_completed(&self, _correlation_id: &str) -> Result<bool, Error> {
        Ok(false)
    }

    async fn mark_completed(&self, _correlation_id: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// Process-local guard; one instance per listener.
pub struct MemoryReplayGuard {
    ttl: Duration,
    completed: Mutex<HashMap<String, Instant>>,
}

impl MemoryReplayGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            completed: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReplayGuard for MemoryReplayGuard {
    async fn is_completed(&self, correlation_id: &str) -> Result<bool, Error> {
        let mut completed = self.completed.lock().await;
        let now = Instant::now();
        completed.retain(|_, at| now.duration_since(*at) < self.ttl);

        Ok(completed.contains_key(correlation_id))
    }

    async fn mark_completed(&self, correlation_id: &str) -> Result<(), Error> {
        self.completed
            .lock()
            .await
            .insert(correlation_id.to_string(), Instant::now());
        Ok(())
    }
}
