use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerPhase {
    Connecting,
    Consuming,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub listeners: BTreeMap<String, ListenerHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerHealth {
    pub phase: ListenerPhase,
    pub connect_attempts: u64,
    pub completions_sent: u64,
    pub failures_reported: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl ListenerHealth {
    pub fn connecting() -> Self {
        Self {
            phase: ListenerPhase::Connecting,
            connect_attempts: 0,
            completions_sent: 0,
            failures_reported: 0,
            last_error: None,
            last_activity: None,
        }
    }
}
