use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dotenvy::dotenv;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    clients::{rbmq::BrokerSettings, remote::RemoteSettings},
    models::retry::{ReconnectConfig, RetryConfig},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid or missing environment variable: {0}")]
    Environment(String),
    #[error("missing credentials for {0}")]
    MissingCredentials(&'static str),
    #[error("{0} must be set when {1}")]
    MissingSetting(&'static str, &'static str),
    #[error("reference file {0} does not exist")]
    MissingReferenceFile(PathBuf),
    #[error("reference file {path} could not be read: {reason}")]
    UnreadableReferenceFile { path: PathBuf, reason: String },
    #[error("trust store {path} is unusable: {reason}")]
    TrustStore { path: PathBuf, reason: String },
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error("action '{0}' is registered more than once")]
    DuplicateHandler(String),
    #[error("no action handlers are enabled")]
    NoHandlers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayGuardKind {
    None,
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default = "default_broker_vhost")]
    pub broker_vhost: String,
    pub broker_username: String,
    pub broker_password: String,
    #[serde(default = "default_true")]
    pub broker_tls: bool,
    pub broker_cafile: Option<String>,
    #[serde(default = "default_prefetch")]
    pub broker_prefetch: u16,
    #[serde(default)]
    pub declare_destinations: bool,

    pub resilient_url: String,
    pub resilient_email: String,
    pub resilient_password: String,
    pub resilient_org: Option<String>,
    pub resilient_cafile: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    pub lookup_reference_file: Option<String>,
    #[serde(default = "default_lookup_queue")]
    pub lookup_queue: String,
    #[serde(default = "default_lookup_action")]
    pub lookup_action: String,
    #[serde(default = "default_source_field")]
    pub lookup_source_field: String,
    #[serde(default = "default_dest_field")]
    pub lookup_dest_field: String,
    #[serde(default = "default_delimiter")]
    pub lookup_delimiter: String,
    #[serde(default = "default_true")]
    pub lookup_write_back: bool,

    #[serde(default = "default_true")]
    pub task_enabled: bool,
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    #[serde(default = "default_task_action")]
    pub task_action: String,
    #[serde(default = "default_task_name_template")]
    pub task_name_template: String,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    #[serde(default = "default_delivery_guarantee")]
    pub delivery_guarantee: DeliveryGuarantee,
    #[serde(default = "default_replay_guard")]
    pub replay_guard: ReplayGuardKind,
    pub redis_url: Option<String>,
    #[serde(default = "default_replay_ttl")]
    pub replay_ttl_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_true() -> bool {
    true
}
fn default_broker_port() -> u16 {
    5671
}
fn default_broker_vhost() -> String {
    "/".to_string()
}
fn default_prefetch() -> u16 {
    1
}
fn default_request_timeout() -> u64 {
    30
}
fn default_lookup_queue() -> String {
    "filelookup".to_string()
}
fn default_lookup_action() -> String {
    "file-lookup".to_string()
}
fn default_source_field() -> String {
    "country_code".to_string()
}
fn default_dest_field() -> String {
    "country_name".to_string()
}
fn default_delimiter() -> String {
    ",".to_string()
}
fn default_task_queue() -> String {
    "taskadd".to_string()
}
fn default_task_action() -> String {
    "taskadd".to_string()
}
fn default_task_name_template() -> String {
    "Follow up on incident {incident}".to_string()
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_initial_retry_delay_ms() -> u64 {
    200
}
fn default_max_retry_delay_ms() -> u64 {
    5_000
}
fn default_retry_backoff_multiplier() -> u64 {
    2
}
fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_handler_timeout() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_delivery_guarantee() -> DeliveryGuarantee {
    DeliveryGuarantee::AtLeastOnce
}
fn default_replay_guard() -> ReplayGuardKind {
    ReplayGuardKind::None
}
fn default_replay_ttl() -> u64 {
    86_400
}
fn default_server_port() -> u16 {
    8080
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        envy::from_env::<Self>().map_err(|e| ConfigError::Environment(e.to_string()))
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).map_err(|e| ConfigError::Environment(e.to_string()))
    }

    /// Rejects settings that would make the relay fail after it has subscribed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_username.trim().is_empty() || self.broker_password.is_empty() {
            return Err(ConfigError::MissingCredentials("the message broker"));
        }

        if self.resilient_email.trim().is_empty() || self.resilient_password.is_empty() {
            return Err(ConfigError::MissingCredentials("the Resilient API"));
        }

        if let Some(path) = &self.lookup_reference_file {
            let path = Path::new(path);
            if !path.is_file() {
                return Err(ConfigError::MissingReferenceFile(path.to_path_buf()));
            }
        }

        if self.lookup_delimiter.chars().count() != 1 {
            return Err(ConfigError::Invalid(
                "LOOKUP_DELIMITER",
                format!("expected a single character, got '{}'", self.lookup_delimiter),
            ));
        }

        if self.lookup_reference_file.is_none() && !self.task_enabled {
            return Err(ConfigError::NoHandlers);
        }

        if self.replay_guard == ReplayGuardKind::Redis && self.redis_url.is_none() {
            return Err(ConfigError::MissingSetting("REDIS_URL", "REPLAY_GUARD=redis"));
        }

        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "MAX_RETRY_ATTEMPTS",
                "must be at least 1".to_string(),
            ));
        }

        if self.handler_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "HANDLER_TIMEOUT_SECONDS",
                "must be at least 1".to_string(),
            ));
        }

        if self.broker_tls {
            if let Some(cafile) = &self.broker_cafile {
                read_trust_store(Path::new(cafile))?;
            }
        } else if self.broker_cafile.is_some() {
            return Err(ConfigError::Invalid(
                "BROKER_CAFILE",
                "a trust store was given but BROKER_TLS is disabled".to_string(),
            ));
        }

        if let Some(cafile) = &self.resilient_cafile {
            read_trust_store(Path::new(cafile))?;
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: self.reconnect_initial_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.broker_host.clone(),
            port: self.broker_port,
            vhost: self.broker_vhost.clone(),
            username: self.broker_username.clone(),
            password: self.broker_password.clone(),
            tls: self.broker_tls,
            cafile: self.broker_cafile.as_ref().map(PathBuf::from),
            prefetch: self.broker_prefetch,
            declare_destinations: self.declare_destinations,
        }
    }

    pub fn remote_settings(&self) -> RemoteSettings {
        RemoteSettings {
            base_url: self.resilient_url.clone(),
            email: self.resilient_email.clone(),
            password: self.resilient_password.clone(),
            org_name: self.resilient_org.clone(),
            cafile: self.resilient_cafile.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(self.request_timeout_seconds),
            retry: self.retry_config(),
        }
    }

    pub fn lookup_delimiter(&self) -> char {
        self.lookup_delimiter.chars().next().unwrap_or(',')
    }
}

/// Reads a PEM trust store, refusing files that hold no certificate.
pub fn read_trust_store(path: &Path) -> Result<String, ConfigError> {
    let pem = fs::read_to_string(path).map_err(|e| ConfigError::TrustStore {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !pem.contains("-----BEGIN CERTIFICATE-----") {
        return Err(ConfigError::TrustStore {
            path: path.to_path_buf(),
            reason: "no PEM certificate found".to_string(),
        });
    }

    Ok(pem)
}
