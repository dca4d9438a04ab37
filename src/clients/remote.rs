use std::{path::PathBuf, time::Duration};

use reqwest::{Certificate, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    config::read_trust_store,
    models::{
        action::{ActionDefinition, ActionDefinitionList},
        remote::{RawResponse, SessionRequest, SessionResponse},
        result::FailureReason,
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

const SESSION_PATH: &str = "/rest/session";
const CONTEXT_HEADER: &str = "Co3ContextToken";
const SESSION_HEADER: &str = "X-sess-id";
const MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("request rejected with status {status}: {body}")]
    Validation { status: u16, body: String },
    #[error("update of {0} kept conflicting with concurrent changes")]
    Conflict(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("trust store error: {0}")]
    Trust(String),
}

impl RemoteError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            RemoteError::Transport(_) | RemoteError::Trust(_) => FailureReason::Transport,
            RemoteError::Status { status, .. } if *status >= 500 => FailureReason::Transport,
            RemoteError::Authentication(_) => FailureReason::Authentication,
            RemoteError::Validation { .. }
            | RemoteError::Conflict(_)
            | RemoteError::Status { .. } => FailureReason::RemoteValidation,
            RemoteError::Decode(_) => FailureReason::HandlerFault,
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RemoteError::Authentication(format!("{}: {}", status, body))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND => {
                RemoteError::Validation {
                    status: status.as_u16(),
                    body,
                }
            }
            _ => RemoteError::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub org_name: Option<String>,
    pub cafile: Option<PathBuf>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
struct Session {
    csrf_token: String,
    org_id: i64,
}

/// Session-authenticated client for the platform REST API.
///
/// The session is shared by every listener and guarded by a lock; a 401 on
/// any call re-authenticates once and repeats the call.
pub struct RemoteClient {
    http_client: Client,
    base_url: String,
    email: String,
    password: String,
    org_name: Option<String>,
    retry_config: RetryConfig,
    session: RwLock<Option<Session>>,
}

impl RemoteClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(settings.timeout);

        if let Some(cafile) = &settings.cafile {
            let pem = read_trust_store(cafile).map_err(|e| RemoteError::Trust(e.to_string()))?;
            let certificate = Certificate::from_pem(pem.as_bytes())
                .map_err(|e| RemoteError::Trust(format!("{}: {}", cafile.display(), e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        let http_client = builder
            .build()
            .map_err(|e| RemoteError::Trust(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %settings.base_url, "Resilient API client initialized");

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            email: settings.email.clone(),
            password: settings.password.clone(),
            org_name: settings.org_name.clone(),
            retry_config: settings.retry.clone(),
            session: RwLock::new(None),
        })
    }

    /// Authenticates and returns the organisation id the session works in.
    pub async fn connect(&self) -> Result<i64, RemoteError> {
        Ok(self.ensure_session().await?.org_id)
    }

    pub async fn org_id(&self) -> Result<i64, RemoteError> {
        self.connect().await
    }

    pub async fn action_definitions(&self) -> Result<Vec<ActionDefinition>, RemoteError> {
        let list: ActionDefinitionList = self.get_as("/actions", None).await?;
        Ok(list.entities)
    }

    pub async fn get(&self, path: &str, context: Option<&str>) -> Result<Value, RemoteError> {
        self.call(Method::GET, path, None, context).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: &Value,
        context: Option<&str>,
    ) -> Result<Value, RemoteError> {
        self.call(Method::PUT, path, Some(body), context).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        context: Option<&str>,
    ) -> Result<Value, RemoteError> {
        self.call(Method::POST, path, Some(body), context).await
    }

    pub async fn delete(&self, path: &str, context: Option<&str>) -> Result<Value, RemoteError> {
        self.call(Method::DELETE, path, None, context).await
    }

    pub async fn get_as<T: DeserializeOwned>(
        &self,
        path: &str,
        context: Option<&str>,
    ) -> Result<T, RemoteError> {
        let value = self.get(path, context).await?;
        serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Read-modify-write of one resource, repeated while the server reports a
    /// conflicting concurrent update.
    pub async fn get_put<F>(
        &self,
        path: &str,
        apply: F,
        context: Option<&str>,
    ) -> Result<Value, RemoteError>
    where
        F: Fn(&mut Value),
    {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let mut resource = self.get(path, context).await?;
            apply(&mut resource);

            match self.put(path, &resource, context).await {
                Err(RemoteError::Status { status: 409, .. }) => {
                    debug!(path, attempt, "Conflicting update, re-reading resource");
                }
                other => return other,
            }
        }

        Err(RemoteError::Conflict(path.to_string()))
    }

    /// Sends a request and hands back status and body without judging the status.
    pub async fn raw(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RawResponse, RemoteError> {
        let response = self.send(method, path, body, None).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        context: Option<&str>,
    ) -> Result<Value, RemoteError> {
        let response = self.send(method, path, body, context).await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RemoteError::from_status(status, text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        context: Option<&str>,
    ) -> Result<Response, RemoteError> {
        let session = self.ensure_session().await?;
        let response = self
            .send_once(&session, method.clone(), path, body, context)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(path, "Session rejected, re-authenticating");
        let session = self.authenticate().await?;
        self.send_once(&session, method, path, body, context).await
    }

    async fn send_once(
        &self,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<&Value>,
        context: Option<&str>,
    ) -> Result<Response, RemoteError> {
        let url = self.resource_url(session.org_id, path);

        debug!(method = %method, url = %url, "Calling Resilient API");

        // A POST the server may already have applied is never resent.
        let retry_config = if method.is_idempotent() {
            self.retry_config.clone()
        } else {
            RetryConfig {
                max_attempts: 1,
                ..self.retry_config.clone()
            }
        };

        let response = retry_with_backoff(&retry_config, || {
            let mut request = self
                .http_client
                .request(method.clone(), &url)
                .header(SESSION_HEADER, &session.csrf_token)
                .query(&[("handle_format", "names")]);

            if let Some(token) = context {
                request = request.header(CONTEXT_HEADER, token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            request.send()
        })
        .await?;

        Ok(response)
    }

    fn resource_url(&self, org_id: i64, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        if path.starts_with("/rest/") {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/rest/orgs/{}{}", self.base_url, org_id, path)
        }
    }

    async fn ensure_session(&self) -> Result<Session, RemoteError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.authenticate().await
    }

    async fn authenticate(&self) -> Result<Session, RemoteError> {
        let mut guard = self.session.write().await;

        let url = format!("{}{}", self.base_url, SESSION_PATH);
        let request = SessionRequest {
            email: &self.email,
            password: &self.password,
        };

        let response = retry_with_backoff(&self.retry_config, || {
            self.http_client.post(&url).json(&request).send()
        })
        .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Authentication(format!(
                "credentials for {} were rejected",
                self.email
            )));
        }
        if !status.is_success() {
            let body = response.text().await?;
            return Err(RemoteError::from_status(status, body));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let org = match &self.org_name {
            Some(name) => session.orgs.iter().find(|org| &org.name == name),
            None => session.orgs.first(),
        }
        .ok_or_else(|| {
            RemoteError::Authentication(match &self.org_name {
                Some(name) => format!("user is not a member of organization '{}'", name),
                None => "user is not a member of any organization".to_string(),
            })
        })?;

        info!(org_id = org.id, org = %org.name, "Authenticated with Resilient API");

        let authenticated = Session {
            csrf_token: session.csrf_token,
            org_id: org.id,
        };
        *guard = Some(authenticated.clone());

        Ok(authenticated)
    }
}
