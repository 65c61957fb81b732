//! HTTP client for remote Agent-Servers.

use chrono::Utc;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Method, Request};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::auth::{sign, signing_path, AuthError, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::domain::models::AgentServerConfig;

#[derive(Debug, Error)]
pub enum ControlChannelError {
    #[error("Agent-Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Control channel request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid Agent-Server URL: {0}")]
    InvalidUrl(String),

    #[error("Request signing failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle action for an agent or an Agent-Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}

/// Signed JSON client. Every request carries `X-Timestamp`; `X-Signature`
/// is added when a shared secret is configured.
pub struct AgentServerClient {
    http: ReqwestClient,
    secret: Option<Vec<u8>>,
}

impl AgentServerClient {
    pub fn new(config: &AgentServerConfig) -> Result<Self, ControlChannelError> {
        let http = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            secret: config
                .shared_secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        })
    }

    pub fn is_signing(&self) -> bool {
        self.secret.is_some()
    }

    /// `base` + `path`, with `http://` added when `base` has no scheme.
    pub fn endpoint(base: &str, path: &str) -> String {
        let base = base.trim().trim_end_matches('/');
        if base.contains("://") {
            format!("{base}{path}")
        } else {
            format!("http://{base}{path}")
        }
    }

    /// Build the signed request. The signed bytes are exactly the bytes sent.
    pub fn build_request(
        &self,
        method: Method,
        base: &str,
        path: &str,
        body: Option<&Value>,
        timestamp: i64,
    ) -> Result<Request, ControlChannelError> {
        let url = Self::endpoint(base, path);
        let parsed = reqwest::Url::parse(&url).map_err(|err| ControlChannelError::InvalidUrl(format!("{url}: {err}")))?;

        let bytes = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        let mut builder = self
            .http
            .request(method.clone(), parsed)
            .header(TIMESTAMP_HEADER, timestamp.to_string());

        if let Some(secret) = &self.secret {
            let signature = sign(secret, method.as_str(), &signing_path(&url), timestamp, &bytes)?;
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        if body.is_some() {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(bytes);
        }

        Ok(builder.build()?)
    }

    async fn send(&self, method: Method, base: &str, path: &str, body: Option<Value>) -> Result<Value, ControlChannelError> {
        let request = self.build_request(method, base, path, body.as_ref(), Utc::now().timestamp())?;
        debug!(method = %request.method(), url = %request.url(), "agent-server request");

        let response = self.http.execute(request).await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "agent-server error response");
            return Err(ControlChannelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Remote status of the agent on `host_id`.
    pub async fn agent_status(&self, base: &str, host_id: i64) -> Result<Value, ControlChannelError> {
        self.send(Method::GET, base, &format!("/api/agents/{host_id}"), None).await
    }

    pub async fn control_agent(
        &self,
        base: &str,
        host_id: i64,
        action: ControlAction,
        reason: Option<&str>,
    ) -> Result<Value, ControlChannelError> {
        let body = json!({ "action": action, "reason": reason.unwrap_or_default() });
        self.send(Method::POST, base, &format!("/api/agents/{host_id}/control"), Some(body))
            .await
    }

    pub async fn control_server(
        &self,
        base: &str,
        action: ControlAction,
        reason: Option<&str>,
    ) -> Result<Value, ControlChannelError> {
        let body = json!({ "action": action, "reason": reason.unwrap_or_default() });
        self.send(Method::POST, base, "/api/self/control", Some(body)).await
    }

    pub async fn upgrade_agent(&self, base: &str, host_id: i64, package: &Value) -> Result<Value, ControlChannelError> {
        self.send(
            Method::POST,
            base,
            &format!("/api/agents/{host_id}/upgrade"),
            Some(package.clone()),
        )
        .await
    }

    pub async fn upgrade_server(&self, base: &str, package: &Value) -> Result<Value, ControlChannelError> {
        self.send(Method::POST, base, "/api/self/upgrade", Some(package.clone()))
            .await
    }

    /// Push a task to the agent on `host_id`.
    pub async fn dispatch_task(&self, base: &str, host_id: i64, task: &Value) -> Result<Value, ControlChannelError> {
        self.send(
            Method::POST,
            base,
            &format!("/api/agents/{host_id}/tasks"),
            Some(task.clone()),
        )
        .await
    }
}
