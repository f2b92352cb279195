//! Model discovery against the inference server.
//!
//! [`ModelProbe`] queries `/api/tags` on the server that hosts the configured
//! generate endpoint and reports a [`ProbeStatus`]. It never pulls, loads or
//! unloads models.
//!
//! - [`Available`](ProbeStatus::Available): the server listed its models
//! - [`NotRunning`](ProbeStatus::NotRunning): connection refused or unreachable
//! - [`Timeout`](ProbeStatus::Timeout): no answer within the deadline
//! - [`Unhealthy`](ProbeStatus::Unhealthy): HTTP error status
//! - [`IncompatibleResponse`](ProbeStatus::IncompatibleResponse): body is not a tag list

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::server_base;

/// A model installed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerModel {
    /// Model tag, e.g. `"llama3:8b"`.
    pub name: String,
    /// Size on disk in bytes, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ServerModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
        }
    }
}

impl fmt::Display for ServerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Outcome of probing the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Available {
        models: Vec<ServerModel>,
        /// Server root that was probed.
        endpoint_url: String,
        latency_ms: u64,
    },
    NotRunning,
    Timeout,
    Unhealthy { status_code: u16, message: String },
    IncompatibleResponse { detail: String },
}

impl ProbeStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// Discovered models, empty unless available.
    pub fn models(&self) -> &[ServerModel] {
        match self {
            Self::Available { models, .. } => models,
            _ => &[],
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available {
                models,
                endpoint_url,
                latency_ms,
            } => write!(
                f,
                "Available at {endpoint_url} ({latency_ms}ms): {} model(s)",
                models.len()
            ),
            Self::NotRunning => write!(f, "Not running (connection refused)"),
            Self::Timeout => write!(f, "Timeout (no response)"),
            Self::Unhealthy {
                status_code,
                message,
            } => write!(f, "Unhealthy (HTTP {status_code}): {message}"),
            Self::IncompatibleResponse { detail } => write!(f, "Incompatible response: {detail}"),
        }
    }
}

/// Probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Server root, or a full generate URL (the path is stripped).
    pub endpoint_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_GENERATE_URL)
    }
}

impl ProbeConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Lists the models a server has installed.
pub struct ModelProbe {
    config: ProbeConfig,
    client: reqwest::Client,
}

impl ModelProbe {
    pub fn new(config: ProbeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Query `/api/tags` and classify the answer.
    pub async fn list_models(&self) -> ProbeStatus {
        let base = server_base(&self.config.endpoint_url);
        let url = format!("{base}/api/tags");
        debug!(%url, "probing models");

        let start = Instant::now();
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let body = resp.text().await.unwrap_or_default();
                match parse_tags_response(&body) {
                    Some(models) => ProbeStatus::Available {
                        models,
                        endpoint_url: base.to_owned(),
                        latency_ms,
                    },
                    None => ProbeStatus::IncompatibleResponse {
                        detail: "/api/tags did not return a model list".to_owned(),
                    },
                }
            }
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                let message = if body.is_empty() {
                    format!("HTTP {status_code}")
                } else {
                    body.chars().take(500).collect()
                };
                ProbeStatus::Unhealthy {
                    status_code,
                    message,
                }
            }
            Err(e) => classify_reqwest_error(&e),
        }
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ProbeStatus {
    if err.is_timeout() {
        ProbeStatus::Timeout
    } else if err.is_connect() {
        ProbeStatus::NotRunning
    } else {
        ProbeStatus::IncompatibleResponse {
            detail: format!("transport error: {err}"),
        }
    }
}

/// Parse `{"models": [{"name": "llama3:8b", "size": 123}, ...]}`.
pub fn parse_tags_response(body: &str) -> Option<Vec<ServerModel>> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let entries = json.get("models")?.as_array()?;
    let models = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            Some(ServerModel {
                name: name.to_owned(),
                size: entry.get("size").and_then(serde_json::Value::as_u64),
            })
        })
        .collect();
    Some(models)
}
