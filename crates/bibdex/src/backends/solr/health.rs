//! 🏥 Cluster health gating.
//!
//! The admin endpoint returns the cluster status as collections → shards → replicas, each with a
//! `state`. Anything outside `normal_states` downgrades the verdict: to `Degraded` when the state
//! is in `degraded_states`, to `Error` otherwise. The worst verdict wins.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PipelineError;

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// 📡 Full URL of the cluster status call, query string included.
    pub url: String,
    #[serde(default = "default_normal_states")]
    pub normal_states: Vec<String>,
    #[serde(default = "default_degraded_states")]
    pub degraded_states: Vec<String>,
    #[serde(default = "default_wait_ms")]
    pub degraded_wait_ms: u64,
    #[serde(default = "default_max_degraded_tries")]
    pub max_degraded_tries: u32,
    #[serde(default = "default_wait_ms")]
    pub error_wait_ms: u64,
    #[serde(default = "default_max_error_tries")]
    pub max_error_tries: u32,
    /// ⏱️ An `Ok` verdict is trusted for this long before asking again.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_normal_states() -> Vec<String> {
    vec!["active".to_string()]
}

fn default_degraded_states() -> Vec<String> {
    vec!["recovering".to_string(), "construction".to_string()]
}

fn default_wait_ms() -> u64 {
    10_000
}

fn default_max_degraded_tries() -> u32 {
    30
}

fn default_max_error_tries() -> u32 {
    10
}

fn default_check_interval_ms() -> u64 {
    30_000
}

impl HealthConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            normal_states: default_normal_states(),
            degraded_states: default_degraded_states(),
            degraded_wait_ms: default_wait_ms(),
            max_degraded_tries: default_max_degraded_tries(),
            error_wait_ms: default_wait_ms(),
            max_error_tries: default_max_error_tries(),
            check_interval_ms: default_check_interval_ms(),
        }
    }

    fn classify(&self, state: &str) -> ClusterHealth {
        if self.normal_states.iter().any(|normal| normal == state) {
            ClusterHealth::Ok
        } else if self.degraded_states.iter().any(|degraded| degraded == state) {
            ClusterHealth::Degraded
        } else {
            ClusterHealth::Error
        }
    }
}

/// 🚦 Ordered from good to bad, so `max` is "worst of".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterHealth {
    Ok,
    Degraded,
    Error,
}

impl fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterHealth::Ok => "ok",
            ClusterHealth::Degraded => "degraded",
            ClusterHealth::Error => "error",
        };
        f.write_str(name)
    }
}

/// 🔍 Judge a cluster status document. A document without collections is an `Error`:
/// we cannot vouch for what we cannot see.
pub fn evaluate(status: &Value, config: &HealthConfig) -> ClusterHealth {
    let Some(collections) = status.pointer("/cluster/collections").and_then(Value::as_object) else {
        return ClusterHealth::Error;
    };

    let mut verdict = ClusterHealth::Ok;
    for collection in collections.values() {
        let Some(shards) = collection.get("shards").and_then(Value::as_object) else {
            continue;
        };
        for shard in shards.values() {
            verdict = verdict.max(state_of(shard, config));
            if let Some(replicas) = shard.get("replicas").and_then(Value::as_object) {
                for replica in replicas.values() {
                    verdict = verdict.max(state_of(replica, config));
                }
            }
        }
    }
    verdict
}

fn state_of(node: &Value, config: &HealthConfig) -> ClusterHealth {
    match node.get("state").and_then(Value::as_str) {
        Some(state) => config.classify(state),
        None => ClusterHealth::Error,
    }
}

/// 🩺 Polls the cluster before pushes. One per push worker.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    client: reqwest::Client,
    credentials: Option<(String, Option<String>)>,
    last_ok: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        client: reqwest::Client,
        credentials: Option<(String, Option<String>)>,
    ) -> Self {
        Self {
            config,
            client,
            credentials,
            last_ok: None,
        }
    }

    /// 📡 One look at the cluster. A failed call counts as `Error`, it does not end the run by itself.
    pub async fn check(&self) -> ClusterHealth {
        let mut request = self.client.get(&self.config.url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_ref());
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("🏥 health check against {} failed: {}", self.config.url, err);
                return ClusterHealth::Error;
            }
        };
        if !response.status().is_success() {
            warn!("🏥 health check against {} answered {}", self.config.url, response.status());
            return ClusterHealth::Error;
        }
        match response.json::<Value>().await {
            Ok(status) => evaluate(&status, &self.config),
            Err(err) => {
                warn!("🏥 health check returned something that is not JSON: {}", err);
                ClusterHealth::Error
            }
        }
    }

    /// ⏳ Return once the cluster is `Ok`. Degraded and error verdicts each have their own wait
    /// and their own ceiling; reaching either ceiling is [`PipelineError::ClusterUnhealthy`].
    pub async fn wait_until_healthy(&mut self) -> Result<()> {
        let interval = Duration::from_millis(self.config.check_interval_ms);
        if let Some(last_ok) = self.last_ok {
            if last_ok.elapsed() < interval {
                return Ok(());
            }
        }
        self.last_ok = None;

        let mut degraded_tries = 0u32;
        let mut error_tries = 0u32;
        loop {
            let state = self.check().await;
            let (tries, ceiling, wait) = match state {
                ClusterHealth::Ok => {
                    debug!("🏥 cluster is healthy");
                    self.last_ok = Some(Instant::now());
                    return Ok(());
                }
                ClusterHealth::Degraded => {
                    degraded_tries += 1;
                    (degraded_tries, self.config.max_degraded_tries, self.config.degraded_wait_ms)
                }
                ClusterHealth::Error => {
                    error_tries += 1;
                    (error_tries, self.config.max_error_tries, self.config.error_wait_ms)
                }
            };
            if tries >= ceiling {
                return Err(PipelineError::ClusterUnhealthy {
                    state: state.to_string(),
                    tries,
                }
                .into());
            }
            warn!(
                "🏥 cluster is {} (check {}/{}), waiting {}ms before asking again",
                state, tries, ceiling, wait
            );
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
    }
}
