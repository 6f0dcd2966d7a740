//! 📡 The Solr sink: POST update bodies, retry when the index sulks, gate on cluster health.
//!
//! ```text
//! send(request)
//!   └─ compose body ─▶ for attempt in 1..=max_update_tries
//!                        ├─ health gate (optional, cached for check_interval)
//!                        ├─ POST {url}/update, content-type JSON
//!                        └─ 2xx? done : warn, sleep update_retry_wait, try again
//!      exhausted ─▶ PipelineError::RetriesExhausted (aborts the run)
//! ```

pub mod health;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backends::{IndexRequest, RequestKind, Sink};
use crate::composers;
use crate::error::PipelineError;
use health::{HealthConfig, HealthMonitor};

#[derive(Debug, Deserialize, Clone)]
pub struct SolrSinkConfig {
    /// 📡 Base URL of the collection, e.g. `http://localhost:8983/solr/biblio`. `/update` is appended.
    pub url: String,
    /// 🔒 Optional basic auth.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔄 Attempts per request, the first one included.
    #[serde(default = "default_max_update_tries")]
    pub max_update_tries: u32,
    /// 💤 Fixed wait between attempts.
    #[serde(default = "default_update_retry_wait_ms")]
    pub update_retry_wait_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// ⏱️ Commits can take a while on a big index; this overrides the timeout for them only.
    #[serde(default)]
    pub commit_timeout_secs: Option<u64>,
    /// 🏥 Cluster health gating. Absent means never check.
    #[serde(default)]
    pub health: Option<HealthConfig>,
}

fn default_max_update_tries() -> u32 {
    15
}

fn default_update_retry_wait_ms() -> u64 {
    60_000
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl SolrSinkConfig {
    /// 🏗️ A config for `url` with every knob at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            max_update_tries: default_max_update_tries(),
            update_retry_wait_ms: default_update_retry_wait_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            commit_timeout_secs: None,
            health: None,
        }
    }

    pub fn update_url(&self) -> String {
        format!("{}/update", self.url.trim_end_matches('/'))
    }
}

/// 📡 One worker's connection to the index. Holds its own client; nothing is shared.
#[derive(Debug)]
pub struct SolrSink {
    client: reqwest::Client,
    config: SolrSinkConfig,
    update_url: String,
    health: Option<HealthMonitor>,
    /// 🔄 Failed attempts that were followed by another try, over this sink's lifetime.
    retries: u64,
}

impl SolrSink {
    /// 🚀 Build the client. No network traffic happens here; the first push finds out whether
    /// the index is really there.
    pub fn new(config: SolrSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS setup problem on this machine.")?;
        let credentials = config
            .username
            .clone()
            .map(|username| (username, config.password.clone()));
        let health = config
            .health
            .clone()
            .map(|health| HealthMonitor::new(health, client.clone(), credentials));
        Ok(Self {
            update_url: config.update_url(),
            client,
            config,
            health,
            retries: 0,
        })
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }

    fn timeout_for(&self, kind: RequestKind) -> Duration {
        let seconds = match (kind, self.config.commit_timeout_secs) {
            (RequestKind::Commit, Some(commit_timeout)) => commit_timeout,
            _ => self.config.request_timeout_secs,
        };
        Duration::from_secs(seconds)
    }

    /// 🔄 The retry loop. Health is checked before every attempt (the monitor caches good news).
    async fn push(&mut self, kind: RequestKind, body: String) -> Result<()> {
        let max_tries = self.config.max_update_tries.max(1);
        let wait = Duration::from_millis(self.config.update_retry_wait_ms);
        let timeout = self.timeout_for(kind);
        let mut last_error = String::new();

        for attempt in 1..=max_tries {
            if let Some(health) = self.health.as_mut() {
                health.wait_until_healthy().await?;
            }
            match self.post_once(&body, timeout).await {
                Ok(()) => {
                    trace!("🚀 {} request landed on attempt {}", kind, attempt);
                    return Ok(());
                }
                Err(err) => {
                    last_error = format!("{err:#}");
                    if attempt < max_tries {
                        self.retries += 1;
                        warn!(
                            "🔄 {} request to {} failed (attempt {}/{}): {}. Retrying in {:?}.",
                            kind, self.update_url, attempt, max_tries, last_error, wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(PipelineError::RetriesExhausted {
            url: self.update_url.clone(),
            attempts: max_tries,
            last_error,
        }
        .into())
    }

    async fn post_once(&self, body: &str, timeout: Duration) -> Result<()> {
        let mut request = self
            .client
            .post(&self.update_url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request
            .body(body.to_owned())
            .send()
            .await
            .context("💀 The update request never made it to the index. Check connectivity, check timeouts.")?;

        let status = response.status();
        if !status.is_success() {
            let response_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The index answered '{}' to our update. It said: '{}'",
                status,
                response_body
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for SolrSink {
    async fn send(&mut self, request: IndexRequest) -> Result<()> {
        let kind = request.kind();
        let body = composers::compose(&request)?;
        debug!(
            "📡 sending {} request ({} item(s), {} bytes) to {}",
            kind,
            request.items(),
            body.len(),
            self.update_url
        );
        self.push(kind, body).await
    }

    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ Solr sink closing. No buffer, nothing to flush.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(server: &MockServer, tries: u32) -> SolrSinkConfig {
        let mut config = SolrSinkConfig::new(format!("{}/solr/biblio", server.uri()));
        config.max_update_tries = tries;
        config.update_retry_wait_ms = 1;
        config
    }

    async fn post_count(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.method.as_str() == "POST")
            .count()
    }

    #[tokio::test]
    async fn the_one_where_two_500s_are_just_a_bad_mood() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/solr/biblio/update"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/solr/biblio/update"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut sink = SolrSink::new(fast_config(&server, 5))?;
        sink.send(IndexRequest::Add(vec![r#"{"id":"1"}"#.into()])).await?;
        assert_eq!(post_count(&server).await, 3);
        assert_eq!(sink.retries(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_index_never_forgives() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("go away"))
            .mount(&server)
            .await;

        let mut sink = SolrSink::new(fast_config(&server, 3))?;
        let err = sink
            .send(IndexRequest::Delete(vec!["1".into()]))
            .await
            .expect_err("💀 three strikes");
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::RetriesExhausted {
                attempts, last_error, ..
            }) => {
                assert_eq!(*attempts, 3);
                assert!(last_error.contains("go away"));
            }
            other => panic!("💀 expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(post_count(&server).await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_commit_sends_the_magic_words_with_credentials() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/solr/biblio/update"))
            .and(body_string(r#"{"commit":{}}"#))
            // -- 🔒 base64("user:pass")
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = fast_config(&server, 1);
        config.username = Some("user".into());
        config.password = Some("pass".into());
        config.commit_timeout_secs = Some(3600);
        let mut sink = SolrSink::new(config)?;
        assert_eq!(sink.timeout_for(RequestKind::Commit), Duration::from_secs(3600));
        assert_eq!(sink.timeout_for(RequestKind::Add), Duration::from_secs(300));
        sink.send(IndexRequest::Commit).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_we_wait_for_the_cluster_to_feel_better() -> Result<()> {
        let server = MockServer::start().await;
        let degraded = serde_json::json!({"cluster": {"collections": {"biblio": {"shards": {
            "shard1": {"state": "active", "replicas": {"r1": {"state": "recovering"}}}
        }}}}});
        let healthy = serde_json::json!({"cluster": {"collections": {"biblio": {"shards": {
            "shard1": {"state": "active", "replicas": {"r1": {"state": "active"}}}
        }}}}});
        Mock::given(method("GET"))
            .and(path("/solr/admin/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(degraded))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/solr/admin/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(healthy))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/solr/biblio/update"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut config = fast_config(&server, 1);
        let mut health = HealthConfig::new(format!("{}/solr/admin/collections", server.uri()));
        health.degraded_wait_ms = 1;
        config.health = Some(health);

        let mut sink = SolrSink::new(config)?;
        sink.send(IndexRequest::Add(vec![r#"{"id":"1"}"#.into()])).await?;
        // -- 🏥 good news is cached: the second push skips the health check
        sink.send(IndexRequest::Add(vec![r#"{"id":"2"}"#.into()])).await?;

        let requests = server.received_requests().await.unwrap_or_default();
        let gets = requests.iter().filter(|r| r.method.as_str() == "GET").count();
        assert_eq!(gets, 3);
        assert_eq!(post_count(&server).await, 2);
        Ok(())
    }
}
