//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment. Env vars (`BIBDEX_*`, nested with `__`) form the base layer and an
//! optional TOML file is merged on top. Every knob has a default, so an empty config is a valid
//! config: in-memory store, in-memory sink, nothing to do, done quickly.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::SinkConfig;
use crate::error::PipelineError;
use crate::indexer::BatchConfig;
use crate::merge::MergeConfig;
use crate::store::StoreConfig;

/// 📦 One struct to rule them all, one struct to find them, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// 🧵 Pool sizes and queue depths. 0 workers runs that pool inline, in the orchestrator.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_merge_workers")]
    pub merge_workers: usize,
    #[serde(default = "default_record_workers")]
    pub record_workers: usize,
    #[serde(default = "default_push_workers")]
    pub push_workers: usize,
    /// 📬 Requests waiting for a merge or record worker before `submit` starts pushing back.
    #[serde(default = "default_merge_queue_depth")]
    pub merge_queue_depth: usize,
    #[serde(default = "default_push_queue_depth")]
    pub push_queue_depth: usize,
    /// 🛑 How long a worker gets to wind down before it is aborted.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_merge_workers() -> usize {
    4
}

fn default_record_workers() -> usize {
    4
}

fn default_push_workers() -> usize {
    2
}

fn default_merge_queue_depth() -> usize {
    8
}

fn default_push_queue_depth() -> usize {
    4
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            merge_workers: default_merge_workers(),
            record_workers: default_record_workers(),
            push_workers: default_push_workers(),
            merge_queue_depth: default_merge_queue_depth(),
            push_queue_depth: default_push_queue_depth(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// 🎬 Orchestration knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 🔖 Logical name under which the last successful run is remembered.
    #[serde(default = "default_checkpoint_key")]
    pub checkpoint_key: String,
    /// 🎯 Suffix the checkpoint key with the index endpoint, so two indexes keep separate checkpoints.
    #[serde(default)]
    pub checkpoint_per_endpoint: bool,
    /// 👯 Process singles in a sibling task with its own pools, alongside the clusters.
    #[serde(default)]
    pub parallel_singles: bool,
    /// 📄 Ids fetched from the store per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// 📈 Log counters every this many processed units. 0 keeps quiet.
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_checkpoint_key() -> String {
    "Last Index Update".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_log_interval() -> u64 {
    1000
}

fn default_progress() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint_key: default_checkpoint_key(),
            checkpoint_per_endpoint: false,
            parallel_singles: false,
            page_size: default_page_size(),
            log_interval: default_log_interval(),
            progress: default_progress(),
        }
    }
}

impl AppConfig {
    /// 🔒 Reject settings that cannot work, before anything is opened or spawned.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |message: &str| Err(PipelineError::Config(message.to_string()));
        if self.pipeline.page_size == 0 {
            return invalid("pipeline.page_size must be at least 1");
        }
        if self.runtime.merge_queue_depth == 0 || self.runtime.push_queue_depth == 0 {
            return invalid("runtime queue depths must be at least 1");
        }
        if self.batch.max_records == 0 {
            return invalid("batch.max_records must be at least 1");
        }
        if self.batch.max_bytes == 0 {
            return invalid("batch.max_bytes must be at least 1");
        }
        if self.pipeline.checkpoint_key.trim().is_empty() {
            return invalid("pipeline.checkpoint_key must not be empty");
        }
        if let SinkConfig::Solr(solr) = &self.sink {
            if solr.url.trim().is_empty() {
                return invalid("sink.Solr.url must not be empty");
            }
            if solr.max_update_tries == 0 {
                return invalid("sink.Solr.max_update_tries must be at least 1");
            }
        }
        Ok(())
    }
}

/// 🚀 Load the config from env vars, plus a TOML file when one is given. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name);

    let config = Figment::new().merge(Env::prefixed("BIBDEX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BIBDEX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BIBDEX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        file.write_all(contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn the_one_where_the_toml_fills_every_drawer() -> anyhow::Result<()> {
        let file = write_test_config(
            r#"
            [runtime]
            merge_workers = 8
            push_queue_depth = 2

            [store.JsonFile]
            path = "records.json"

            [sink.Solr]
            url = "http://localhost:8983/solr/biblio"
            username = "user"
            password = "pass"
            max_update_tries = 3

            [sink.Solr.health]
            url = "http://localhost:8983/solr/admin/collections?action=CLUSTERSTATUS"

            [batch]
            max_records = 100

            [merge]
            copy_to_children = ["format"]

            [pipeline]
            parallel_singles = true
            checkpoint_per_endpoint = true
            "#,
        )?;

        let config = load_config(Some(file.path()))?;
        assert_eq!(config.runtime.merge_workers, 8);
        assert_eq!(config.runtime.record_workers, 4);
        assert_eq!(config.runtime.push_queue_depth, 2);
        assert_eq!(config.batch.max_records, 100);
        assert_eq!(config.batch.max_delete_records, 1000);
        assert_eq!(config.merge.copy_to_children, vec!["format".to_string()]);
        assert!(config.pipeline.parallel_singles);
        assert_eq!(config.pipeline.checkpoint_key, "Last Index Update");
        assert!(matches!(config.store, StoreConfig::JsonFile(_)));
        match &config.sink {
            SinkConfig::Solr(solr) => {
                assert_eq!(solr.max_update_tries, 3);
                assert_eq!(solr.username.as_deref(), Some("user"));
                assert!(solr.health.is_some());
            }
            honestly_who_knows => panic!("💀 Expected a Solr sink, serde took us to {honestly_who_knows:?}"),
        }
        config.validate()?;
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_file_is_a_perfectly_fine_config() -> anyhow::Result<()> {
        let file = write_test_config("")?;
        let config = load_config(Some(file.path()))?;
        assert!(matches!(config.sink, SinkConfig::InMemory(())));
        assert!(matches!(config.store, StoreConfig::InMemory(())));
        assert_eq!(config.runtime.merge_queue_depth, 8);
        assert_eq!(config.batch.commit_interval, 50_000);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn the_one_where_validation_says_no() {
        let mut config = AppConfig::default();
        config.runtime.push_queue_depth = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = AppConfig::default();
        config.pipeline.page_size = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = AppConfig {
            sink: SinkConfig::Solr(crate::backends::SolrSinkConfig::new("  ")),
            ..Default::default()
        };
        let err = config.validate().expect_err("💀 an empty url is not a url");
        assert!(err.to_string().contains("url"));
    }
}
