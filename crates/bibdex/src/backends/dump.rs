use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
};
use tracing::{debug, trace};

use crate::backends::{IndexRequest, Sink};
use crate::composers;

// -- 🗂️ DumpSinkConfig lives next to its DumpSink. One backend = one config = one file.
#[derive(Debug, Deserialize, Clone)]
pub struct DumpSinkConfig {
    /// 📁 Every file is named `{prefix}-{NNNNNN}.json`. The prefix may carry a directory; that
    /// directory has to exist already.
    pub prefix: String,
}

/// 🗂️ DumpSink: writes each add or delete body to its own numbered file instead of indexing it.
///
/// No network, no retries, no health checks. Commits have nothing to make visible and are
/// skipped. The sequence counter is shared by every dump sink of a run, so numbering is global.
///
/// ⚠️ `File::create` truncates. Re-running with the same prefix overwrites the previous dump.
#[derive(Debug)]
pub struct DumpSink {
    config: DumpSinkConfig,
    sequence: Arc<AtomicUsize>,
}

impl DumpSink {
    pub fn new(config: DumpSinkConfig, sequence: Arc<AtomicUsize>) -> Self {
        Self { config, sequence }
    }

    /// 📁 The next file name. Numbering starts at 1.
    fn next_path(&self) -> PathBuf {
        let number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        PathBuf::from(format!("{}-{:06}.json", self.config.prefix, number))
    }

    async fn write_body(&self, body: &str) -> Result<PathBuf> {
        let path = self.next_path();
        let file = File::create(&path).await.with_context(|| {
            format!(
                "💀 The dump file '{}' could not be created. We stared at the path. The path stared back. \
                 Does the parent directory exist?",
                path.display()
            )
        })?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(body.as_bytes()).await.with_context(|| {
            format!("💀 Writing the dump file '{}' failed halfway through a sentence.", path.display())
        })?;
        // -- 🚽 always flush. async Drop is still not a thing.
        writer.flush().await.with_context(|| {
            format!(
                "💀 Flushing the dump file '{}' failed. The bytes were so close to the disk.",
                path.display()
            )
        })?;
        Ok(path)
    }
}

#[async_trait]
impl Sink for DumpSink {
    async fn send(&mut self, request: IndexRequest) -> Result<()> {
        if matches!(request, IndexRequest::Commit) {
            trace!("🗂️ dump mode: commit skipped, there is nothing to make visible");
            return Ok(());
        }
        let kind = request.kind();
        let body = composers::compose(&request)?;
        let path = self.write_body(&body).await?;
        debug!("🗂️ dumped {} request with {} item(s) to {}", kind, request.items(), path.display());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        trace!("🗂️ dump sink closing. every file was flushed on the way out.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_every_batch_gets_its_own_numbered_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("batch").to_string_lossy().into_owned();
        let sequence = Arc::new(AtomicUsize::new(0));
        let mut first = DumpSink::new(DumpSinkConfig { prefix: prefix.clone() }, sequence.clone());
        let mut second = DumpSink::new(DumpSinkConfig { prefix: prefix.clone() }, sequence);

        first.send(IndexRequest::Add(vec![r#"{"id":"a"}"#.into()])).await?;
        second.send(IndexRequest::Delete(vec!["b".into()])).await?;
        first.send(IndexRequest::Commit).await?;
        first.close().await?;

        let one = tokio::fs::read_to_string(format!("{prefix}-000001.json")).await?;
        let two = tokio::fs::read_to_string(format!("{prefix}-000002.json")).await?;
        assert_eq!(one, r#"[{"id":"a"}]"#);
        assert_eq!(two, r#"{"delete":{"id":"b"}}"#);
        assert!(!std::path::Path::new(&format!("{prefix}-000003.json")).exists());

        let parsed: serde_json::Value = serde_json::from_str(&one)?;
        assert!(parsed.is_array());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_directory_is_imaginary() {
        let mut sink = DumpSink::new(
            DumpSinkConfig {
                prefix: "/definitely/not/a/real/dir/batch".into(),
            },
            Arc::new(AtomicUsize::new(0)),
        );
        let err = sink
            .send(IndexRequest::Add(vec!["{}".into()]))
            .await
            .expect_err("💀 writing into the void should fail");
        assert!(format!("{err:#}").contains("could not be created"));
    }
}
