//! 🧪 End-to-end runs against the in-memory store and the in-memory or dump sinks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use bibdex::app_config::AppConfig;
use bibdex::backends::{DumpSinkConfig, InMemorySink, SinkConfig, SinkFactory};
use bibdex::common::{DedupCluster, Document, FieldValue, MemberRecord};
use bibdex::error::PipelineError;
use bibdex::pipeline::{Pipeline, RunOptions, RunState};
use bibdex::store::{InMemoryStore, Selection};
use bibdex::supervisors::ExitStatus;
use bibdex::transforms::{DocumentBuilder, RawFields};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

const CHECKPOINT: &str = "Last Index Update";

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).single().unwrap_or_default()
}

fn record(id: &str, fields: &[(&str, &str)], dedup_id: Option<&str>, updated: DateTime<Utc>) -> MemberRecord {
    MemberRecord {
        id: id.into(),
        source_id: id.split('.').next().unwrap_or_default().into(),
        deleted: false,
        suppressed: false,
        updated,
        dedup_id: dedup_id.map(str::to_string),
        fields: fields
            .iter()
            .map(|(name, value)| (name.to_string(), FieldValue::from(*value)))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn cluster(id: &str, members: &[&str]) -> DedupCluster {
    DedupCluster {
        id: id.into(),
        member_ids: members.iter().map(|m| m.to_string()).collect(),
        deleted: false,
        changed: at(10),
    }
}

/// 📚 Two sources, one cluster of Moby Dicks, three standalone books.
fn library() -> InMemoryStore {
    InMemoryStore::from_parts(
        vec![
            record("a.1", &[("title", "Moby Dick"), ("topic_mv", "Whales")], Some("c1"), at(10)),
            record("b.1", &[("title", "MOBY-DICK"), ("topic_mv", "whales")], Some("c1"), at(10)),
            record("a.2", &[("title", "Typee")], None, at(10)),
            record("b.2", &[("title", "Omoo")], None, at(10)),
            record("b.3", &[("title", "Mardi")], None, at(10)),
        ],
        vec![cluster("c1", &["a.1", "b.1"])],
    )
}

fn config(parallel_singles: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.progress = false;
    config.pipeline.page_size = 2;
    config.pipeline.parallel_singles = parallel_singles;
    config.runtime.merge_workers = 2;
    config.runtime.record_workers = 2;
    config.runtime.push_workers = 2;
    config.runtime.merge_queue_depth = 1;
    config.batch.max_records = 2;
    config
}

fn pipeline(config: AppConfig, store: &InMemoryStore, sinks: SinkFactory, cancel: CancellationToken) -> Pipeline {
    Pipeline::new(config, Arc::new(store.clone()), Arc::new(RawFields), sinks, cancel)
}

fn memory_sinks(memory: &InMemorySink) -> SinkFactory {
    SinkFactory::with_memory(SinkConfig::InMemory(()), memory.clone())
}

async fn added_ids(memory: &InMemorySink) -> Result<BTreeSet<String>> {
    Ok(memory
        .added_documents()
        .await?
        .iter()
        .filter_map(|doc| doc["id"].as_str().map(str::to_string))
        .collect())
}

#[tokio::test]
async fn the_one_where_the_library_goes_in_and_the_clusters_get_merged() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await?;

    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.merged_clusters, 1);
    assert_eq!(summary.singles, 3);
    assert_eq!(summary.documents, 6);
    assert_eq!(summary.deletions, 0);
    assert!(summary.checkpoint_saved);
    assert_eq!(
        added_ids(&memory).await?,
        ["a.1", "a.2", "b.1", "b.2", "b.3", "c1"].into_iter().map(String::from).collect()
    );

    let documents = memory.added_documents().await?;
    let merged = documents
        .iter()
        .find(|doc| doc["id"] == "c1")
        .ok_or_else(|| anyhow::anyhow!("no merged document"))?;
    assert_eq!(merged["merged_boolean"], true);
    assert_eq!(merged["local_ids_str_mv"], serde_json::json!(["a.1", "b.1"]));
    assert_eq!(merged["topic_mv"], serde_json::json!(["Whales"]));
    // -- 🏆 fewer capitals, better score: the mixed-case title wins
    assert_eq!(merged["title"], "Moby Dick");

    let requests = memory.requests().await;
    assert_eq!(requests.last(), Some(&bibdex::backends::IndexRequest::Commit));
    assert_eq!(memory.commits().await, 1);
    assert!(store.checkpoint(CHECKPOINT).await.is_some());
    Ok(())
}

#[tokio::test]
async fn the_one_where_the_next_run_only_sees_what_changed() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await?;
    let first = store.checkpoint(CHECKPOINT).await;

    store
        .upsert_record(record("c.1", &[("title", "Pierre")], None, Utc::now() + Duration::minutes(5)))
        .await;
    let memory = InMemorySink::new();
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await?;

    assert_eq!(summary.clusters, 0);
    assert_eq!(summary.singles, 1);
    assert_eq!(added_ids(&memory).await?, BTreeSet::from(["c.1".to_string()]));
    assert!(store.checkpoint(CHECKPOINT).await > first);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_filtered_run_does_not_touch_the_checkpoint() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    let options = RunOptions {
        selection: Selection {
            single_id: Some("b.2".into()),
            ..Default::default()
        },
        full: false,
    };
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(options)
        .await?;

    assert_eq!(summary.singles, 1);
    assert_eq!(summary.clusters, 0);
    assert!(!summary.checkpoint_saved);
    assert!(!summary.states.contains(&RunState::Checkpoint));
    assert_eq!(store.checkpoint(CHECKPOINT).await, None);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_source_leaves_the_index() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    let options = RunOptions {
        selection: Selection {
            delete_source: Some("b".into()),
            ..Default::default()
        },
        full: false,
    };
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(options)
        .await?;

    let deleted: BTreeSet<String> = memory.deleted_ids().await.into_iter().collect();
    assert_eq!(
        deleted,
        ["b.1", "b.2", "b.3", "c1"].into_iter().map(String::from).collect()
    );
    // -- 👤 the cluster collapsed to one survivor, which goes back in as a plain record
    assert_eq!(added_ids(&memory).await?, BTreeSet::from(["a.1".to_string()]));
    assert_eq!(memory.added_documents().await?[0].get("merged_child_boolean"), None);
    assert_eq!(summary.deletions, 4);
    assert_eq!(store.checkpoint(CHECKPOINT).await, None);
    Ok(())
}

#[tokio::test]
async fn the_one_where_singles_run_next_door() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    let pipeline = pipeline(config(true), &store, memory_sinks(&memory), CancellationToken::new());
    let summary = pipeline.run(RunOptions::default()).await?;

    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.singles, 3);
    assert_eq!(summary.documents, 6);
    assert_eq!(added_ids(&memory).await?.len(), 6);
    // -- ✅ one commit, issued by the main run after the sibling reported in
    assert_eq!(memory.commits().await, 1);
    assert_eq!(memory.requests().await.last(), Some(&bibdex::backends::IndexRequest::Commit));
    assert_eq!(pipeline.supervisor().external_status("singles"), Some(ExitStatus::Success));
    assert!(summary.checkpoint_saved);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_broken_member_stops_everything() -> Result<()> {
    let store = library();
    store.upsert_record(record("b.1", &[], Some("c1"), at(10))).await;
    let memory = InMemorySink::new();
    let err = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await
        .expect_err("💀 a cluster with a hole must not be indexed");

    assert!(format!("{err:#}").contains("b.1"));
    assert_eq!(memory.commits().await, 0);
    assert_eq!(store.checkpoint(CHECKPOINT).await, None);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_broken_single_is_just_skipped() -> Result<()> {
    let store = library();
    store.upsert_record(record("b.4", &[], None, at(10))).await;
    let memory = InMemorySink::new();
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await?;

    assert_eq!(summary.singles, 4);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.documents, 6);
    assert!(summary.checkpoint_saved);
    Ok(())
}

#[tokio::test]
async fn the_one_where_ctrl_c_arrives_before_anything_happens() -> Result<()> {
    let store = library();
    let memory = InMemorySink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline(config(true), &store, memory_sinks(&memory), cancel)
        .run(RunOptions::default())
        .await
        .expect_err("🛑 an interrupted run is not a successful run");

    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Interrupted)));
    assert!(memory.requests().await.is_empty());
    assert_eq!(store.checkpoint(CHECKPOINT).await, None);
    Ok(())
}

/// 🛑 Pulls the plug the moment the first document is built.
#[derive(Debug)]
struct CancelOnFirstBuild {
    cancel: CancellationToken,
}

impl DocumentBuilder for CancelOnFirstBuild {
    fn build(&self, record: &MemberRecord) -> Result<Document> {
        self.cancel.cancel();
        RawFields.build(record)
    }
}

#[tokio::test]
async fn the_one_where_ctrl_c_arrives_halfway_through() -> Result<()> {
    let store = InMemoryStore::from_parts(
        (0..50)
            .map(|n| record(&format!("a.{n:02}"), &[("title", "Bartleby")], None, at(10)))
            .collect(),
        vec![],
    );
    let memory = InMemorySink::new();
    let cancel = CancellationToken::new();
    let builder = CancelOnFirstBuild { cancel: cancel.clone() };
    let err = Pipeline::new(
        config(false),
        Arc::new(store.clone()),
        Arc::new(builder),
        memory_sinks(&memory),
        cancel,
    )
    .run(RunOptions::default())
    .await
    .expect_err("🛑 an interrupted run is not a successful run");

    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Interrupted)));
    // -- ⏳ what was already dispatched still made it out and got committed
    let added = memory.added_documents().await?;
    assert!(!added.is_empty());
    assert!(added.len() < 50);
    assert_eq!(memory.commits().await, 1);
    assert_eq!(memory.requests().await.last(), Some(&bibdex::backends::IndexRequest::Commit));
    assert_eq!(store.checkpoint(CHECKPOINT).await, None);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_dissolved_cluster_frees_its_members() -> Result<()> {
    let store = library();
    pipeline(config(false), &store, memory_sinks(&InMemorySink::new()), CancellationToken::new())
        .run(RunOptions::default())
        .await?;

    // -- 🗑️ the members keep their old timestamps, only the cluster changed
    store
        .upsert_cluster(DedupCluster {
            deleted: true,
            changed: Utc::now() + Duration::minutes(5),
            ..cluster("c1", &["a.1", "b.1"])
        })
        .await;
    let memory = InMemorySink::new();
    let summary = pipeline(config(false), &store, memory_sinks(&memory), CancellationToken::new())
        .run(RunOptions::default())
        .await?;

    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.singles, 0);
    assert_eq!(memory.deleted_ids().await, vec!["c1".to_string()]);
    assert_eq!(
        added_ids(&memory).await?,
        ["a.1", "b.1"].into_iter().map(String::from).collect()
    );
    for doc in memory.added_documents().await? {
        assert_eq!(doc.get("merged_child_boolean"), None);
        assert_eq!(doc.get("dedup_id_str_mv"), None);
    }
    assert!(summary.checkpoint_saved);
    Ok(())
}

#[tokio::test]
async fn the_one_where_the_index_is_a_pile_of_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("batch").to_string_lossy().into_owned();
    let store = library();
    store
        .upsert_record(MemberRecord {
            deleted: true,
            ..record("b.3", &[("title", "Mardi")], None, at(10))
        })
        .await;

    let mut config = config(false);
    config.batch.max_records = 100;
    config.runtime.push_workers = 0;
    let sinks = SinkFactory::new(SinkConfig::Dump(DumpSinkConfig { prefix: prefix.clone() }));
    let summary = pipeline(config, &store, sinks, CancellationToken::new())
        .run(RunOptions::default())
        .await?;
    assert_eq!(summary.documents, 5);
    assert_eq!(summary.deletions, 1);

    let mut names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["batch-000001.json", "batch-000002.json"]);

    let bodies: Vec<String> = names
        .iter()
        .map(|name| std::fs::read_to_string(dir.path().join(name)))
        .collect::<std::io::Result<_>>()?;
    assert!(bodies.iter().any(|body| body.contains(r#""delete":{"id":"b.3"}"#)));
    assert!(bodies.iter().any(|body| body.starts_with('[') && body.contains("Moby Dick")));
    Ok(())
}
