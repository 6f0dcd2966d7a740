//! 🧾 What a run did, in numbers.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};

use crate::indexer::IndexerStats;
use crate::pipeline::state::RunState;
use crate::progress::{format_duration, format_number};

/// 📊 Counters for one run. Clusters and singles count work units; documents and deletions count
/// what reached the indexer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// 🔢 Merge results absorbed, clusters and singles together.
    pub processed: u64,
    pub clusters: u64,
    /// 🧬 Clusters that produced a merged document.
    pub merged_clusters: u64,
    pub singles: u64,
    /// ⏭️ Standalone records dropped as data faults.
    pub skipped: u64,
    pub documents: u64,
    pub deletions: u64,
    pub batches: u64,
    pub commits: u64,
    pub checkpoint_saved: bool,
    pub elapsed: Duration,
    /// 🗺️ The states the run passed through, in order.
    pub states: Vec<RunState>,
}

impl RunSummary {
    /// ✅ Did anything go toward the index?
    pub fn did_work(&self) -> bool {
        self.documents > 0 || self.deletions > 0
    }

    /// ➕ Fold in the counters of a sibling run. States and elapsed time stay ours.
    pub fn absorb(&mut self, other: &RunSummary) {
        self.processed += other.processed;
        self.clusters += other.clusters;
        self.merged_clusters += other.merged_clusters;
        self.singles += other.singles;
        self.skipped += other.skipped;
        self.documents += other.documents;
        self.deletions += other.deletions;
        self.batches += other.batches;
        self.commits += other.commits;
    }

    /// 📦 Take the indexer's own numbers for what was sent.
    pub(crate) fn record_indexer(&mut self, stats: IndexerStats) {
        self.documents = stats.documents;
        self.deletions = stats.deletions;
        self.batches = stats.batches;
        self.commits = stats.commits;
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["📚 bibdex run", ""]);
        let rows: [(&str, String); 10] = [
            ("clusters", format_number(self.clusters)),
            ("merged clusters", format_number(self.merged_clusters)),
            ("singles", format_number(self.singles)),
            ("skipped", format_number(self.skipped)),
            ("documents added", format_number(self.documents)),
            ("deletions", format_number(self.deletions)),
            ("batches", format_number(self.batches)),
            ("commits", format_number(self.commits)),
            ("checkpoint", if self.checkpoint_saved { "saved" } else { "unchanged" }.to_string()),
            ("elapsed", format_duration(self.elapsed)),
        ];
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(value).set_alignment(CellAlignment::Right)]);
        }
        table
    }
}
