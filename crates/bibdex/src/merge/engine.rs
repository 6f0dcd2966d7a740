//! 🧬 The merge engine: a cluster of member records in, a [`MergeResult`] out.
//!
//! Filter → build → score → stable sort → field merge → collapse → propagate.
//! Apart from the document-building closure it is handed, every step is a pure function of its
//! input, which is what makes re-running a merge byte-identical.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, trace};

use crate::common::{
    DedupCluster, Document, FieldValue, MemberRecord, MergeResult, MergeRole, scalar_text,
};
use crate::merge::policy::{FieldClass, FieldPolicy, MergeConfig, ScoringPolicy};
use crate::merge::score::score;

/// 🚪 Why a member was left out of the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Deleted,
    Suppressed,
    SourceBeingDeleted,
}

/// 🧬 Stateless apart from its resolved policy. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    policy: FieldPolicy,
    weights: ScoringPolicy,
}

impl MergeEngine {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            policy: FieldPolicy::new(config),
            weights: config.scoring.clone(),
        }
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// 🎯 Score a member document with this engine's policy.
    pub fn score(&self, document: &Document) -> f64 {
        score(document, &self.policy, &self.weights)
    }

    /// 🚪 Deleted, suppressed, or from the source currently being deleted?
    pub fn exclusion(record: &MemberRecord, deleting_source: Option<&str>) -> Option<Exclusion> {
        if record.deleted {
            Some(Exclusion::Deleted)
        } else if record.suppressed {
            Some(Exclusion::Suppressed)
        } else if deleting_source == Some(record.source_id.as_str()) {
            Some(Exclusion::SourceBeingDeleted)
        } else {
            None
        }
    }

    /// 🧬 Merge a cluster.
    ///
    /// `build` turns a surviving member into its document. A build failure fails the whole
    /// cluster: a merged document must never quietly disappear without its deletion.
    pub fn merge_cluster<F>(
        &self,
        cluster: &DedupCluster,
        members: &[MemberRecord],
        deleting_source: Option<&str>,
        mut build: F,
    ) -> Result<MergeResult>
    where
        F: FnMut(&MemberRecord) -> Result<Document>,
    {
        let mut result = MergeResult::default();

        if cluster.deleted {
            debug!(
                "🗑️ cluster '{}' is deleted upstream; removing its merged document and freeing its members",
                cluster.id
            );
            // -- 🕊️ the children in the index still point at this cluster, so they are rewritten as plain records
            for member in members {
                if let Some(reason) = Self::exclusion(member, deleting_source) {
                    trace!("🚪 member '{}' of '{}' excluded: {:?}", member.id, cluster.id, reason);
                    result.deleted_ids.push(member.id.clone());
                    continue;
                }
                if member.dedup_id.as_deref().is_some_and(|owner| owner != cluster.id) {
                    trace!("🔀 member '{}' of '{}' moved on to another cluster", member.id, cluster.id);
                    continue;
                }
                let mut freed = build(member).with_context(|| {
                    format!(
                        "💀 Could not build member '{}' of deleted cluster '{}'. It would stay in the index as an orphaned child.",
                        member.id, cluster.id
                    )
                })?;
                freed.role = MergeRole::Standalone;
                freed.dedup_id = None;
                result.survivors.push(freed);
            }
            result.deleted_ids.push(cluster.id.clone());
            return Ok(result);
        }

        // -- 🚪 step 1: filter
        let mut survivors = Vec::with_capacity(members.len());
        for member in members {
            if let Some(reason) = Self::exclusion(member, deleting_source) {
                trace!("🚪 member '{}' of '{}' excluded: {:?}", member.id, cluster.id, reason);
                result.deleted_ids.push(member.id.clone());
                continue;
            }
            let document = build(member).with_context(|| {
                format!(
                    "💀 Could not build member '{}' of cluster '{}'. Refusing to merge a cluster with a hole in it.",
                    member.id, cluster.id
                )
            })?;
            survivors.push(document);
        }

        // -- 🎯 steps 2 + 3: score, then a stable descending sort (ties keep encounter order)
        let mut scored: Vec<(f64, Document)> = survivors
            .into_iter()
            .map(|doc| (self.score(&doc), doc))
            .collect();
        scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
        let mut survivors: Vec<Document> = scored.into_iter().map(|(_, doc)| doc).collect();

        // -- 🪓 step 5: collapse
        match survivors.len() {
            0 => {
                result.deleted_ids.push(cluster.id.clone());
            }
            1 => {
                let mut lonely = survivors.remove(0);
                lonely.role = MergeRole::Standalone;
                lonely.dedup_id = None;
                result.survivors.push(lonely);
                result.deleted_ids.push(cluster.id.clone());
            }
            _ => {
                let merged = self.merge_fields(&cluster.id, &survivors)?;
                for child in &mut survivors {
                    child.role = MergeRole::MergeChild;
                    child.dedup_id = Some(cluster.id.clone());
                    // -- 👇 step 6: propagation
                    self.propagate(&merged, child);
                }
                result.survivors = survivors;
                result.merged = Some(merged);
            }
        }

        Ok(result)
    }

    /// 📄 Standalone mode: one record, one document, same deleted/suppressed filter.
    pub fn convert_single<F>(
        &self,
        record: &MemberRecord,
        deleting_source: Option<&str>,
        build: F,
    ) -> Result<MergeResult>
    where
        F: FnOnce(&MemberRecord) -> Result<Document>,
    {
        let mut result = MergeResult::default();
        if let Some(reason) = Self::exclusion(record, deleting_source) {
            trace!("🚪 record '{}' excluded: {:?}", record.id, reason);
            result.deleted_ids.push(record.id.clone());
            return Ok(result);
        }
        let mut document = build(record)?;
        document.role = MergeRole::Standalone;
        document.dedup_id = None;
        result.survivors.push(document);
        Ok(result)
    }

    /// 🧺 Step 4: fold the sorted survivors into one synthetic document.
    fn merge_fields(&self, cluster_id: &str, sorted: &[Document]) -> Result<Document> {
        let mut merged = Document::new(cluster_id)?;
        merged.role = MergeRole::MergeResult;
        let mut seen = SeenValues::default();

        for member in sorted {
            merged.local_ids.push(member.id.clone());
            for (name, value) in &member.fields {
                match self.policy.classify(name) {
                    FieldClass::FullText => {
                        append_unique(&mut merged.fields, &mut seen, name, value, false);
                    }
                    FieldClass::Merged { case_sensitive } => {
                        append_unique(&mut merged.fields, &mut seen, name, value, case_sensitive);
                    }
                    FieldClass::Single => {
                        if merged.non_empty(name).is_none() && !value.is_empty() {
                            merged.fields.insert(name.clone(), value.clone());
                        }
                    }
                    FieldClass::PrimaryAuthor => {
                        self.merge_primary_author(&mut merged.fields, &mut seen, name, value);
                    }
                    FieldClass::Unclassified => {}
                }
            }
        }

        Ok(merged)
    }

    /// ✍️ The first author wins the primary slot; later, different authors become co-authors
    /// instead of vanishing.
    fn merge_primary_author(
        &self,
        fields: &mut BTreeMap<String, FieldValue>,
        seen: &mut SeenValues,
        name: &str,
        value: &FieldValue,
    ) {
        if value.is_empty() {
            return;
        }
        let Some(existing) = fields.get(name).filter(|existing| !existing.is_empty()) else {
            fields.insert(name.to_string(), value.clone());
            return;
        };
        let taken: HashSet<String> = existing
            .iter()
            .filter_map(scalar_text)
            .map(|text| text.to_lowercase())
            .collect();
        let newcomers: Vec<Value> = value
            .iter()
            .filter(|candidate| {
                scalar_text(candidate)
                    .is_some_and(|text| !text.is_empty() && !taken.contains(&text.to_lowercase()))
            })
            .cloned()
            .collect();
        if newcomers.is_empty() {
            return;
        }
        let secondary = self.policy.secondary_author_field();
        let case_sensitive = self.policy.is_case_sensitive(secondary);
        append_unique(
            fields,
            seen,
            secondary,
            &FieldValue::Many(newcomers),
            case_sensitive,
        );
    }

    /// 👇 Union the configured merged fields into a child.
    fn propagate(&self, merged: &Document, child: &mut Document) {
        let mut seen = SeenValues::default();
        for name in self.policy.copy_to_children() {
            let Some(value) = merged.fields.get(name) else {
                continue;
            };
            let case_sensitive = self.policy.is_case_sensitive(name);
            append_unique(&mut child.fields, &mut seen, name, value, case_sensitive);
        }
    }
}

/// 🔑 Per-field dedup keys already present in the target map.
#[derive(Debug, Default)]
struct SeenValues(HashMap<String, HashSet<String>>);

fn dedup_key(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

/// 🧺 Append the non-empty values of `value` to `fields[name]` (turning it into a list), skipping
/// anything already present under the same dedup key.
fn append_unique(
    fields: &mut BTreeMap<String, FieldValue>,
    seen: &mut SeenValues,
    name: &str,
    value: &FieldValue,
    case_sensitive: bool,
) {
    let keys = seen.0.entry(name.to_string()).or_insert_with(|| {
        // -- 🔑 first touch of this field: index whatever is already in the target
        fields
            .get(name)
            .map(|existing| {
                existing
                    .iter()
                    .filter_map(scalar_text)
                    .map(|text| dedup_key(&text, case_sensitive))
                    .collect()
            })
            .unwrap_or_default()
    });

    let mut list = fields
        .remove(name)
        .map(|existing| existing.to_list())
        .unwrap_or_default();
    for candidate in value.iter() {
        let Some(text) = scalar_text(candidate) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        if keys.insert(dedup_key(&text, case_sensitive)) {
            list.push(candidate.clone());
        }
    }
    fields.insert(name.to_string(), FieldValue::Many(list));
}
