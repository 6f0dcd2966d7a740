//! 📦 Common data structures: the nouns of bibdex.
//!
//! 🎬 *[a card catalog drawer slides open. nine cards describe the same novel.]*
//! *[one of them spells the author's name in ALL CAPS. nobody knows why.]*
//!
//! A [`MemberRecord`] is one source record as the store hands it to us. A [`DedupCluster`] says
//! "these records are the same work". A [`Document`] is what the index eventually swallows, and a
//! [`MergeResult`] is the unit a merge worker sends back to the orchestrator.
//!
//! 🦆 (the duck has been deduplicated. there was only ever one duck.)

use std::borrow::Cow;
use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// 🏷️ Reserved index keys. Extension fields with these names are ignored at serialization time.
pub const ID_FIELD: &str = "id";
pub const MERGED_FLAG_FIELD: &str = "merged_boolean";
pub const MERGED_CHILD_FLAG_FIELD: &str = "merged_child_boolean";
pub const LOCAL_IDS_FIELD: &str = "local_ids_str_mv";
pub const DEDUP_ID_FIELD: &str = "dedup_id_str_mv";

const RESERVED_FIELDS: [&str; 5] = [
    ID_FIELD,
    MERGED_FLAG_FIELD,
    MERGED_CHILD_FLAG_FIELD,
    LOCAL_IDS_FIELD,
    DEDUP_ID_FIELD,
];

/// 🔍 Is this one of the keys we own?
pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// 🔤 The text form of a scalar, or `None` for null / non-scalar values.
///
/// Numbers and booleans are stringified so they can take part in case-insensitive dedup
/// alongside their stringly-typed cousins. Objects and arrays are not scalars and get no text.
pub fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// 📦 A field value: one scalar, or an ordered list of scalars.
///
/// `untagged` + `Many` first means JSON arrays land in `Many` and everything else in `One`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Many(Vec<Value>),
    One(Value),
}

impl FieldValue {
    /// 🔄 Iterate the scalars, flattening `One` into a list of length one.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        match self {
            FieldValue::Many(values) => values.iter(),
            FieldValue::One(value) => std::slice::from_ref(value).iter(),
        }
    }

    /// 🕳️ Empty means "no scalar with any text in it". `""`, `null` and `[]` all qualify.
    pub fn is_empty(&self) -> bool {
        self.iter()
            .all(|value| scalar_text(value).is_none_or(|text| text.is_empty()))
    }

    /// 🥇 First non-empty text in this value, if any.
    pub fn first_text(&self) -> Option<Cow<'_, str>> {
        self.iter()
            .filter_map(scalar_text)
            .find(|text| !text.is_empty())
    }

    /// 📋 Every scalar, owned, in list form. Handy when a single value has to grow up.
    pub fn to_list(&self) -> Vec<Value> {
        self.iter().cloned().collect()
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::One(Value::String(value.to_string()))
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::Many(
            values
                .into_iter()
                .map(|v| Value::String(v.to_string()))
                .collect(),
        )
    }
}

/// 🎭 What part a document plays in its merge group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRole {
    /// 📄 A plain record. No cluster, or a cluster that collapsed to one survivor.
    #[default]
    Standalone,
    /// 👶 A survivor of a cluster with at least two live members.
    MergeChild,
    /// 🧬 The synthetic document keyed by the cluster id.
    MergeResult,
}

/// 📄 One index-ready document.
///
/// The reserved keys are typed fields; everything source-specific rides along in `fields`.
/// Serializes to the flat JSON object the index expects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub id: String,
    pub role: MergeRole,
    /// 🔗 Ids of the member records folded into a merge result, anchor first.
    pub local_ids: Vec<String>,
    /// 🔗 The cluster a merge child belongs to.
    pub dedup_id: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// 🏗️ A fresh standalone document. An empty id is refused, since the index would refuse it later
    /// and with far less grace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            bail!("💀 A document tried to exist without an id. The index does not accept anonymous mail.");
        }
        Ok(Self {
            id,
            ..Default::default()
        })
    }

    /// 🔍 Field lookup that treats empty values as absent.
    pub fn non_empty(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).filter(|value| !value.is_empty())
    }

    /// 🥇 First non-empty text of a field.
    pub fn first_text(&self, name: &str) -> Option<Cow<'_, str>> {
        self.fields.get(name).and_then(FieldValue::first_text)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(ID_FIELD, &self.id)?;
        for (name, value) in &self.fields {
            if is_reserved_field(name) {
                continue;
            }
            map.serialize_entry(name, value)?;
        }
        match self.role {
            MergeRole::Standalone => {}
            MergeRole::MergeChild => map.serialize_entry(MERGED_CHILD_FLAG_FIELD, &true)?,
            MergeRole::MergeResult => map.serialize_entry(MERGED_FLAG_FIELD, &true)?,
        }
        if !self.local_ids.is_empty() {
            map.serialize_entry(LOCAL_IDS_FIELD, &self.local_ids)?;
        }
        if let Some(dedup_id) = &self.dedup_id {
            map.serialize_entry(DEDUP_ID_FIELD, &[dedup_id])?;
        }
        map.end()
    }
}

/// 📚 One source record, as stored. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub source_id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub suppressed: bool,
    pub updated: DateTime<Utc>,
    /// 🔗 The live cluster this record belongs to, if any. At most one. Monogamy is enforced upstream.
    #[serde(default)]
    pub dedup_id: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// 👯 A set of record ids believed to describe the same work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupCluster {
    pub id: String,
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    pub changed: DateTime<Utc>,
}

/// 🧬 What a merge worker hands back: documents to add and ids to delete.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeResult {
    pub survivors: Vec<Document>,
    pub merged: Option<Document>,
    pub deleted_ids: Vec<String>,
}

impl MergeResult {
    /// 📊 Documents this result will add to the index.
    pub fn document_count(&self) -> usize {
        self.survivors.len() + usize::from(self.merged.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.document_count() == 0 && self.deleted_ids.is_empty()
    }
}
