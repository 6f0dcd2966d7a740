//! 🚶 RawFields: the builder for records that are already a flat field map.
//!
//! Copies every non-reserved field as is and tags the document with the record's source in
//! `source_str_mv`. A record without a single usable field is a data fault; the index has no
//! use for a document that is only an id.

use anyhow::{Result, bail};

use crate::common::{Document, FieldValue, MemberRecord, is_reserved_field};
use crate::transforms::DocumentBuilder;

pub const SOURCE_FIELD: &str = "source_str_mv";

#[derive(Debug, Clone, Copy, Default)]
pub struct RawFields;

impl DocumentBuilder for RawFields {
    fn build(&self, record: &MemberRecord) -> Result<Document> {
        if record.fields.values().all(FieldValue::is_empty) {
            bail!(
                "💀 Record '{}' from source '{}' has no fields at all. Nothing to index but an id.",
                record.id,
                record.source_id
            );
        }

        let mut document = Document::new(record.id.clone())?;
        for (name, value) in &record.fields {
            // -- 🔒 reserved keys are ours; a record cannot smuggle in its own merge flags
            if is_reserved_field(name) || name == SOURCE_FIELD {
                continue;
            }
            document.fields.insert(name.clone(), value.clone());
        }
        document.set(SOURCE_FIELD, vec![record.source_id.as_str()]);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(fields: BTreeMap<String, FieldValue>) -> MemberRecord {
        MemberRecord {
            id: "src1.42".into(),
            source_id: "src1".into(),
            deleted: false,
            suppressed: false,
            updated: Utc::now(),
            dedup_id: None,
            fields,
        }
    }

    #[test]
    fn the_one_where_fields_walk_straight_through() -> Result<()> {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::from("Moby Dick"));
        fields.insert("merged_boolean".to_string(), FieldValue::One(json!(true)));
        let document = RawFields.build(&record(fields))?;

        assert_eq!(document.id, "src1.42");
        assert_eq!(document.first_text("title").as_deref(), Some("Moby Dick"));
        assert!(!document.fields.contains_key("merged_boolean"));
        assert_eq!(document.first_text(SOURCE_FIELD).as_deref(), Some("src1"));
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_record_is_a_data_fault() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::Many(vec![]));
        let err = RawFields.build(&record(fields)).expect_err("💀 nothing to build from");
        assert!(err.to_string().contains("no fields"));
    }
}
