//! 🔄 Transforms: a stored record in, an index-ready [`Document`] out.
//!
//! Real record formats (MARC, Dublin Core, whatever the harvester dragged in) each deserve their
//! own builder. The pipeline only needs the seam: [`DocumentBuilder`]. Merge workers call it once
//! per live member (through the document cache), record workers once per standalone record.
//!
//! ```text
//!   MemberRecord ──▶ DocumentBuilder::build ──▶ Document ──▶ MergeEngine
//! ```
//!
//! A builder error is a *data fault*: the record is skipped when it stands alone, and the whole
//! cluster fails when it does not.
//!
//! 🦆

pub mod raw_fields;

use std::fmt::Debug;

use anyhow::Result;

use crate::common::{Document, MemberRecord};

pub use raw_fields::RawFields;

/// 🏗️ Builds the index document for one record. Shared between workers, so it must not keep
/// per-call state.
pub trait DocumentBuilder: Send + Sync + Debug {
    fn build(&self, record: &MemberRecord) -> Result<Document>;
}
