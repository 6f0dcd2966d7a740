//! 🎼 Composers: turning an [`IndexRequest`] into the bytes the index expects.
//!
//! - **Add**: `[doc,doc,doc]`. Documents are already serialized, so this is string assembly.
//! - **Delete**: `{"delete":{"id":"a"},"delete":{"id":"b"}}`. Yes, a JSON object with repeated keys.
//!   The index reads it clause by clause. `serde_json::Map` would dedupe the keys, so we build it
//!   by hand and let serde only escape the ids.
//! - **Commit**: the fixed `{"commit":{}}`.
//!
//! 🦆 (the duck composes... payloads. the duck has no further comment.)

use anyhow::{Context, Result};

use crate::backends::IndexRequest;

pub const COMMIT_BODY: &str = r#"{"commit":{}}"#;

/// 📦 `[item,item,item]`. Pre-sized so the common case never reallocates.
pub fn compose_add(documents: &[String]) -> String {
    let size: usize = documents.iter().map(|doc| doc.len() + 1).sum::<usize>() + 2;
    let mut payload = String::with_capacity(size);
    payload.push('[');
    for (n, document) in documents.iter().enumerate() {
        if n > 0 {
            payload.push(',');
        }
        payload.push_str(document);
    }
    payload.push(']');
    payload
}

/// 🗑️ One delete-by-id clause per id.
pub fn compose_delete(ids: &[String]) -> Result<String> {
    let mut payload = String::with_capacity(ids.iter().map(|id| id.len() + 20).sum::<usize>() + 2);
    payload.push('{');
    for (n, id) in ids.iter().enumerate() {
        if n > 0 {
            payload.push(',');
        }
        let quoted = serde_json::to_string(id)
            .with_context(|| format!("💀 Could not escape the id '{id}' for a delete request."))?;
        payload.push_str(r#""delete":{"id":"#);
        payload.push_str(&quoted);
        payload.push('}');
    }
    payload.push('}');
    Ok(payload)
}

/// 🎼 Render any request.
pub fn compose(request: &IndexRequest) -> Result<String> {
    Ok(match request {
        IndexRequest::Add(documents) => compose_add(documents),
        IndexRequest::Delete(ids) => compose_delete(ids)?,
        IndexRequest::Commit => COMMIT_BODY.to_string(),
    })
}
