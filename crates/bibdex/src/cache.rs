//! 🗃️ Document cache: built member documents, remembered per merge worker.
//!
//! Busy clusters get re-merged every time one of their members changes, and the unchanged members
//! would otherwise be rebuilt each time. Entries are keyed by record id *and* its `updated`
//! timestamp, so an edited record simply misses. Least recently used entries go first.
//! Capacity 0 turns caching off.

use std::num::NonZeroUsize;

use anyhow::Result;
use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::common::{Document, MemberRecord};
use crate::transforms::DocumentBuilder;

/// 🔑 (record id, record updated)
pub type CacheKey = (String, DateTime<Utc>);

#[derive(Debug)]
pub struct DocumentCache {
    inner: Option<LruCache<CacheKey, Document>>,
    hits: u64,
    misses: u64,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    /// 🏗️ The cached document for `record`, or a freshly built (and remembered) one.
    /// Build errors are not cached.
    pub fn get_or_build(&mut self, record: &MemberRecord, builder: &dyn DocumentBuilder) -> Result<Document> {
        let Some(cache) = self.inner.as_mut() else {
            self.misses += 1;
            return builder.build(record);
        };
        let key = (record.id.clone(), record.updated);
        if let Some(document) = cache.get(&key) {
            self.hits += 1;
            return Ok(document.clone());
        }
        self.misses += 1;
        let document = builder.build(record)?;
        cache.put(key, document.clone());
        Ok(document)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
