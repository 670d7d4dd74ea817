// ── Store configuration ──
//
// Knobs that shape how a store keys, syncs and crawls its records.
// Built by callers (or `stowage-config`) and handed to the store; the
// store never reads files itself.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::Backend;

/// Record count at or above which sorts and selects move to a blocking
/// worker thread.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 10_000;

/// Configuration for a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Field used as the natural key. Synthetic UUIDs when `None`.
    pub key: Option<String>,
    /// Dot/bracket path unwrapping the sync response (`"data.items"`).
    pub source: Option<String>,
    /// Crawl array and hyperlink fields into nested stores.
    pub retrieve: bool,
    /// Nesting depth at which crawling stops.
    pub max_depth: usize,
    /// Fields never crawled.
    pub ignore: Vec<String>,
    /// Fields kept as-is at every depth.
    pub leafs: Vec<String>,
    /// Extra headers sent with every request of this store.
    pub headers: BTreeMap<String, String>,
    /// JSONP callback parameter; switches sync to the JSONP channel.
    pub callback: Option<String>,
    /// Mirror the store to this backend after every mutation.
    pub autosave: Option<Backend>,
    /// Poll interval after which the bound URI is expired and resynced.
    /// Must be at least one second.
    pub expires: Option<Duration>,
    pub offload_threshold: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: None,
            source: None,
            retrieve: false,
            max_depth: 1,
            ignore: Vec::new(),
            leafs: Vec::new(),
            headers: BTreeMap::new(),
            callback: None,
            autosave: None,
            expires: None,
            offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
        }
    }
}

impl StoreOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Enable crawling down to `max_depth`.
    pub fn with_retrieve(mut self, max_depth: usize) -> Self {
        self.retrieve = true;
        self.max_depth = max_depth;
        self
    }

    pub fn with_callback(mut self, param: impl Into<String>) -> Self {
        self.callback = Some(param.into());
        self
    }

    pub fn with_autosave(mut self, backend: Backend) -> Self {
        self.autosave = Some(backend);
        self
    }

    pub fn with_expires(mut self, every: Duration) -> Self {
        self.expires = Some(every);
        self
    }

    /// Options inherited by a nested store created while crawling.
    pub(crate) fn for_child(&self) -> Self {
        Self {
            key: self.key.clone(),
            source: self.source.clone(),
            retrieve: true,
            max_depth: self.max_depth,
            ignore: self.ignore.clone(),
            leafs: self.leafs.clone(),
            headers: self.headers.clone(),
            callback: None,
            autosave: None,
            expires: None,
            offload_threshold: self.offload_threshold,
        }
    }
}
