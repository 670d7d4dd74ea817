// Per-URI response cache.
//
// Holds the last decoded body of every successful GET together with its
// validators, the methods each URI advertised through `Allow`, and a
// broadcast channel announcing expiry so stores can resync.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;
use url::Url;

const EXPIRY_CHANNEL_SIZE: usize = 64;

/// A cached GET response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Value,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub stored_at: DateTime<Utc>,
}

/// Notification sent when a URI's cached response is expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheExpiry {
    pub uri: String,
}

/// Concurrent response cache keyed by URI (fragment stripped).
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    allowed: DashMap<String, Vec<Method>>,
    expired: broadcast::Sender<CacheExpiry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        let (expired, _) = broadcast::channel(EXPIRY_CHANNEL_SIZE);
        Self {
            entries: DashMap::new(),
            allowed: DashMap::new(),
            expired,
        }
    }

    /// Look up the cached response for a URI.
    pub fn get(&self, uri: &str) -> Option<CachedResponse> {
        self.entries.get(uri).map(|r| r.value().clone())
    }

    pub(crate) fn store(&self, uri: String, response: CachedResponse) {
        trace!(%uri, "caching response");
        self.entries.insert(uri, response);
    }

    pub(crate) fn record_allow(&self, uri: String, methods: Vec<Method>) {
        self.allowed.insert(uri, methods);
    }

    /// Whether `method` was advertised for `uri`.
    ///
    /// `None` means the URI never advertised its allowed methods.
    pub fn allows(&self, uri: &str, method: &Method) -> Option<bool> {
        self.allowed.get(uri).map(|m| m.contains(method))
    }

    /// Drop the cached body for `uri`.
    ///
    /// Unless `silent`, subscribers are told about the expiry even when
    /// nothing was cached. Returns `true` if an entry was removed.
    pub fn expire(&self, uri: &str, silent: bool) -> bool {
        let removed = self.entries.remove(uri).is_some();
        if !silent {
            // No receivers is not an error worth surfacing.
            let _ = self.expired.send(CacheExpiry { uri: uri.to_owned() });
        }
        trace!(%uri, removed, silent, "cache expired");
        removed
    }

    /// Receive expiry notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheExpiry> {
        self.expired.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every cached body (permission bits survive).
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical cache key for a URL: the URL with its fragment stripped.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Parse an `Allow` header value (`"GET, PUT, PATCH"`).
pub(crate) fn parse_allow(value: &str) -> Vec<Method> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .collect()
}
