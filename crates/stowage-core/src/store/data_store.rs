// ── Store handle ──
//
// `DataStore` is a cheap `Arc` handle. State lives behind a
// `std::sync::RwLock` that is only ever held for synchronous sections;
// events fire after the guard is released so handlers may call back into
// the store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures_util::future::try_join_all;
use indexmap::IndexSet;
use serde_json::{Map, Value};
use stowage_api::cache::cache_key;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use url::Url;

use super::StoreContext;
use super::collection::Collection;
use super::select::{JoinMode, Where};
use super::sort::SortQuery;
use crate::config::StoreOptions;
use crate::error::CoreError;
use crate::event::{EventKind, Payload};
use crate::model::{Record, Selector};
use crate::stream::RecordStream;

/// Shortest accepted `expires` interval.
const MIN_EXPIRES: Duration = Duration::from_secs(1);

/// Ordered, keyed record store with optional REST synchronization.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct DataStore {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) owner: String,
    pub(super) parent: Option<String>,
    pub(super) depth: usize,
    pub(super) ctx: StoreContext,
    pub(super) state: RwLock<State>,
    tasks: Mutex<Tasks>,
}

pub(super) struct State {
    pub(super) options: StoreOptions,
    pub(super) records: Collection,
    pub(super) uri: Option<Url>,
    pub(super) expires: Option<Duration>,
    pub(super) loaded: bool,
    /// Field names holding nested stores.
    pub(super) collections: IndexSet<String>,
}

/// Background tasks; dropping a guard cancels its task.
#[derive(Default)]
struct Tasks {
    listener: Option<DropGuard>,
    poller: Option<DropGuard>,
}

impl DataStore {
    pub fn new(owner: impl Into<String>, ctx: StoreContext, options: StoreOptions) -> Self {
        Self::build(owner.into(), None, 0, ctx, options)
    }

    /// A nested store one level below `self`.
    pub(super) fn child(&self, owner: String, options: StoreOptions) -> Self {
        Self::build(
            owner,
            Some(self.inner.owner.clone()),
            self.inner.depth + 1,
            self.inner.ctx.clone(),
            options,
        )
    }

    fn build(
        owner: String,
        parent: Option<String>,
        depth: usize,
        ctx: StoreContext,
        options: StoreOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                owner,
                parent,
                depth,
                ctx,
                state: RwLock::new(State {
                    options,
                    records: Collection::new(),
                    uri: None,
                    expires: None,
                    loaded: false,
                    collections: IndexSet::new(),
                }),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub(super) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().expect("store lock poisoned")
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().expect("store lock poisoned")
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.inner.tasks.lock().expect("store task lock poisoned")
    }

    pub(super) fn fire(&self, kind: EventKind, payload: Payload) {
        self.inner.ctx.bus.fire(&self.inner.owner, kind, payload);
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Id of the owning host; events fire on it.
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Owner id of the store this one was crawled from.
    pub fn parent(&self) -> Option<&str> {
        self.inner.parent.as_deref()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn context(&self) -> &StoreContext {
        &self.inner.ctx
    }

    pub fn options(&self) -> StoreOptions {
        self.read().options.clone()
    }

    /// Replace the store's options. Takes effect for subsequent operations.
    pub fn configure(&self, options: StoreOptions) {
        self.write().options = options;
    }

    pub fn total(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn keys(&self) -> HashMap<String, usize> {
        self.read().records.keys().clone()
    }

    /// Current record sequence (shared snapshot, not a copy).
    pub fn records(&self) -> Arc<Vec<Arc<Record>>> {
        self.read().records.records()
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    pub fn uri(&self) -> Option<Url> {
        self.read().uri.clone()
    }

    pub fn expires(&self) -> Option<Duration> {
        self.read().expires
    }

    pub fn collections(&self) -> Vec<String> {
        self.read().collections.iter().cloned().collect()
    }

    /// A memoized sort view by its key (see [`SortQuery::view_key`]).
    pub fn view(&self, name: &str) -> Option<Arc<Vec<Arc<Record>>>> {
        self.read().records.view(name)
    }

    pub fn views(&self) -> Vec<String> {
        self.read().records.view_names()
    }

    /// Subscribe to record snapshots.
    pub fn subscribe(&self) -> RecordStream {
        RecordStream::new(self.read().records.subscribe())
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Records addressed by `selector`, in selector order. Entries that
    /// address nothing are skipped.
    pub fn get(&self, selector: impl Into<Selector>) -> Vec<Arc<Record>> {
        self.read().records.resolve(&selector.into())
    }

    /// First record addressed by `selector`.
    pub fn get_one(&self, selector: impl Into<Selector>) -> Option<Arc<Record>> {
        self.get(selector).into_iter().next()
    }

    /// Rewrite record indices to their positions and rebuild the key map.
    pub fn reindex(&self) {
        self.write().records.reindex();
    }

    /// Case-insensitive substring search over string and number fields.
    /// Comma-separated needles are OR-ed; `fields` restricts the search.
    pub fn find(&self, needle: &str, fields: Option<&[String]>) -> Vec<Arc<Record>> {
        let needles: Vec<String> = needle
            .split(',')
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if needles.is_empty() {
            return Vec::new();
        }
        let hit = |v: &Value| {
            let text = match v {
                Value::String(s) => s.to_lowercase(),
                Value::Number(n) => n.to_string(),
                _ => return false,
            };
            needles.iter().any(|n| text.contains(n.as_str()))
        };
        self.records()
            .iter()
            .filter(|r| {
                r.data.iter().any(|(name, field)| {
                    fields.is_none_or(|f| f.iter().any(|x| x == name))
                        && field.as_value().is_some_and(&hit)
                })
            })
            .cloned()
            .collect()
    }

    // ── Sort / select / join ─────────────────────────────────────────

    /// Sort by `query` (`"field [asc|desc], ..."`).
    ///
    /// Unfiltered results are memoized under the query's view key and
    /// reused unless `create` is set. A `filter` always recomputes and is
    /// never memoized.
    pub async fn sort(
        &self,
        query: &str,
        create: bool,
        filter: Option<&Where>,
    ) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        let query: SortQuery = query.parse()?;
        let view_key = query.view_key();
        let create = create || filter.is_some();

        let (records, generation, threshold) = {
            let st = self.read();
            if !create {
                if let Some(view) = st.records.view(&view_key) {
                    return Ok(view);
                }
            }
            (
                st.records.records(),
                st.records.generation(),
                st.options.offload_threshold,
            )
        };
        if records.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }

        let rows = match filter {
            Some(w) => Arc::new(filter_records(records, w, threshold).await?),
            None => records,
        };
        let sorted = if rows.len() >= threshold {
            debug!(owner = %self.inner.owner, rows = rows.len(), "sorting on worker");
            tokio::task::spawn_blocking(move || query.apply(&rows))
                .await
                .map_err(|e| CoreError::Internal(format!("sort worker failed: {e}")))?
        } else {
            query.apply(&rows)
        };
        let sorted = Arc::new(sorted);

        if filter.is_none() {
            self.write()
                .records
                .store_view(view_key, generation, Arc::clone(&sorted));
        }
        Ok(sorted)
    }

    /// Records matching every clause of `filter`.
    pub async fn select(&self, filter: &Where) -> Result<Vec<Arc<Record>>, CoreError> {
        let (records, threshold) = {
            let st = self.read();
            (st.records.records(), st.options.offload_threshold)
        };
        filter_records(records, filter, threshold).await
    }

    /// Relational join against `other` on `field`.
    ///
    /// `Inner` and `Left` walk this store's records, `Right` walks
    /// `other`'s. Rows are this store's data extended by `other`'s. A
    /// driving row without a match is dropped for `Inner`; otherwise the
    /// opposite store's own fields are filled with `null`. More than one
    /// match is an error.
    pub async fn join(
        &self,
        other: &DataStore,
        field: &str,
        mode: JoinMode,
    ) -> Result<Vec<Map<String, Value>>, CoreError> {
        if field.is_empty() {
            return Err(CoreError::invalid("join field is empty"));
        }
        let (driving, opposite) = match mode {
            JoinMode::Right => (other, self),
            JoinMode::Inner | JoinMode::Left => (self, other),
        };
        let rows = driving.records();
        let opposite_fields = opposite.field_names();

        let matches = rows.iter().map(|row| {
            let value = row.value(field).cloned();
            async move {
                let Some(value) = value else {
                    return Ok::<_, CoreError>((row, None));
                };
                let found = opposite.select(&Where::new().eq(field, value.clone())).await?;
                match found.len() {
                    0 => Ok((row, None)),
                    1 => Ok((row, found.into_iter().next())),
                    count => Err(CoreError::MoreThanOne {
                        field: field.to_owned(),
                        value: value.to_string(),
                        count,
                    }),
                }
            }
        });
        let matched = try_join_all(matches).await?;

        let mut out = Vec::with_capacity(matched.len());
        for (row, hit) in matched {
            let driving_data = row.to_json_data();
            let opposite_data = match hit {
                Some(rec) => rec.to_json_data(),
                None if mode == JoinMode::Inner => continue,
                None => opposite_fields
                    .iter()
                    .filter(|f| !driving_data.contains_key(f.as_str()))
                    .map(|f| (f.clone(), Value::Null))
                    .collect(),
            };
            // Fields of the matched row win on collision.
            let mut merged = driving_data;
            merged.extend(opposite_data);
            out.push(merged);
        }
        debug!(owner = %self.inner.owner, %mode, field, rows = out.len(), "joined");
        Ok(out)
    }

    /// Union of field names across all records, in first-seen order.
    fn field_names(&self) -> IndexSet<String> {
        self.records()
            .iter()
            .flat_map(|r| r.data.keys().cloned())
            .collect()
    }

    // ── URI binding ──────────────────────────────────────────────────

    /// Bind the store to a remote collection and sync it.
    ///
    /// Rejects an empty or unparsable URI before touching any state.
    pub async fn set_uri(&self, uri: &str) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        if uri.trim().is_empty() {
            return Err(CoreError::Config {
                message: "uri must not be empty".into(),
            });
        }
        let url = Url::parse(uri).map_err(|e| CoreError::Config {
            message: format!("invalid uri {uri:?}: {e}"),
        })?;
        self.bind(url).await
    }

    /// Bind to an already-parsed endpoint: replace the expiry listener,
    /// drop any stale cached response and run exactly one sync.
    pub async fn bind(&self, url: Url) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        let key = cache_key(&url);
        let expires = self.read().options.expires;
        if let Some(every) = expires {
            check_expires(every)?;
        }
        runtime()?;
        info!(owner = %self.inner.owner, uri = %url, "binding store");

        self.write().uri = Some(url);
        self.spawn_listener(key.clone())?;
        self.inner.ctx.client.cache().expire(&key, true);
        if let Some(every) = expires {
            self.set_expires(Some(every))?;
        }
        self.sync().await
    }

    /// Drop the URI binding and stop background tasks.
    pub fn unbind(&self) {
        {
            let mut tasks = self.tasks();
            tasks.listener = None;
            tasks.poller = None;
        }
        let mut st = self.write();
        st.uri = None;
        st.expires = None;
    }

    /// Poll interval after which the bound URI is expired (and so resynced).
    /// `None` stops polling.
    pub fn set_expires(&self, every: Option<Duration>) -> Result<(), CoreError> {
        let Some(every) = every else {
            self.tasks().poller = None;
            self.write().expires = None;
            return Ok(());
        };
        let Some(uri) = self.uri() else {
            return Err(CoreError::Config {
                message: "expires requires a uri".into(),
            });
        };
        check_expires(every)?;
        let handle = runtime()?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let client = Arc::clone(&self.inner.ctx.client);
        let key = cache_key(&uri);
        let owner = self.inner.owner.clone();
        handle.spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            debug!(%owner, ?every, "expiry poller started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        client.cache().expire(&key, false);
                    }
                }
            }
            debug!(%owner, "expiry poller stopped");
        });

        self.tasks().poller = Some(token.drop_guard());
        self.write().expires = Some(every);
        Ok(())
    }

    /// Resync whenever the bound URI's cached response is expired.
    fn spawn_listener(&self, key: String) -> Result<(), CoreError> {
        let handle = runtime()?;
        let mut rx = self.inner.ctx.client.cache().subscribe();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let store: Weak<Inner> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            loop {
                let msg = tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = rx.recv() => msg,
                };
                match msg {
                    Ok(expiry) if expiry.uri == key => {
                        let Some(inner) = store.upgrade() else { break };
                        let store = DataStore { inner };
                        debug!(owner = %store.inner.owner, uri = %key, "cache expired, resyncing");
                        if let Err(e) = store.sync().await {
                            warn!(owner = %store.inner.owner, error = %e, "resync failed");
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.tasks().listener = Some(token.drop_guard());
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Reset the store.
    ///
    /// With `sync` set only records, keys, views and collections are
    /// dropped (URI and options survive) and no events fire. A full clear
    /// also tears down nested stores, stops background tasks and restores
    /// default options.
    pub fn clear(&self, sync: bool) {
        if sync {
            let mut st = self.write();
            st.records.clear();
            st.collections.clear();
            st.loaded = false;
            return;
        }

        self.fire(EventKind::BeforeDataClear, Payload::None);
        self.teardown_children();
        self.unbind();
        {
            let mut st = self.write();
            st.records.clear();
            st.collections.clear();
            st.loaded = false;
            st.options = StoreOptions::default();
        }
        self.fire(EventKind::AfterDataClear, Payload::None);
    }

    /// Destroy the store: tear down nested stores, stop background tasks,
    /// release the URI's cached response and drop all records. Listeners
    /// registered on the owner are left in place.
    pub fn teardown(&self) {
        self.teardown_children();
        let uri = self.uri();
        self.unbind();
        if let Some(uri) = uri {
            self.inner.ctx.client.cache().expire(&cache_key(&uri), true);
        }
        {
            let mut st = self.write();
            st.records.clear();
            st.collections.clear();
            st.loaded = false;
        }
        debug!(owner = %self.inner.owner, "store torn down");
        self.fire(EventKind::AfterDataTeardown, Payload::None);
    }

    fn teardown_children(&self) {
        for record in self.records().iter() {
            teardown_fields(record);
        }
    }
}

/// Tear down every nested store held by `record`.
pub(super) fn teardown_fields(record: &Record) {
    for field in record.data.values() {
        if let Some(child) = field.as_store() {
            child.teardown();
        }
    }
}

fn check_expires(every: Duration) -> Result<(), CoreError> {
    if every < MIN_EXPIRES {
        return Err(CoreError::Config {
            message: format!("expires must be at least 1s, got {every:?}"),
        });
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Handle, CoreError> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| CoreError::Internal(format!("no async runtime for background task: {e}")))
}

/// Filter `records`, on a blocking worker when the set is large and the
/// filter is plain data.
async fn filter_records(
    records: Arc<Vec<Arc<Record>>>,
    filter: &Where,
    threshold: usize,
) -> Result<Vec<Arc<Record>>, CoreError> {
    if records.len() >= threshold && filter.is_portable() {
        let filter = filter.clone();
        return tokio::task::spawn_blocking(move || filter.apply(&records))
            .await
            .map_err(|e| CoreError::Internal(format!("select worker failed: {e}")));
    }
    Ok(filter.apply(&records))
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("owner", &self.inner.owner)
            .field("depth", &self.inner.depth)
            .field("total", &self.total())
            .finish_non_exhaustive()
    }
}
