// ── Owner-scoped event bus ──
//
// Listeners are keyed by (owner id, event name) and partitioned by a
// state name; only listeners registered under the bus's active state
// receive fired events. Every fired event is also broadcast to stream
// subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::Record;

const EVENT_CHANNEL_SIZE: usize = 256;

/// State partition listeners land in unless told otherwise.
pub const DEFAULT_STATE: &str = "active";

/// Events fired by a [`DataStore`](crate::DataStore) on its owner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum EventKind {
    BeforeDataBatch,
    AfterDataBatch,
    FailedDataBatch,
    BeforeDataClear,
    AfterDataClear,
    BeforeDataRetrieve,
    AfterDataRetrieve,
    FailedDataRetrieve,
    BeforeDataDelete,
    AfterDataDelete,
    FailedDataDelete,
    BeforeDataSet,
    AfterDataSet,
    FailedDataSet,
    BeforeDataSync,
    AfterDataSync,
    FailedDataSync,
    AfterDataTeardown,
}

/// Data carried by a fired event.
#[derive(Debug, Clone)]
pub enum Payload {
    None,
    Record(Arc<Record>),
    Records(Arc<Vec<Arc<Record>>>),
    Key(String),
    Data(Value),
    Error(String),
}

/// A fired event as seen by handlers and stream subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    pub owner: String,
    pub name: String,
    pub payload: Payload,
}

impl Event {
    /// The event as a store [`EventKind`], if it is one.
    pub fn kind(&self) -> Option<EventKind> {
        self.name.parse().ok()
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registration knobs for [`EventBus::register`].
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Listener id; generated when `None`. Re-using an id replaces the
    /// earlier listener for the same event and state.
    pub id: Option<String>,
    /// State partition; the bus default when `None`.
    pub state: Option<String>,
    /// Deregister after the first invocation.
    pub once: bool,
}

struct Listener {
    id: String,
    event: String,
    state: String,
    once: bool,
    handler: Handler,
}

/// Cheaply cloneable handle to a shared listener registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: DashMap<String, Vec<Listener>>,
    state: RwLock<String>,
    seq: AtomicU64,
    tx: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(BusInner {
                listeners: DashMap::new(),
                state: RwLock::new(DEFAULT_STATE.to_owned()),
                seq: AtomicU64::new(0),
                tx,
            }),
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register `handler` for `event` on `owner`. Returns the listener id.
    pub fn on<F>(&self, owner: &str, event: impl AsRef<str>, handler: F) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(owner, event, ListenOptions::default(), handler)
    }

    /// Like [`on`](Self::on), deregistering after the first invocation.
    pub fn once<F>(&self, owner: &str, event: impl AsRef<str>, handler: F) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let opts = ListenOptions {
            once: true,
            ..ListenOptions::default()
        };
        self.register(owner, event, opts, handler)
    }

    pub fn register<F>(
        &self,
        owner: &str,
        event: impl AsRef<str>,
        opts: ListenOptions,
        handler: F,
    ) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = opts.id.unwrap_or_else(|| {
            format!("listener-{}", self.inner.seq.fetch_add(1, Ordering::Relaxed))
        });
        let state = opts.state.unwrap_or_else(|| DEFAULT_STATE.to_owned());
        let event = event.as_ref().to_owned();
        trace!(owner, %event, %id, %state, "listener registered");

        let mut entry = self.inner.listeners.entry(owner.to_owned()).or_default();
        entry.retain(|l| !(l.id == id && l.event == event && l.state == state));
        entry.push(Listener {
            id: id.clone(),
            event,
            state,
            once: opts.once,
            handler: Arc::new(handler),
        });
        id
    }

    /// Deregister listeners on `owner`. `None` filters match anything, so
    /// `remove(owner, None, None, None)` drops all of the owner's listeners.
    /// Returns how many were removed.
    pub fn remove(
        &self,
        owner: &str,
        event: Option<&str>,
        id: Option<&str>,
        state: Option<&str>,
    ) -> usize {
        let Some(mut entry) = self.inner.listeners.get_mut(owner) else {
            return 0;
        };
        let before = entry.len();
        entry.retain(|l| {
            let hit = event.is_none_or(|e| l.event == e)
                && id.is_none_or(|i| l.id == i)
                && state.is_none_or(|s| l.state == s);
            !hit
        });
        let removed = before - entry.len();
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.inner.listeners.remove_if(owner, |_, v| v.is_empty());
        }
        removed
    }

    /// Number of listeners registered for `event` on `owner` (any state).
    pub fn listeners(&self, owner: &str, event: impl AsRef<str>) -> usize {
        let event = event.as_ref();
        self.inner
            .listeners
            .get(owner)
            .map_or(0, |v| v.iter().filter(|l| l.event == event).count())
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Invoke every listener for `event` on `owner` in the active state.
    ///
    /// Handlers run after the registry is unlocked, so they may register,
    /// remove or fire. Returns the number of handlers invoked.
    pub fn fire(&self, owner: &str, event: impl AsRef<str>, payload: Payload) -> usize {
        let event = event.as_ref();
        let state = self.state();

        let mut handlers = Vec::new();
        if let Some(mut entry) = self.inner.listeners.get_mut(owner) {
            entry.retain(|l| {
                if l.event == event && l.state == state {
                    handlers.push(Arc::clone(&l.handler));
                    !l.once
                } else {
                    true
                }
            });
        }

        trace!(owner, event, handlers = handlers.len(), "firing event");
        let fired = Arc::new(Event {
            owner: owner.to_owned(),
            name: event.to_owned(),
            payload,
        });
        for handler in &handlers {
            handler(&fired);
        }
        // Nobody streaming is fine.
        let _ = self.inner.tx.send(fired);
        handlers.len()
    }

    /// Subscribe to every event fired on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.tx.subscribe()
    }

    // ── State partition ──────────────────────────────────────────────

    /// The active state partition.
    pub fn state(&self) -> String {
        self.inner
            .state
            .read()
            .expect("event bus state lock poisoned")
            .clone()
    }

    /// Switch the active state partition.
    pub fn set_state(&self, state: impl Into<String>) {
        *self
            .inner
            .state
            .write()
            .expect("event bus state lock poisoned") = state.into();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("owners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use strum::IntoEnumIterator;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn event_kinds_use_camel_case_names() {
        assert_eq!(EventKind::BeforeDataBatch.as_ref(), "beforeDataBatch");
        assert_eq!(EventKind::AfterDataTeardown.to_string(), "afterDataTeardown");
        assert_eq!(
            "failedDataSync".parse::<EventKind>().unwrap(),
            EventKind::FailedDataSync
        );
        assert_eq!(EventKind::iter().count(), 18);
    }

    #[test]
    fn fire_reaches_only_matching_owner_and_event() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        bus.on("store-a", EventKind::AfterDataSet, handler);

        assert_eq!(bus.fire("store-a", EventKind::AfterDataSet, Payload::None), 1);
        assert_eq!(bus.fire("store-b", EventKind::AfterDataSet, Payload::None), 0);
        assert_eq!(bus.fire("store-a", EventKind::AfterDataDelete, Payload::None), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_deregisters_after_first_fire() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        bus.once("host", "ping", handler);

        bus.fire("host", "ping", Payload::None);
        bus.fire("host", "ping", Payload::None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listeners("host", "ping"), 0);
    }

    #[test]
    fn remove_filters_by_event_and_id() {
        let bus = EventBus::new();
        let (_, a) = counter();
        let (_, b) = counter();
        let (_, c) = counter();
        let id = bus.on("host", "one", a);
        bus.on("host", "one", b);
        bus.on("host", "two", c);

        assert_eq!(bus.remove("host", Some("one"), Some(&id), None), 1);
        assert_eq!(bus.listeners("host", "one"), 1);
        assert_eq!(bus.remove("host", None, None, None), 2);
        assert_eq!(bus.listeners("host", "two"), 0);
    }

    #[test]
    fn state_partitions_gate_dispatch() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let opts = ListenOptions {
            state: Some("offline".into()),
            ..ListenOptions::default()
        };
        bus.register("host", "ping", opts, handler);

        bus.fire("host", "ping", Payload::None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.set_state("offline");
        bus.fire("host", "ping", Payload::None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_may_reenter_the_bus() {
        let bus = EventBus::new();
        let inner = bus.clone();
        let (hits, handler) = counter();
        bus.on("host", "second", handler);
        bus.on("host", "first", move |_| {
            inner.fire("host", "second", Payload::None);
        });

        bus.fire("host", "first", Payload::None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_see_fired_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.fire("host", EventKind::AfterDataSync, Payload::Key("k".into()));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.owner, "host");
        assert_eq!(event.kind(), Some(EventKind::AfterDataSync));
    }
}
