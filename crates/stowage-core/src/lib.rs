//! Client-side record store with optional REST synchronization.
//!
//! This crate owns the store itself and the collaborators it needs:
//!
//! - **[`DataStore`]**: Ordered, keyed collection of [`Record`]s with
//!   CRUD ([`set`](DataStore::set), [`del`](DataStore::del),
//!   [`batch`](DataStore::batch)), memoized sort views, predicate
//!   selection, relational joins and a persistence mirror. Attaching a URI
//!   ([`set_uri`](DataStore::set_uri)) syncs the store against a remote
//!   collection and keeps it fresh when the cached response expires.
//!
//! - **Crawling**: With `retrieve` enabled, record fields holding arrays
//!   or hyperlinks are materialized into nested child stores, bounded by
//!   `max_depth` and the `leafs` / `ignore` lists.
//!
//! - **[`EventBus`]**: Owner-scoped listener registry. Every store
//!   operation fires `before*` / `after*` / `failed*` [`EventKind`]s on the
//!   owning host's id.
//!
//! - **[`Host`]**: Registration facade that attaches a store (as
//!   `host.data`) to an id, wiring a fresh [`StoreContext`] when none is
//!   supplied.
//!
//! - **[`RecordStream`]**: Snapshot subscription over a store's records.

pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::StoreOptions;
pub use error::CoreError;
pub use event::{Event, EventBus, EventKind, ListenOptions, Payload};
pub use host::Host;
pub use model::{Field, Record, Selector};
pub use store::{
    Backend, BatchKind, Clause, CompareOp, DataStore, Direction, JoinMode, SortQuery, Storage,
    StorageOp, StorageSettings, StorageTarget, StoreContext, StoreDump, Where,
};
pub use stream::RecordStream;
