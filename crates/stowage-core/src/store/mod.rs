// ── DataStore ──
//
// The store is split by concern:
//
// - `collection`: ordered records, key map, memoized views
// - `data_store`: the handle, accessors, lookup, sort/select/join,
//   URI binding and background tasks
// - `crud`: set / update / del / batch
// - `crawl`: nested store materialization
// - `sync`: remote reconciliation
// - `persist`: storage mirror, dump and restore

mod collection;
mod crawl;
mod crud;
mod data_store;
mod links;
mod persist;
mod select;
mod sort;
mod storage;
mod sync;

use std::fmt;
use std::sync::Arc;

use stowage_api::{HttpClient, TransportConfig};

use crate::error::CoreError;
use crate::event::EventBus;

pub use crud::BatchKind;
pub use data_store::DataStore;
pub use select::{Clause, CompareOp, JoinMode, Predicate, Where};
pub use sort::{Direction, SortQuery};
pub use storage::{
    Backend, PersistedRecord, Storage, StorageOp, StorageSettings, StorageTarget, StoreDump,
};

/// Collaborators shared by a tree of stores: transport, event bus and
/// persistence. Cloning shares all three.
#[derive(Clone)]
pub struct StoreContext {
    pub client: Arc<HttpClient>,
    pub bus: EventBus,
    pub storage: Arc<Storage>,
}

impl StoreContext {
    pub fn new(client: Arc<HttpClient>, bus: EventBus, storage: Arc<Storage>) -> Self {
        Self {
            client,
            bus,
            storage,
        }
    }

    /// Default transport, a fresh event bus and session-only storage.
    pub fn with_defaults() -> Result<Self, CoreError> {
        let client = HttpClient::new(&TransportConfig::default())?;
        Ok(Self::new(
            Arc::new(client),
            EventBus::new(),
            Arc::new(Storage::memory()),
        ))
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("bus", &self.bus)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
