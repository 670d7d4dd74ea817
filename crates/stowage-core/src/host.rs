// ── Registration facade ──
//
// Attaches a store to an id. The id scopes every event the store fires.

use crate::config::StoreOptions;
use crate::error::CoreError;
use crate::event::{Event, ListenOptions};
use crate::store::{DataStore, StoreContext};

/// An id with a [`DataStore`] attached as `data`.
#[derive(Debug, Clone)]
pub struct Host {
    id: String,
    pub data: DataStore,
}

impl Host {
    /// Attach a new store to `id`. Without a context a fresh one is wired
    /// (default transport, new event bus, session storage).
    pub fn decorate(
        id: impl Into<String>,
        context: Option<StoreContext>,
        options: StoreOptions,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::invalid("host id must not be empty"));
        }
        let ctx = match context {
            Some(ctx) => ctx,
            None => StoreContext::with_defaults()?,
        };
        Ok(Self {
            data: DataStore::new(id.clone(), ctx, options),
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn on<F>(&self, event: impl AsRef<str>, handler: F) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.data.context().bus.on(&self.id, event, handler)
    }

    pub fn once<F>(&self, event: impl AsRef<str>, handler: F) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.data.context().bus.once(&self.id, event, handler)
    }

    pub fn listen<F>(&self, event: impl AsRef<str>, opts: ListenOptions, handler: F) -> String
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.data.context().bus.register(&self.id, event, opts, handler)
    }

    /// Deregister listeners; `None` matches any event or id.
    pub fn remove(&self, event: Option<&str>, id: Option<&str>) -> usize {
        self.data.context().bus.remove(&self.id, event, id, None)
    }
}
