// ── Storage mirror ──
//
// Memory is the source of truth. Reads from a backend only replace
// in-memory state after the backend call succeeded.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::DataStore;
use super::storage::{Backend, PersistedRecord, StorageOp, StorageTarget, StoreDump};
use crate::error::CoreError;
use crate::model::{Record, Selector};

impl DataStore {
    /// Get, remove or write the store (or one record) in `backend`.
    ///
    /// A whole-store `Get` restores the store from the mirror; a record
    /// `Get` merges the stored data into the in-memory record. Returns the
    /// JSON read by a `Get`, `None` otherwise or when nothing was stored.
    pub async fn storage(
        &self,
        target: StorageTarget,
        op: StorageOp,
        backend: Backend,
    ) -> Result<Option<Value>, CoreError> {
        let storage = Arc::clone(&self.inner.ctx.storage);
        let owner = self.inner.owner.as_str();
        debug!(owner, %backend, %op, "storage");

        match target {
            StorageTarget::Store => match op {
                StorageOp::Get => {
                    let Some(dump) = storage.load_store(backend, owner).await? else {
                        return Ok(None);
                    };
                    let json = serde_json::to_value(&dump)
                        .map_err(|e| CoreError::Internal(e.to_string()))?;
                    self.restore(dump).await?;
                    Ok(Some(json))
                }
                StorageOp::Set => {
                    storage.save_store(backend, owner, self.dump()).await?;
                    Ok(None)
                }
                StorageOp::Remove => {
                    storage.remove_store(backend, owner).await?;
                    Ok(None)
                }
            },
            StorageTarget::Record(selector) => {
                let key = match (&selector, op) {
                    (Selector::Key(key), StorageOp::Remove) => key.clone(),
                    _ => {
                        if !selector.is_single() {
                            return Err(CoreError::invalid(format!(
                                "storage needs a single record, got {selector}"
                            )));
                        }
                        self.get_one(selector.clone())
                            .ok_or_else(|| CoreError::not_found(selector.to_string()))?
                            .key
                            .clone()
                    }
                };
                match op {
                    StorageOp::Get => {
                        let Some(data) = storage.load_record(backend, owner, &key).await? else {
                            return Ok(None);
                        };
                        self.set(Some(key), Value::Object(data.clone()), true).await?;
                        Ok(Some(Value::Object(data)))
                    }
                    StorageOp::Set => {
                        let record = self
                            .get_one(Selector::Key(key.clone()))
                            .ok_or_else(|| CoreError::not_found(key))?;
                        storage
                            .save_record(backend, owner, persisted(&record))
                            .await?;
                        Ok(None)
                    }
                    StorageOp::Remove => {
                        storage.remove_record(backend, owner, &key).await?;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// The store in its persisted layout. Nested stores are left out.
    pub fn dump(&self) -> StoreDump {
        let records = self.records();
        StoreDump {
            total: records.len(),
            keys: self.keys().into_iter().collect(),
            records: records
                .iter()
                .enumerate()
                .map(|(index, r)| PersistedRecord {
                    index,
                    ..persisted(r)
                })
                .collect(),
        }
    }

    /// Replace the records with a dump's contents, in dump order.
    pub async fn restore(&self, dump: StoreDump) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        let mut rows = dump.records;
        rows.sort_by_key(|r| r.index);
        self.clear(true);
        for row in rows {
            self.set(Some(row.key), Value::Object(row.data), true).await?;
        }
        self.write().loaded = true;
        debug!(owner = %self.inner.owner, total = self.total(), "restored");
        Ok(self.records())
    }

    pub(super) async fn autosave_store(&self) {
        let Some(backend) = self.read().options.autosave else {
            return;
        };
        let storage = Arc::clone(&self.inner.ctx.storage);
        if let Err(e) = storage.save_store(backend, &self.inner.owner, self.dump()).await {
            warn!(owner = %self.inner.owner, %backend, error = %e, "autosave failed");
        }
    }

    pub(super) async fn autosave_record(&self, record: &Record) {
        let Some(backend) = self.read().options.autosave else {
            return;
        };
        let storage = Arc::clone(&self.inner.ctx.storage);
        if let Err(e) = storage
            .save_record(backend, &self.inner.owner, persisted(record))
            .await
        {
            warn!(owner = %self.inner.owner, %backend, error = %e, "autosave failed");
        }
    }
}

fn persisted(record: &Record) -> PersistedRecord {
    PersistedRecord {
        index: record.index,
        key: record.key.clone(),
        data: record.plain_values(),
    }
}
