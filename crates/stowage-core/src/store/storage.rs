// ── Persistence backends ──
//
// The store mirrors itself into one of three backends:
//
// - `Local`: a directory of JSON files, one per key. Survives the process.
// - `Session`: an in-memory key/value map living as long as the `Storage`.
// - `Database`: an embedded redb file with one table per owner id and one
//   row per record key. Calls run on the blocking pool.
//
// The mirror is strictly downstream of memory: callers only replace
// in-memory state after a backend call has succeeded.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::model::Selector;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    Local,
    Session,
    Database,
}

/// What a storage call acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// The whole store, keyed by its owner id.
    Store,
    /// A single record, keyed by its record key.
    Record(Selector),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageOp {
    Get,
    Remove,
    Set,
}

/// Where the file-backed backends live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for the `local` backend.
    pub local_dir: Option<PathBuf>,
    /// redb file for the `database` backend.
    pub database_path: Option<PathBuf>,
}

/// A record as persisted: plain fields only, nested stores left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub index: usize,
    pub key: String,
    pub data: Map<String, Value>,
}

/// Whole-store persisted layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDump {
    pub total: usize,
    pub keys: BTreeMap<String, usize>,
    pub records: Vec<PersistedRecord>,
}

impl StoreDump {
    pub(crate) fn from_records(mut records: Vec<PersistedRecord>) -> Self {
        records.sort_by_key(|r| r.index);
        for (i, r) in records.iter_mut().enumerate() {
            r.index = i;
        }
        let keys = records.iter().map(|r| (r.key.clone(), r.index)).collect();
        Self {
            total: records.len(),
            keys,
            records,
        }
    }
}

fn storage_err(backend: Backend, err: impl fmt::Display) -> CoreError {
    CoreError::Storage {
        backend: backend.to_string(),
        message: err.to_string(),
    }
}

// ── Key/value backends ───────────────────────────────────────────────

/// Web-storage style string map.
pub(crate) trait KeyValue: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError>;
    fn remove_item(&self, key: &str) -> Result<bool, CoreError>;
}

#[derive(Default)]
pub(crate) struct MemoryStorage {
    items: DashMap<String, String>,
}

impl KeyValue for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.items.remove(key).is_some())
    }
}

pub(crate) struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        let name: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValue for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(Backend::Local, e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| storage_err(Backend::Local, e))?;
        std::fs::write(self.path(key), value).map_err(|e| storage_err(Backend::Local, e))
    }

    fn remove_item(&self, key: &str) -> Result<bool, CoreError> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err(Backend::Local, e)),
        }
    }
}

// ── Database backend ─────────────────────────────────────────────────

fn table(owner: &str) -> TableDefinition<'_, &'static str, &'static str> {
    TableDefinition::new(owner)
}

pub(crate) struct DatabaseStorage {
    path: PathBuf,
    db: Mutex<Option<Arc<Database>>>,
}

impl DatabaseStorage {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: Mutex::new(None),
        }
    }

    /// Open (or create) the database file on first use.
    fn db(&self) -> Result<Arc<Database>, CoreError> {
        let mut slot = self.db.lock().expect("database handle lock poisoned");
        if let Some(db) = slot.as_ref() {
            return Ok(Arc::clone(db));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| storage_err(Backend::Database, e))?;
        }
        let db = Arc::new(Database::create(&self.path).map_err(redb::Error::from)?);
        debug!(path = %self.path.display(), "opened database");
        *slot = Some(Arc::clone(&db));
        Ok(db)
    }

    fn load_all(&self, owner: &str) -> Result<Vec<PersistedRecord>, CoreError> {
        let db = self.db()?;
        let txn = db.begin_read().map_err(redb::Error::from)?;
        let tbl = match txn.open_table(table(owner)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(redb::Error::from(e).into()),
        };
        let mut out = Vec::new();
        for entry in tbl.iter().map_err(redb::Error::from)? {
            let (_, value) = entry.map_err(redb::Error::from)?;
            let rec: PersistedRecord = serde_json::from_str(value.value())
                .map_err(|e| storage_err(Backend::Database, e))?;
            out.push(rec);
        }
        Ok(out)
    }

    fn get(&self, owner: &str, key: &str) -> Result<Option<PersistedRecord>, CoreError> {
        let db = self.db()?;
        let txn = db.begin_read().map_err(redb::Error::from)?;
        let tbl = match txn.open_table(table(owner)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(redb::Error::from(e).into()),
        };
        let Some(guard) = tbl.get(key).map_err(redb::Error::from)? else {
            return Ok(None);
        };
        serde_json::from_str(guard.value())
            .map(Some)
            .map_err(|e| storage_err(Backend::Database, e))
    }

    /// Replace every row of the owner's table.
    fn replace_all(&self, owner: &str, records: &[PersistedRecord]) -> Result<(), CoreError> {
        let db = self.db()?;
        let txn = db.begin_write().map_err(redb::Error::from)?;
        txn.delete_table(table(owner)).map_err(redb::Error::from)?;
        {
            let mut tbl = txn.open_table(table(owner)).map_err(redb::Error::from)?;
            for rec in records {
                let json =
                    serde_json::to_string(rec).map_err(|e| storage_err(Backend::Database, e))?;
                tbl.insert(rec.key.as_str(), json.as_str())
                    .map_err(redb::Error::from)?;
            }
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    fn put(&self, owner: &str, record: &PersistedRecord) -> Result<(), CoreError> {
        let json = serde_json::to_string(record).map_err(|e| storage_err(Backend::Database, e))?;
        let db = self.db()?;
        let txn = db.begin_write().map_err(redb::Error::from)?;
        {
            let mut tbl = txn.open_table(table(owner)).map_err(redb::Error::from)?;
            tbl.insert(record.key.as_str(), json.as_str())
                .map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    fn remove(&self, owner: &str, key: Option<&str>) -> Result<bool, CoreError> {
        let db = self.db()?;
        let txn = db.begin_write().map_err(redb::Error::from)?;
        let removed = match key {
            None => txn.delete_table(table(owner)).map_err(redb::Error::from)?,
            Some(key) => {
                let mut tbl = txn.open_table(table(owner)).map_err(redb::Error::from)?;
                let old = tbl.remove(key).map_err(redb::Error::from)?;
                old.is_some()
            }
        };
        txn.commit().map_err(redb::Error::from)?;
        Ok(removed)
    }
}

// ── Facade ───────────────────────────────────────────────────────────

/// Shared persistence handle, one per [`StoreContext`](super::StoreContext).
pub struct Storage {
    session: MemoryStorage,
    local: Option<FileStorage>,
    database: Option<Arc<DatabaseStorage>>,
}

impl Storage {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            session: MemoryStorage::default(),
            local: settings.local_dir.as_deref().map(FileStorage::new),
            database: settings
                .database_path
                .as_deref()
                .map(|p| Arc::new(DatabaseStorage::new(p))),
        }
    }

    /// Session backend only.
    pub fn memory() -> Self {
        Self::new(&StorageSettings::default())
    }

    pub fn local_dir(&self) -> Option<&Path> {
        self.local.as_ref().map(|f| f.dir.as_path())
    }

    fn key_value(&self, backend: Backend) -> Result<&dyn KeyValue, CoreError> {
        match backend {
            Backend::Session => Ok(&self.session),
            Backend::Local => self
                .local
                .as_ref()
                .map(|f| f as &dyn KeyValue)
                .ok_or_else(|| unconfigured(backend)),
            Backend::Database => Err(CoreError::Internal(
                "database backend has no key/value form".into(),
            )),
        }
    }

    fn database(&self) -> Result<Arc<DatabaseStorage>, CoreError> {
        self.database.clone().ok_or_else(|| unconfigured(Backend::Database))
    }

    // ── Whole store ──────────────────────────────────────────────────

    pub(crate) async fn load_store(
        &self,
        backend: Backend,
        owner: &str,
    ) -> Result<Option<StoreDump>, CoreError> {
        trace!(%backend, owner, "loading store");
        if backend == Backend::Database {
            let db = self.database()?;
            let owner = owner.to_owned();
            let rows = blocking(move || db.load_all(&owner)).await?;
            return Ok((!rows.is_empty()).then(|| StoreDump::from_records(rows)));
        }
        let Some(raw) = self.key_value(backend)?.get_item(owner)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| storage_err(backend, e))
    }

    pub(crate) async fn save_store(
        &self,
        backend: Backend,
        owner: &str,
        dump: StoreDump,
    ) -> Result<(), CoreError> {
        debug!(%backend, owner, total = dump.total, "saving store");
        if backend == Backend::Database {
            let db = self.database()?;
            let owner = owner.to_owned();
            return blocking(move || db.replace_all(&owner, &dump.records)).await;
        }
        let raw = serde_json::to_string(&dump).map_err(|e| storage_err(backend, e))?;
        self.key_value(backend)?.set_item(owner, &raw)
    }

    pub(crate) async fn remove_store(&self, backend: Backend, owner: &str) -> Result<bool, CoreError> {
        debug!(%backend, owner, "removing store");
        if backend == Backend::Database {
            let db = self.database()?;
            let owner = owner.to_owned();
            return blocking(move || db.remove(&owner, None)).await;
        }
        self.key_value(backend)?.remove_item(owner)
    }

    // ── Single record ────────────────────────────────────────────────

    pub(crate) async fn load_record(
        &self,
        backend: Backend,
        owner: &str,
        key: &str,
    ) -> Result<Option<Map<String, Value>>, CoreError> {
        trace!(%backend, owner, key, "loading record");
        if backend == Backend::Database {
            let db = self.database()?;
            let (owner, key) = (owner.to_owned(), key.to_owned());
            let rec = blocking(move || db.get(&owner, &key)).await?;
            return Ok(rec.map(|r| r.data));
        }
        let Some(raw) = self.key_value(backend)?.get_item(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| storage_err(backend, e))
    }

    pub(crate) async fn save_record(
        &self,
        backend: Backend,
        owner: &str,
        record: PersistedRecord,
    ) -> Result<(), CoreError> {
        trace!(%backend, owner, key = %record.key, "saving record");
        if backend == Backend::Database {
            let db = self.database()?;
            let owner = owner.to_owned();
            return blocking(move || db.put(&owner, &record)).await;
        }
        let raw = serde_json::to_string(&record.data).map_err(|e| storage_err(backend, e))?;
        self.key_value(backend)?.set_item(&record.key, &raw)
    }

    pub(crate) async fn remove_record(
        &self,
        backend: Backend,
        owner: &str,
        key: &str,
    ) -> Result<bool, CoreError> {
        trace!(%backend, owner, key, "removing record");
        if backend == Backend::Database {
            let db = self.database()?;
            let (owner, key) = (owner.to_owned(), key.to_owned());
            return blocking(move || db.remove(&owner, Some(&key))).await;
        }
        self.key_value(backend)?.remove_item(key)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::memory()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("local", &self.local_dir())
            .field("database", &self.database.as_ref().map(|d| d.path.clone()))
            .finish_non_exhaustive()
    }
}

fn unconfigured(backend: Backend) -> CoreError {
    CoreError::Config {
        message: format!("{backend} storage is not configured"),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(format!("storage worker failed: {e}")))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(index: usize, key: &str, data: Value) -> PersistedRecord {
        PersistedRecord {
            index,
            key: key.into(),
            data: data.as_object().unwrap().clone(),
        }
    }

    fn dump() -> StoreDump {
        StoreDump::from_records(vec![
            rec(1, "b", json!({"n": 2})),
            rec(0, "a", json!({"n": 1})),
        ])
    }

    #[test]
    fn dump_orders_by_index() {
        let d = dump();
        assert_eq!(d.total, 2);
        assert_eq!(d.records[0].key, "a");
        assert_eq!(d.keys["b"], 1);
    }

    #[test]
    fn file_storage_encodes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStorage::new(dir.path());
        fs.set_item("a/b c", "1").unwrap();
        assert_eq!(fs.get_item("a/b c").unwrap().as_deref(), Some("1"));
        assert!(fs.remove_item("a/b c").unwrap());
        assert!(!fs.remove_item("a/b c").unwrap());
        assert!(fs.get_item("a/b c").unwrap().is_none());
    }

    #[tokio::test]
    async fn session_round_trips_store_and_record() {
        let storage = Storage::memory();
        storage.save_store(Backend::Session, "host", dump()).await.unwrap();
        assert_eq!(
            storage.load_store(Backend::Session, "host").await.unwrap(),
            Some(dump())
        );

        storage
            .save_record(Backend::Session, "host", rec(0, "a", json!({"n": 9})))
            .await
            .unwrap();
        let data = storage.load_record(Backend::Session, "host", "a").await.unwrap();
        assert_eq!(data.unwrap()["n"], json!(9));

        assert!(storage.remove_store(Backend::Session, "host").await.unwrap());
        assert!(storage.load_store(Backend::Session, "host").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unconfigured_backends_are_config_errors() {
        let storage = Storage::memory();
        let err = storage.load_store(Backend::Local, "host").await.unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
        let err = storage.load_store(Backend::Database, "host").await.unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[tokio::test]
    async fn database_keeps_one_table_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&StorageSettings {
            local_dir: None,
            database_path: Some(dir.path().join("stowage.redb")),
        });

        assert!(storage.load_store(Backend::Database, "one").await.unwrap().is_none());
        storage.save_store(Backend::Database, "one", dump()).await.unwrap();
        storage
            .save_record(Backend::Database, "two", rec(0, "x", json!({"n": 0})))
            .await
            .unwrap();

        let loaded = storage.load_store(Backend::Database, "one").await.unwrap().unwrap();
        assert_eq!(loaded, dump());
        assert_eq!(
            storage.load_record(Backend::Database, "two", "x").await.unwrap().unwrap()["n"],
            json!(0)
        );

        assert!(storage.remove_record(Backend::Database, "one", "a").await.unwrap());
        let loaded = storage.load_store(Backend::Database, "one").await.unwrap().unwrap();
        assert_eq!(loaded.total, 1);
        assert!(storage.remove_store(Backend::Database, "one").await.unwrap());
        assert!(storage.load_store(Backend::Database, "one").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_backend_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&StorageSettings {
            local_dir: Some(dir.path().to_path_buf()),
            database_path: None,
        });
        storage.save_store(Backend::Local, "host", dump()).await.unwrap();
        assert!(dir.path().join("host.json").exists());
        let loaded = storage.load_store(Backend::Local, "host").await.unwrap();
        assert_eq!(loaded, Some(dump()));
    }
}
