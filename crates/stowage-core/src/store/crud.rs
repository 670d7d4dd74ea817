// ── set / update / del / batch ──
//
// `set` returns a boxed future: completing a record can route collection
// fields into nested stores and crawl, both of which lead back here.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, try_join_all};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use stowage_api::Method;
use strum::{Display, EnumString};
use tracing::{debug, warn};
use uuid::Uuid;

use super::DataStore;
use super::data_store::teardown_fields;
use super::links;
use crate::error::CoreError;
use crate::event::{EventKind, Payload};
use crate::model::{Field, Record, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BatchKind {
    Set,
    Del,
}

/// Parsed `set` payload.
enum Incoming {
    /// Fetch-and-merge from this URI.
    Uri(String),
    Fields(Map<String, Value>),
}

type Nested = BoxFuture<'static, Result<(), CoreError>>;

impl DataStore {
    /// Insert or update a record.
    ///
    /// `data` is either an object of field values or a URI string to
    /// fetch and merge. With `key` unset the configured key field (if
    /// present in `data`) becomes the key, else a UUID is generated. Inside
    /// a `batch` no per-record events fire and no remote write is issued.
    pub fn set(
        &self,
        key: Option<String>,
        data: Value,
        batch: bool,
    ) -> BoxFuture<'static, Result<Arc<Record>, CoreError>> {
        let store = self.clone();
        async move { store.set_inner(key, data, batch, None).await }.boxed()
    }

    /// Like [`set`](Self::set), rejecting with `RevisionMismatch` unless the
    /// record's current revision equals `expected`. A missing record has
    /// revision 0.
    pub fn set_if(
        &self,
        key: impl Into<String>,
        data: Value,
        expected: u64,
    ) -> BoxFuture<'static, Result<Arc<Record>, CoreError>> {
        let store = self.clone();
        let key = key.into();
        async move { store.set_inner(Some(key), data, false, Some(expected)).await }.boxed()
    }

    /// Merge partial `data` into an existing record.
    pub async fn update(
        &self,
        selector: impl Into<Selector>,
        data: Value,
    ) -> Result<Arc<Record>, CoreError> {
        let selector = selector.into();
        if !selector.is_single() {
            return Err(CoreError::invalid(format!(
                "update needs a single key or index, got {selector}"
            )));
        }
        if !data.is_object() {
            return Err(CoreError::invalid("update data must be an object"));
        }
        let record = self
            .get_one(selector.clone())
            .ok_or_else(|| CoreError::not_found(selector.to_string()))?;
        self.set(Some(record.key.clone()), data, false).await
    }

    async fn set_inner(
        &self,
        key: Option<String>,
        data: Value,
        batch: bool,
        expected: Option<u64>,
    ) -> Result<Arc<Record>, CoreError> {
        let incoming = match data {
            Value::String(uri) => Incoming::Uri(uri),
            Value::Object(fields) => Incoming::Fields(fields),
            other => {
                return Err(CoreError::invalid(format!(
                    "set expects an object or a uri, got {other}"
                )));
            }
        };

        if !batch {
            self.fire(
                EventKind::BeforeDataSet,
                Payload::Data(json!({ "key": key })),
            );
        }
        let result = self.set_remote(key, incoming, batch, expected).await;
        match result {
            Ok(record) => {
                if !batch {
                    self.autosave_record(&record).await;
                    self.fire(EventKind::AfterDataSet, Payload::Record(Arc::clone(&record)));
                }
                Ok(record)
            }
            Err(e) => {
                if !batch {
                    self.fire(EventKind::FailedDataSet, Payload::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Resolve the key, talk to the remote collection when one is bound,
    /// then complete locally.
    async fn set_remote(
        &self,
        key: Option<String>,
        incoming: Incoming,
        batch: bool,
        expected: Option<u64>,
    ) -> Result<Arc<Record>, CoreError> {
        let (options, uri) = {
            let st = self.read();
            (st.options.clone(), st.uri.clone())
        };

        let mut fields = match incoming {
            Incoming::Fields(fields) => fields,
            Incoming::Uri(link) => {
                let url = links::resolve(uri.as_ref(), &link)?;
                let key = key
                    .or_else(|| links::last_segment(&url))
                    .ok_or_else(|| CoreError::InvalidData {
                        message: format!("cannot derive a record key from {url}"),
                    })?;
                let body = self
                    .inner
                    .ctx
                    .client
                    .get(&url, &options.headers)
                    .await?;
                let Value::Object(fields) = body else {
                    return Err(CoreError::InvalidData {
                        message: format!("{url} did not return an object"),
                    });
                };
                check_revision(self, &key, expected)?;
                return self.set_complete(key, fields, expected).await;
            }
        };

        let submitted = fields.clone();
        let key = match key {
            Some(k) => k,
            None => match options.key.as_deref().and_then(|k| take_key(&mut fields, k)) {
                Some(k) => k,
                None => Uuid::new_v4().to_string(),
            },
        };
        check_revision(self, &key, expected)?;
        let existing = self.get_one(Selector::Key(key.clone()));

        let remote = match (&uri, &options.callback) {
            (Some(uri), None) if !batch => Some(uri),
            _ => None,
        };
        let Some(collection) = remote else {
            return self.set_complete(key, fields, expected).await;
        };

        let client = &self.inner.ctx.client;
        match existing {
            None => {
                debug!(owner = %self.inner.owner, uri = %collection, "POST new record");
                let created = client
                    .post(collection, &Value::Object(submitted), &options.headers)
                    .await?;
                let (key, fields) = match created {
                    Value::Object(mut body) if !body.is_empty() => {
                        let key = options
                            .key
                            .as_deref()
                            .and_then(|k| take_key(&mut body, k))
                            .unwrap_or(key);
                        (key, body)
                    }
                    _ => (key, fields),
                };
                self.set_complete(key, fields, expected).await
            }
            Some(record) => {
                let target = links::record_url(collection, &key)?;
                let patch = client
                    .allows(&target, &Method::PATCH)
                    .or_else(|| client.allows(collection, &Method::PATCH))
                    .unwrap_or(false);
                if patch {
                    debug!(owner = %self.inner.owner, uri = %target, "PATCH record");
                    client.patch(&target, &Value::Object(fields.clone()), &options.headers).await?;
                } else {
                    let mut full = record.plain_values();
                    full.extend(fields.clone());
                    debug!(owner = %self.inner.owner, uri = %target, "PUT record");
                    client.put(&target, &Value::Object(full), &options.headers).await?;
                }
                self.set_complete(key, fields, expected).await
            }
        }
    }

    /// Link the record in: merge fields, route collection fields to their
    /// nested stores, crawl when retrieval is on, and wait for all of it.
    async fn set_complete(
        &self,
        key: String,
        fields: Map<String, Value>,
        expected: Option<u64>,
    ) -> Result<Arc<Record>, CoreError> {
        let (nested, retrieve) = {
            let mut st = self.write();
            let current = st.records.by_key(&key);
            if let Some(expected) = expected {
                let actual = current.as_ref().map_or(0, |r| r.revision);
                if actual != expected {
                    return Err(CoreError::RevisionMismatch {
                        key,
                        expected,
                        actual,
                    });
                }
            }

            let mut record = match &current {
                Some(r) => Record::clone(r),
                None => Record::new(key.clone(), IndexMap::new()),
            };
            let mut nested: Vec<Nested> = Vec::new();
            for (name, value) in fields {
                let child = st
                    .collections
                    .contains(&name)
                    .then(|| record.store(&name).cloned())
                    .flatten();
                match (child, value) {
                    (Some(child), Value::String(link)) => {
                        let base = st.uri.clone();
                        nested.push(
                            async move {
                                let url = links::resolve(base.as_ref(), &link)?;
                                child.bind(url).await.map(|_| ())
                            }
                            .boxed(),
                        );
                    }
                    (Some(child), value @ (Value::Array(_) | Value::Object(_))) => {
                        nested.push(
                            async move { child.batch(BatchKind::Set, value, true).await.map(|_| ()) }
                                .boxed(),
                        );
                    }
                    (_, value) => {
                        record.data.insert(name, Field::Value(value));
                    }
                }
            }
            if current.is_some() {
                record.revision += 1;
            }
            st.records.insert(record);
            (nested, st.options.retrieve && st.uri.is_some())
        };

        try_join_all(nested).await?;
        if retrieve {
            self.crawl(Selector::Key(key.clone())).await?;
        }
        self.get_one(Selector::Key(key.clone()))
            .ok_or_else(|| CoreError::not_found(key))
    }

    /// Delete one record by key or index.
    ///
    /// With a bound URI (and no JSONP callback) the record is deleted
    /// remotely first. Record indices shift immediately; `reindex` rewrites
    /// them.
    pub async fn del(
        &self,
        selector: impl Into<Selector>,
        reindex: bool,
        batch: bool,
    ) -> Result<String, CoreError> {
        let selector = selector.into();
        if !selector.is_single() {
            return Err(CoreError::invalid(format!(
                "del needs a single key or index, got {selector}"
            )));
        }
        let record = self
            .get_one(selector.clone())
            .ok_or_else(|| CoreError::not_found(selector.to_string()))?;
        let key = record.key.clone();

        if !batch {
            self.fire(EventKind::BeforeDataDelete, Payload::Key(key.clone()));
        }
        let (uri, callback, headers) = {
            let st = self.read();
            (
                st.uri.clone(),
                st.options.callback.clone(),
                st.options.headers.clone(),
            )
        };

        let result = async {
            if let (Some(uri), None) = (&uri, &callback) {
                let target = links::record_url(uri, &key)?;
                debug!(owner = %self.inner.owner, uri = %target, "DELETE record");
                self.inner.ctx.client.delete(&target, &headers).await?;
            }
            self.del_complete(&key, reindex)
        }
        .await;

        match result {
            Ok(removed) => {
                if !batch {
                    self.autosave_store().await;
                    self.fire(EventKind::AfterDataDelete, Payload::Record(removed));
                }
                Ok(key)
            }
            Err(e) => {
                if !batch {
                    self.fire(EventKind::FailedDataDelete, Payload::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    fn del_complete(&self, key: &str, reindex: bool) -> Result<Arc<Record>, CoreError> {
        let removed = {
            let mut st = self.write();
            let removed = st.records.remove(key);
            if reindex {
                st.records.reindex();
            }
            removed
        }
        .ok_or_else(|| CoreError::not_found(key))?;
        teardown_fields(&removed);
        Ok(removed)
    }

    /// Apply many sets or deletes and wait for all of them.
    ///
    /// `data` is an array (of records, or of keys/indices for `Del`) or an
    /// object keyed by record key. `sync` clears records first and cannot
    /// be combined with `Del`. The first failure rejects the batch;
    /// completed operations are not rolled back.
    pub async fn batch(
        &self,
        kind: BatchKind,
        data: Value,
        sync: bool,
    ) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        if sync && kind == BatchKind::Del {
            return Err(CoreError::invalid("a sync batch cannot delete"));
        }
        let items: Vec<(Option<String>, Value)> = match data {
            Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            other => {
                return Err(CoreError::invalid(format!(
                    "batch expects an array or an object, got {other}"
                )));
            }
        };
        let targets = match kind {
            BatchKind::Del => self.delete_targets(&items)?,
            BatchKind::Set => Vec::new(),
        };

        if items.is_empty() {
            if sync {
                self.clear(true);
            }
            return Ok(self.records());
        }

        self.fire(EventKind::BeforeDataBatch, Payload::None);
        if sync {
            self.clear(true);
        }

        let count = items.len();
        let result = match kind {
            BatchKind::Set => try_join_all(items.into_iter().map(|(key, v)| self.set(key, v, true)))
                .await
                .map(|_| ()),
            BatchKind::Del => try_join_all(
                targets
                    .into_iter()
                    .map(|key| self.del(Selector::Key(key), false, true)),
            )
            .await
            .map(|_| ()),
        };
        if let Err(e) = result {
            warn!(owner = %self.inner.owner, %kind, error = %e, "batch failed");
            self.fire(EventKind::FailedDataBatch, Payload::Error(e.to_string()));
            return Err(e);
        }

        {
            let mut st = self.write();
            st.loaded = true;
            if kind == BatchKind::Del {
                st.records.reindex();
            }
        }
        self.autosave_store().await;
        let records = self.records();
        debug!(owner = %self.inner.owner, %kind, count, total = records.len(), "batch complete");
        self.fire(EventKind::AfterDataBatch, Payload::Records(Arc::clone(&records)));
        Ok(records)
    }

    /// Resolve delete targets to keys before anything is removed.
    fn delete_targets(&self, items: &[(Option<String>, Value)]) -> Result<Vec<String>, CoreError> {
        items
            .iter()
            .map(|(key, value)| {
                let selector = match (key, value) {
                    (Some(k), _) | (None, Value::String(k)) => Selector::Key(k.clone()),
                    (None, Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| usize::try_from(i).ok())
                        .map(Selector::Index)
                        .ok_or_else(|| CoreError::invalid(format!("bad record index {n}")))?,
                    (None, Value::Object(o)) => match o.get("key") {
                        Some(Value::String(k)) => Selector::Key(k.clone()),
                        _ => return Err(CoreError::invalid("record object without a key")),
                    },
                    (None, other) => {
                        return Err(CoreError::invalid(format!("cannot delete by {other}")));
                    }
                };
                self.get_one(selector.clone())
                    .map(|r| r.key.clone())
                    .ok_or_else(|| CoreError::not_found(selector.to_string()))
            })
            .collect()
    }
}

/// Pull the key field out of `fields`. Strings and numbers qualify.
fn take_key(fields: &mut Map<String, Value>, field: &str) -> Option<String> {
    let key = match fields.get(field)? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    fields.remove(field);
    Some(key)
}

fn check_revision(store: &DataStore, key: &str, expected: Option<u64>) -> Result<(), CoreError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = store.get_one(Selector::Key(key.to_owned())).map_or(0, |r| r.revision);
    if actual == expected {
        Ok(())
    } else {
        Err(CoreError::RevisionMismatch {
            key: key.to_owned(),
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_key_strips_strings_and_numbers() {
        let mut fields = json!({"id": 7, "name": "x"}).as_object().cloned().unwrap_or_default();
        assert_eq!(take_key(&mut fields, "id").as_deref(), Some("7"));
        assert!(!fields.contains_key("id"));

        let mut fields = json!({"id": ""}).as_object().cloned().unwrap_or_default();
        assert_eq!(take_key(&mut fields, "id"), None);
        assert!(fields.contains_key("id"));
    }

    #[test]
    fn batch_kind_names() {
        assert_eq!(BatchKind::Del.to_string(), "del");
        assert_eq!("set".parse::<BatchKind>().ok(), Some(BatchKind::Set));
    }
}
