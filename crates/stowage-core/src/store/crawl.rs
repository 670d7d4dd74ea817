// ── Nested store materialization ──

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, try_join_all};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::DataStore;
use super::crud::BatchKind;
use super::links;
use crate::error::CoreError;
use crate::event::{EventKind, Payload};
use crate::model::{Field, Record, Selector};

impl DataStore {
    /// Expand a record's array and hyperlink fields into nested stores.
    ///
    /// Arrays qualify when every element is an object or a link. Fields
    /// named in `ignore` or `leafs` are left alone, as is every field once
    /// this store sits at `max_depth`. Array values populate the child
    /// through a batch; links bind the child to the resolved URI, which
    /// syncs it. Resolves once every child has settled.
    pub fn crawl(
        &self,
        selector: impl Into<Selector>,
    ) -> BoxFuture<'static, Result<Arc<Record>, CoreError>> {
        let store = self.clone();
        let selector = selector.into();
        async move { store.crawl_inner(selector).await }.boxed()
    }

    async fn crawl_inner(&self, selector: Selector) -> Result<Arc<Record>, CoreError> {
        let (uri, options) = {
            let st = self.read();
            (st.uri.clone(), st.options.clone())
        };
        let Some(uri) = uri else {
            return Err(CoreError::invalid("crawl requires a uri"));
        };
        let record = self
            .get_one(selector.clone())
            .ok_or_else(|| CoreError::not_found(selector.to_string()))?;

        self.fire(EventKind::BeforeDataRetrieve, Payload::Record(Arc::clone(&record)));

        let expandable = self.inner.depth < options.max_depth;
        let mut children = Vec::new();
        let mut jobs: Vec<BoxFuture<'static, Result<(), CoreError>>> = Vec::new();
        for (name, field) in &record.data {
            let Field::Value(value) = field else {
                continue;
            };
            if !expandable || options.ignore.contains(name) || options.leafs.contains(name) {
                continue;
            }
            let owner = format!("{}/{}/{name}", self.inner.owner, record.key);
            match value {
                Value::Array(items) if items.iter().all(is_row) => {
                    // Link rows are fetched by the child, which has no
                    // endpoint of its own to resolve against.
                    let items = match absolutize(&uri, items) {
                        Ok(items) => Value::Array(items),
                        Err(e) => {
                            self.fire(EventKind::FailedDataRetrieve, Payload::Error(e.to_string()));
                            return Err(e);
                        }
                    };
                    let child = self.child(owner, options.for_child());
                    let job = child.clone();
                    jobs.push(
                        async move { job.batch(BatchKind::Set, items, false).await.map(|_| ()) }
                            .boxed(),
                    );
                    children.push((name.clone(), child));
                }
                Value::String(link) if links::is_link(link) => {
                    let url = match links::resolve(Some(&uri), link) {
                        Ok(url) => url,
                        Err(e) => {
                            self.fire(EventKind::FailedDataRetrieve, Payload::Error(e.to_string()));
                            return Err(e);
                        }
                    };
                    let child = self.child(owner, options.for_child());
                    let job = child.clone();
                    jobs.push(async move { job.bind(url).await.map(|_| ()) }.boxed());
                    children.push((name.clone(), child));
                }
                _ => {}
            }
        }

        if !children.is_empty() {
            debug!(
                owner = %self.inner.owner,
                key = %record.key,
                fields = children.len(),
                "expanding nested stores"
            );
            let mut st = self.write();
            if let Some(current) = st.records.by_key(&record.key) {
                let mut next = Record::clone(&current);
                for (name, child) in children {
                    next.data.insert(name.clone(), Field::Store(child));
                    st.collections.insert(name);
                }
                st.records.insert(next);
            }
        }

        match try_join_all(jobs).await {
            Ok(_) => {
                let latest = self.get_one(Selector::Key(record.key.clone())).unwrap_or(record);
                self.fire(EventKind::AfterDataRetrieve, Payload::Record(Arc::clone(&latest)));
                Ok(latest)
            }
            Err(e) => {
                warn!(owner = %self.inner.owner, key = %record.key, error = %e, "crawl failed");
                self.fire(EventKind::FailedDataRetrieve, Payload::Error(e.to_string()));
                Err(e)
            }
        }
    }
}

/// An array element a child store can hold: an object, or a link to fetch.
fn is_row(v: &Value) -> bool {
    v.is_object() || v.as_str().is_some_and(links::is_link)
}

fn absolutize(base: &Url, items: &[Value]) -> Result<Vec<Value>, CoreError> {
    items
        .iter()
        .map(|v| match v {
            Value::String(link) => Ok(Value::String(links::resolve(Some(base), link)?.into())),
            other => Ok(other.clone()),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_are_objects_or_links() {
        assert!(is_row(&json!({"a": 1})));
        assert!(is_row(&json!("/pets/1")));
        assert!(!is_row(&json!("tag")));
        assert!(!is_row(&json!(3)));
    }

    #[test]
    fn absolutize_resolves_links_only() {
        let base = Url::parse("https://api.example.com/people").unwrap();
        let items = absolutize(&base, &[json!("/pets/1"), json!({"a": 1})]).unwrap();
        assert_eq!(items[0], json!("https://api.example.com/pets/1"));
        assert_eq!(items[1], json!({"a": 1}));
    }
}
