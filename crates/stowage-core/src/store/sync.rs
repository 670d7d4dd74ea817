// ── Remote reconciliation ──

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::DataStore;
use super::crud::BatchKind;
use super::links;
use crate::error::CoreError;
use crate::event::{EventKind, Payload};
use crate::model::Record;

impl DataStore {
    /// Fetch the bound URI and replace the store's records with the result.
    ///
    /// The body is unwrapped through the `source` path when one is set,
    /// coerced to a list of rows, and applied through a sync batch.
    pub async fn sync(&self) -> Result<Arc<Vec<Arc<Record>>>, CoreError> {
        let (uri, options) = {
            let st = self.read();
            (st.uri.clone(), st.options.clone())
        };
        let Some(uri) = uri else {
            return Err(CoreError::invalid("sync requires a uri"));
        };

        self.fire(EventKind::BeforeDataSync, Payload::Key(uri.to_string()));
        let result: Result<_, CoreError> = async {
            let client = &self.inner.ctx.client;
            let body = match options.callback.as_deref() {
                Some(param) => client.jsonp(&uri, param, &options.headers).await?,
                None => client.get(&uri, &options.headers).await?,
            };
            let body = match options.source.as_deref() {
                Some(path) => links::walk_source(body, path)?,
                None => body,
            };
            let rows = links::into_rows(body);
            self.batch(BatchKind::Set, Value::Array(rows), true).await
        }
        .await;

        match result {
            Ok(records) => {
                info!(owner = %self.inner.owner, uri = %uri, total = records.len(), "synced");
                self.fire(EventKind::AfterDataSync, Payload::Records(Arc::clone(&records)));
                Ok(records)
            }
            Err(e) => {
                warn!(owner = %self.inner.owner, uri = %uri, error = %e, "sync failed");
                self.fire(EventKind::FailedDataSync, Payload::Error(e.to_string()));
                Err(e)
            }
        }
    }
}
