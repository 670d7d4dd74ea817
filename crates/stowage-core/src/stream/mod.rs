// ── Record snapshot streams ──
//
// Subscription handle over a store's record sequence.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Record;

type Snapshot = Arc<Vec<Arc<Record>>>;

/// A subscription to a store's records.
///
/// Holds the snapshot seen at creation and wakes on every structural
/// mutation (set, delete, reindex, clear).
pub struct RecordStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl RecordStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// The latest snapshot.
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    pub fn into_stream(self) -> RecordWatchStream {
        RecordWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` of record snapshots, starting with the current one.
pub struct RecordWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for RecordWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
