//! Subscriber side of a document's event stream.

use crate::event::DocumentEvent;
use crate::store::OptimisticStore;
use async_stream::stream;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Stream of [`DocumentEvent`]s for one document.
///
/// Dropping the subscription unsubscribes. When the last subscriber of a
/// document leaves, its listener is torn down after the store's keep-alive
/// window unless someone subscribes again in the meantime.
pub struct DocumentSubscription {
    store: OptimisticStore,
    id: String,
    events: Pin<Box<dyn Stream<Item = DocumentEvent> + Send>>,
}

impl DocumentSubscription {
    pub(crate) fn new(
        store: OptimisticStore,
        id: String,
        mut receiver: broadcast::Receiver<DocumentEvent>,
        initial: DocumentEvent,
    ) -> Self {
        let lagged_id = id.clone();
        let events = Box::pin(stream! {
            yield initial;
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(id = %lagged_id, skipped, "subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { store, id, events }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for DocumentSubscription {
    type Item = DocumentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for DocumentSubscription {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}
