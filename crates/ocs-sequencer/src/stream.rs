//! Async adapter that sequences a stream of listener events.

use crate::error::Result;
use crate::event::ListenerEvent;
use crate::sequencer::{Sequencer, SequencerConfig};
use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

enum Step {
    Event(Option<ListenerEvent>),
    Deadline,
}

/// Wrap `events` so that mutation events come out in causal order.
///
/// The output ends after the first [`OutOfSyncError`](crate::OutOfSyncError),
/// including a deadline that expires while no input arrives.
pub fn sequenced<S>(events: S, config: SequencerConfig) -> impl Stream<Item = Result<ListenerEvent>>
where
    S: Stream<Item = ListenerEvent> + Unpin,
{
    stream! {
        let mut events = events;
        let mut sequencer = Sequencer::new(config);
        loop {
            let deadline = sequencer.deadline();
            let step = tokio::select! {
                next = events.next() => Step::Event(next),
                _ = sleep_until(deadline) => Step::Deadline,
            };

            match step {
                Step::Deadline => {
                    if let Err(err) = sequencer.check_deadline(Instant::now()) {
                        warn!(error = %err, "listener stream out of sync");
                        yield Err(err);
                        break;
                    }
                }
                Step::Event(None) => {
                    debug!(buffered = sequencer.buffered().len(), "listener stream ended");
                    break;
                }
                Step::Event(Some(event)) => match sequencer.push(event, Instant::now()) {
                    Ok(out) => {
                        for event in out.emit {
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "listener stream out of sync");
                        yield Err(err);
                        break;
                    }
                },
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}
