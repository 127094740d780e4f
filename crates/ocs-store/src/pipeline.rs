//! Per-document pipeline task.
//!
//! One task per subscribed document owns the remote stream, the sequencer and
//! the retry timer. It interprets machine effects (subscribe, fetch, submit,
//! schedule retry) and feeds their outcomes back into the store's reducers.
//! Dropping the [`PipelineHandle`] aborts the task, which withdraws any fetch
//! still in flight.

use crate::backend::{RemoteMessage, RemoteStream};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::machine::{Effect, MachineEvent};
use crate::retry::RetryConfig;
use crate::store::{Inner, OptimisticStore};
use futures::StreamExt;
use ocs_mutation::Document;
use ocs_sequencer::{sleep_until, ListenerEvent, Sequencer, SequencerConfig};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub(crate) enum Command {
    Run(Effect),
}

pub(crate) struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub(crate) fn send(&self, command: Command) {
        let _ = self.commands.send(command);
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn(inner: Weak<Inner>, id: String, config: &StoreConfig) -> PipelineHandle {
    let (commands, rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline {
        id,
        inner,
        commands: rx,
        remote: None,
        sequencer: Sequencer::new(config.sequencer.clone()),
        sequencer_config: config.sequencer.clone(),
        retry: config.retry.clone(),
        retry_at: None,
    };
    PipelineHandle {
        commands,
        task: tokio::spawn(pipeline.run()),
    }
}

enum Step {
    Command(Option<Command>),
    Remote(Option<RemoteMessage>),
    Retry,
    Deadline,
}

struct Pipeline {
    id: String,
    inner: Weak<Inner>,
    commands: mpsc::UnboundedReceiver<Command>,
    remote: Option<RemoteStream>,
    sequencer: Sequencer,
    sequencer_config: SequencerConfig,
    retry: RetryConfig,
    retry_at: Option<Instant>,
}

async fn next_message(remote: &mut Option<RemoteStream>) -> Option<RemoteMessage> {
    match remote {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

impl Pipeline {
    async fn run(mut self) {
        debug!(id = %self.id, "document pipeline started");
        loop {
            let retry_at = self.retry_at;
            let deadline = self.sequencer.deadline();
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                message = next_message(&mut self.remote) => Step::Remote(message),
                _ = sleep_until(retry_at) => Step::Retry,
                _ = sleep_until(deadline) => Step::Deadline,
            };

            let Some(inner) = self.inner.upgrade() else {
                break;
            };
            match step {
                Step::Command(None) => break,
                Step::Command(Some(Command::Run(effect))) => self.run_effect(&inner, effect).await,
                Step::Remote(Some(message)) => self.on_message(&inner, message),
                Step::Remote(None) => {
                    debug!(id = %self.id, "remote stream ended");
                    self.remote = None;
                    self.dispatch(&inner, MachineEvent::ConnectFailed);
                }
                Step::Retry => {
                    self.retry_at = None;
                    self.dispatch(&inner, MachineEvent::Retry { manual: false });
                }
                Step::Deadline => {
                    if let Err(error) = self.sequencer.check_deadline(Instant::now()) {
                        self.out_of_sync(&inner, error.into());
                    }
                }
            }
        }
        debug!(id = %self.id, "document pipeline stopped");
    }

    fn dispatch(&self, inner: &Inner, event: MachineEvent) {
        inner.state.lock().dispatch(&self.id, event);
    }

    async fn run_effect(&mut self, inner: &Arc<Inner>, effect: Effect) {
        trace!(id = %self.id, ?effect, "running effect");
        match effect {
            Effect::Subscribe => match inner.backend.observe(&self.id).await {
                Ok(stream) => {
                    self.remote = Some(stream);
                    self.sequencer = Sequencer::new(self.sequencer_config.clone());
                }
                Err(error) => {
                    let error = StoreError::Connect(error);
                    warn!(id = %self.id, error = %error, "subscribe failed");
                    self.dispatch(inner, MachineEvent::ConnectFailed);
                }
            },
            Effect::Unsubscribe => {
                self.remote = None;
            }
            Effect::Fetch => match inner.backend.fetch(&self.id).await {
                Ok(document) => self.on_snapshot(inner, document),
                Err(error) => {
                    let error = StoreError::Fetch(error);
                    warn!(id = %self.id, error = %error, "snapshot fetch failed");
                    self.dispatch(inner, MachineEvent::LoadFailed);
                }
            },
            Effect::Submit => {
                let store = OptimisticStore::from_inner(inner.clone());
                let id = self.id.clone();
                tokio::spawn(async move {
                    match store.submit().await {
                        Ok(results) => debug!(id = %id, committed = results.len(), "retried submission"),
                        Err(StoreError::AlreadySubmitting) => {
                            debug!(id = %id, "submission already in flight")
                        }
                        Err(error) => debug!(id = %id, error = %error, "retried submission failed"),
                    }
                });
            }
            Effect::ScheduleRetry { attempts } => {
                let delay = self.retry.delay(attempts);
                debug!(
                    id = %self.id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            Effect::CancelRetry => {
                self.retry_at = None;
            }
        }
    }

    fn on_message(&mut self, inner: &Inner, message: RemoteMessage) {
        match message {
            RemoteMessage::Welcome => self.dispatch(inner, MachineEvent::Welcome),
            RemoteMessage::Mutation(event) => self.push(inner, ListenerEvent::Mutation(event)),
            RemoteMessage::Reconnect => self.push(inner, ListenerEvent::Reconnect),
        }
    }

    fn on_snapshot(&mut self, inner: &Inner, document: Option<Document>) {
        self.push(inner, ListenerEvent::Sync { document });
    }

    /// Sequence one listener event and apply whatever it releases.
    fn push(&mut self, inner: &Inner, event: ListenerEvent) {
        let out = match self.sequencer.push(event, Instant::now()) {
            Ok(out) => out,
            Err(error) => {
                self.out_of_sync(inner, error.into());
                return;
            }
        };

        // A duplicate of a still buffered event is not applied yet.
        let buffered = self.sequencer.buffered();
        let discarded: Vec<_> = out
            .discarded
            .into_iter()
            .filter(|e| !buffered.iter().any(|b| b.result_rev == e.result_rev))
            .collect();

        let mut state = inner.state.lock();
        state.forget_discarded(&self.id, &discarded);
        for event in out.emit {
            if let Err(error) = state.apply_remote(&self.id, event, inner.codec.as_ref()) {
                drop(state);
                self.out_of_sync(inner, error);
                return;
            }
        }
    }

    fn out_of_sync(&mut self, inner: &Inner, error: StoreError) {
        self.sequencer = Sequencer::new(self.sequencer_config.clone());
        inner.state.lock().out_of_sync(&self.id, error);
    }
}
