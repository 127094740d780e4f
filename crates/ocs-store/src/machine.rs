//! Per-document connection state machine.
//!
//! The machine is a pure transition function: `(state, event) -> (state,
//! effects)`. It performs no I/O. The document pipeline interprets the
//! effects (subscribing, fetching, scheduling retries) and feeds their
//! outcomes back in as events.
//!
//! ```text
//! disconnected ──connect──▶ connecting ──welcome──▶ connected
//!                              │  ▲                    │
//!                      failed  ▼  │ retry              ├─ reconnecting ──welcome──▶ loading
//!                         connectFailure               ├─ loading ──▶ loaded | loadFailure
//!                                                      └─ loaded
//!                                                           ├─ pristine ──mutated──▶ dirty
//!                                                           ├─ dirty ──submit──▶ submitting
//!                                                           └─ submitting ──▶ pristine | dirty | submitFailure
//! ```
//!
//! Every failure state schedules a retry with exponential backoff. The attempt
//! counter is reset whenever the failed step succeeds or a manual retry is
//! requested.

use serde::Serialize;
use std::fmt;

/// Where a document's connection currently is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    ConnectFailure,
    Connected(ConnectedState),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectedState {
    /// Transport dropped; waiting for a fresh welcome.
    Reconnecting,
    Loading,
    LoadFailure,
    Loaded(LoadedState),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadedState {
    Pristine,
    Dirty,
    Submitting,
    SubmitFailure,
}

impl ConnectionState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ConnectionState::Connected(ConnectedState::Loaded(_)))
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectFailure
                | ConnectionState::Connected(ConnectedState::LoadFailure)
                | ConnectionState::Connected(ConnectedState::Loaded(LoadedState::SubmitFailure))
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::ConnectFailure => write!(f, "connectFailure"),
            ConnectionState::Connected(inner) => {
                write!(f, "connected.")?;
                match inner {
                    ConnectedState::Reconnecting => write!(f, "reconnecting"),
                    ConnectedState::Loading => write!(f, "loading"),
                    ConnectedState::LoadFailure => write!(f, "loadFailure"),
                    ConnectedState::Loaded(loaded) => match loaded {
                        LoadedState::Pristine => write!(f, "loaded.pristine"),
                        LoadedState::Dirty => write!(f, "loaded.dirty"),
                        LoadedState::Submitting => write!(f, "loaded.submitting"),
                        LoadedState::SubmitFailure => write!(f, "loaded.submitFailure"),
                    },
                }
            }
        }
    }
}

/// Inputs to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineEvent {
    /// First subscriber arrived.
    Connect,
    /// The backend accepted the subscription (or a reconnected one).
    Welcome,
    /// Subscribing failed or the remote stream ended.
    ConnectFailed,
    /// Snapshot fetched; `dirty` when staged mutations exist for the document.
    Loaded { dirty: bool },
    LoadFailed,
    /// Transport discontinuity reported by the backend.
    Reconnect,
    /// The remote stream could not be sequenced or decoded; start over.
    OutOfSync,
    /// A local mutation touched the document.
    Mutated,
    Submit,
    Submitted { dirty: bool },
    SubmitFailed,
    /// Backoff timer fired, or the caller asked for a retry.
    Retry { manual: bool },
    /// Last subscriber left and the keep-alive window passed.
    Disconnect,
}

/// Work requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Subscribe,
    Unsubscribe,
    Fetch,
    Submit,
    /// Retry after the backoff for retry number `attempts`.
    ScheduleRetry { attempts: u32 },
    CancelRetry,
}

/// Connection state plus the retry attempt counter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Machine {
    state: ConnectionState,
    attempts: u32,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Compute the next machine and the effects of handling `event`.
    ///
    /// Events that do not apply in the current state leave it unchanged and
    /// produce no effects.
    pub fn handle(&self, event: MachineEvent) -> (Machine, Vec<Effect>) {
        use ConnectedState as C;
        use ConnectionState as S;
        use LoadedState as L;

        let attempts = self.attempts;
        let to = |state: ConnectionState, attempts: u32| Machine { state, attempts };
        let stay = || (self.clone(), Vec::new());
        let fail = |state: ConnectionState| {
            (
                to(state, attempts.saturating_add(1)),
                vec![Effect::ScheduleRetry { attempts }],
            )
        };

        match (&self.state, event) {
            (_, MachineEvent::Disconnect) => (
                to(S::Disconnected, 0),
                vec![Effect::CancelRetry, Effect::Unsubscribe],
            ),

            (S::Disconnected, MachineEvent::Connect) => {
                (to(S::Connecting, 0), vec![Effect::Subscribe])
            }
            (S::Disconnected, _) => stay(),

            (S::Connecting, MachineEvent::Welcome) => {
                (to(S::Connected(C::Loading), 0), vec![Effect::Fetch])
            }
            (S::Connecting, MachineEvent::ConnectFailed) => fail(S::ConnectFailure),
            (S::Connecting, _) => stay(),

            (S::ConnectFailure, MachineEvent::Retry { manual }) => (
                to(S::Connecting, if manual { 0 } else { attempts }),
                retry_effects(manual, Effect::Subscribe),
            ),
            (S::ConnectFailure, _) => stay(),

            (S::Connected(_), MachineEvent::ConnectFailed) => fail(S::ConnectFailure),
            (S::Connected(_), MachineEvent::OutOfSync) => (
                to(S::Connecting, attempts),
                vec![Effect::CancelRetry, Effect::Unsubscribe, Effect::Subscribe],
            ),
            (S::Connected(_), MachineEvent::Reconnect) => (
                to(S::Connected(C::Reconnecting), attempts),
                vec![Effect::CancelRetry],
            ),

            (S::Connected(C::Reconnecting), MachineEvent::Welcome) => {
                (to(S::Connected(C::Loading), attempts), vec![Effect::Fetch])
            }
            (S::Connected(C::Reconnecting), _) => stay(),

            (S::Connected(C::Loading), MachineEvent::Loaded { dirty }) => {
                let loaded = if dirty { L::Dirty } else { L::Pristine };
                (to(S::Connected(C::Loaded(loaded)), 0), Vec::new())
            }
            (S::Connected(C::Loading), MachineEvent::LoadFailed) => {
                fail(S::Connected(C::LoadFailure))
            }
            (S::Connected(C::Loading), _) => stay(),

            (S::Connected(C::LoadFailure), MachineEvent::Retry { manual }) => (
                to(S::Connected(C::Loading), if manual { 0 } else { attempts }),
                retry_effects(manual, Effect::Fetch),
            ),
            (S::Connected(C::LoadFailure), _) => stay(),

            (S::Connected(C::Loaded(loaded)), event) => match (loaded, event) {
                (L::Pristine, MachineEvent::Mutated) => {
                    (to(S::Connected(C::Loaded(L::Dirty)), attempts), Vec::new())
                }
                (L::Pristine | L::Dirty | L::SubmitFailure, MachineEvent::Submit) => (
                    to(S::Connected(C::Loaded(L::Submitting)), attempts),
                    vec![Effect::CancelRetry],
                ),
                (L::Submitting, MachineEvent::Submitted { dirty }) => {
                    let loaded = if dirty { L::Dirty } else { L::Pristine };
                    (to(S::Connected(C::Loaded(loaded)), 0), Vec::new())
                }
                (L::Submitting, MachineEvent::SubmitFailed) => {
                    fail(S::Connected(C::Loaded(L::SubmitFailure)))
                }
                (L::SubmitFailure, MachineEvent::Retry { manual }) => (
                    to(
                        S::Connected(C::Loaded(L::Submitting)),
                        if manual { 0 } else { attempts },
                    ),
                    retry_effects(manual, Effect::Submit),
                ),
                _ => stay(),
            },
        }
    }
}

fn retry_effects(manual: bool, effect: Effect) -> Vec<Effect> {
    if manual {
        vec![Effect::CancelRetry, effect]
    } else {
        vec![effect]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: impl IntoIterator<Item = MachineEvent>) -> (Machine, Vec<Effect>) {
        let mut machine = Machine::new();
        let mut effects = Vec::new();
        for event in events {
            let (next, fx) = machine.handle(event);
            machine = next;
            effects = fx;
        }
        (machine, effects)
    }

    fn loaded(state: LoadedState) -> ConnectionState {
        ConnectionState::Connected(ConnectedState::Loaded(state))
    }

    #[test]
    fn test_happy_path() {
        let (machine, effects) = run([MachineEvent::Connect]);
        assert_eq!(machine.state(), &ConnectionState::Connecting);
        assert_eq!(effects, vec![Effect::Subscribe]);

        let (machine, effects) = run([MachineEvent::Connect, MachineEvent::Welcome]);
        assert_eq!(
            machine.state(),
            &ConnectionState::Connected(ConnectedState::Loading)
        );
        assert_eq!(effects, vec![Effect::Fetch]);

        let (machine, _) = run([
            MachineEvent::Connect,
            MachineEvent::Welcome,
            MachineEvent::Loaded { dirty: false },
            MachineEvent::Mutated,
            MachineEvent::Submit,
            MachineEvent::Submitted { dirty: false },
        ]);
        assert_eq!(machine.state(), &loaded(LoadedState::Pristine));
    }

    #[test]
    fn test_connect_failure_backs_off() {
        let (machine, effects) = run([MachineEvent::Connect, MachineEvent::ConnectFailed]);
        assert_eq!(machine.state(), &ConnectionState::ConnectFailure);
        assert_eq!(effects, vec![Effect::ScheduleRetry { attempts: 0 }]);

        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::ConnectFailed,
            MachineEvent::Retry { manual: false },
            MachineEvent::ConnectFailed,
        ]);
        assert_eq!(machine.attempts(), 2);
        assert_eq!(effects, vec![Effect::ScheduleRetry { attempts: 1 }]);
    }

    #[test]
    fn test_manual_retry_resets_attempts() {
        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::ConnectFailed,
            MachineEvent::Retry { manual: false },
            MachineEvent::ConnectFailed,
            MachineEvent::Retry { manual: true },
        ]);
        assert_eq!(machine.attempts(), 0);
        assert_eq!(effects, vec![Effect::CancelRetry, Effect::Subscribe]);
    }

    #[test]
    fn test_success_resets_attempts() {
        let (machine, _) = run([
            MachineEvent::Connect,
            MachineEvent::Welcome,
            MachineEvent::LoadFailed,
            MachineEvent::Retry { manual: false },
            MachineEvent::Loaded { dirty: true },
        ]);
        assert_eq!(machine.attempts(), 0);
        assert_eq!(machine.state(), &loaded(LoadedState::Dirty));
    }

    #[test]
    fn test_submit_failure_retries_submit() {
        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::Welcome,
            MachineEvent::Loaded { dirty: true },
            MachineEvent::Submit,
            MachineEvent::SubmitFailed,
        ]);
        assert_eq!(machine.state(), &loaded(LoadedState::SubmitFailure));
        assert_eq!(effects, vec![Effect::ScheduleRetry { attempts: 0 }]);
        assert!(machine.state().is_failure());

        let (machine, effects) = machine.handle(MachineEvent::Retry { manual: false });
        assert_eq!(machine.state(), &loaded(LoadedState::Submitting));
        assert_eq!(effects, vec![Effect::Submit]);
    }

    #[test]
    fn test_reconnect_requires_welcome() {
        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::Welcome,
            MachineEvent::Loaded { dirty: false },
            MachineEvent::Reconnect,
        ]);
        assert_eq!(
            machine.state(),
            &ConnectionState::Connected(ConnectedState::Reconnecting)
        );
        assert_eq!(effects, vec![Effect::CancelRetry]);

        let (same, effects) = machine.handle(MachineEvent::Loaded { dirty: false });
        assert_eq!(same, machine);
        assert!(effects.is_empty());

        let (machine, effects) = machine.handle(MachineEvent::Welcome);
        assert_eq!(
            machine.state(),
            &ConnectionState::Connected(ConnectedState::Loading)
        );
        assert_eq!(effects, vec![Effect::Fetch]);
    }

    #[test]
    fn test_out_of_sync_resubscribes() {
        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::Welcome,
            MachineEvent::Loaded { dirty: false },
            MachineEvent::OutOfSync,
        ]);
        assert_eq!(machine.state(), &ConnectionState::Connecting);
        assert_eq!(
            effects,
            vec![Effect::CancelRetry, Effect::Unsubscribe, Effect::Subscribe]
        );
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        let (machine, effects) = run([
            MachineEvent::Connect,
            MachineEvent::ConnectFailed,
            MachineEvent::Disconnect,
        ]);
        assert_eq!(machine, Machine::new());
        assert_eq!(effects, vec![Effect::CancelRetry, Effect::Unsubscribe]);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            loaded(LoadedState::SubmitFailure).to_string(),
            "connected.loaded.submitFailure"
        );
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
