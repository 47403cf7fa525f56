//! Connection lifecycle of a console session.
//!
//! The only way from `Disconnected` to `Connected` is through `Connecting`.
//! The machine has no terminal state and may cycle for as long as the session
//! lives.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal connection transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

const HISTORY_LIMIT: usize = 32;

pub struct ConnectionStateMachine {
    state: watch::Sender<ConnectionState>,
    history: Mutex<VecDeque<ConnectionState>>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// States entered so far, oldest first. Watchers may coalesce quick
    /// transitions; this does not.
    pub fn history(&self) -> Vec<ConnectionState> {
        self.history.lock().iter().copied().collect()
    }

    pub fn begin_connect(&self) -> Result<(), TransitionError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
    }

    pub fn established(&self) -> Result<(), TransitionError> {
        self.transition(ConnectionState::Connecting, ConnectionState::Connected)
    }

    pub fn failed(&self) -> Result<(), TransitionError> {
        self.transition(ConnectionState::Connecting, ConnectionState::Disconnected)
    }

    pub fn lost(&self) -> Result<(), TransitionError> {
        self.transition(ConnectionState::Connected, ConnectionState::Disconnected)
    }

    /// Forces `Disconnected` from any state, used on teardown.
    pub fn reset(&self) {
        let changed = self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        if changed {
            self.record(ConnectionState::Disconnected);
        }
    }

    fn record(&self, state: ConnectionState) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(state);
    }

    fn transition(
        &self,
        expected: ConnectionState,
        next: ConnectionState,
    ) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state != expected {
                result = Err(TransitionError { from: *state, to: next });
                return false;
            }
            *state = next;
            true
        });
        if result.is_ok() {
            self.record(next);
            tracing::debug!(from = %expected, to = %next, "console connection transition");
        }
        result
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
