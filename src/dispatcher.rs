//! Turns console input into log entries and transport deliveries.
//!
//! Every failure ends as a log entry; nothing here returns an error to the
//! caller.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::{ConsoleConfig, DispatchPolicy};
use crate::message_log::EntryKind;
use crate::session::ConsoleSession;
use crate::transport::TransportError;

pub const NOT_CONNECTED_WARNING: &str = "Command not delivered: server is not connected";

/// What `submit` did with a piece of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Submission {
    /// Blank input, nothing was logged.
    Ignored,
    /// Echoed, then refused locally because the session is not connected.
    Rejected { echo_id: u64 },
    /// Echoed and handed to the transport; the result is logged later.
    Dispatched { echo_id: u64 },
}

pub struct CommandDispatcher {
    session: Arc<ConsoleSession>,
    policy: DispatchPolicy,
    timeout: Duration,
    echo_prefix: String,
    in_flight: TaskTracker,
    // Completion signal of the last queued command, used by the serial policy.
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl CommandDispatcher {
    pub fn new(session: Arc<ConsoleSession>, config: &ConsoleConfig) -> Self {
        Self {
            session,
            policy: config.dispatch,
            timeout: config.command_timeout(),
            echo_prefix: config.echo_prefix.clone(),
            in_flight: TaskTracker::new(),
            tail: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<ConsoleSession> {
        &self.session
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn submit(&self, raw: &str) -> Submission {
        if raw.trim().is_empty() {
            return Submission::Ignored;
        }

        let log = self.session.log();
        let echo = log.append(EntryKind::Info, format!("{}{}", self.echo_prefix, raw));

        if !self.session.connection().is_connected() {
            debug!(command = raw, "console command rejected, not connected");
            log.append(EntryKind::Warning, NOT_CONNECTED_WARNING);
            return Submission::Rejected { echo_id: echo.id() };
        }

        debug!(command = raw, policy = ?self.policy, "dispatching console command");
        let session = Arc::clone(&self.session);
        let command = raw.to_string();
        let timeout = self.timeout;

        match self.policy {
            DispatchPolicy::Concurrent => {
                self.spawn(deliver(session, command, timeout));
            }
            DispatchPolicy::Serial => {
                let (done_tx, done_rx) = oneshot::channel();
                let previous = self.tail.lock().replace(done_rx);
                self.spawn(async move {
                    if let Some(previous) = previous {
                        // An aborted predecessor drops its sender, which also releases us.
                        let _ = previous.await;
                    }
                    // The link may have dropped while this command waited its turn.
                    if session.connection().is_connected() {
                        deliver(session, command, timeout).await;
                    } else {
                        debug!(command = %command, "queued console command dropped, not connected");
                        session.log().append(EntryKind::Warning, NOT_CONNECTED_WARNING);
                    }
                    let _ = done_tx.send(());
                });
            }
        }

        Submission::Dispatched { echo_id: echo.id() }
    }

    /// Waits until every command submitted so far has been resolved.
    pub async fn drain(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Tracked twice: here for `drain`, and by the session so shutdown waits too.
        let task = self.session.tasks().track_future(task);
        self.in_flight.spawn(task);
    }
}

async fn deliver(session: Arc<ConsoleSession>, command: String, timeout: Duration) {
    let outcome = tokio::select! {
        _ = session.shutdown_token().cancelled() => Err(TransportError::Closed),
        result = tokio::time::timeout(timeout, session.transport().send(&command)) => {
            result.unwrap_or(Err(TransportError::TimedOut(timeout)))
        }
    };

    let log = session.log();
    match outcome {
        Ok(response) => {
            log.append(EntryKind::Success, response);
        }
        Err(e) => {
            debug!(command = %command, "console command failed: {}", e);
            log.append(EntryKind::Error, format!("Command failed: {e}"));
        }
    }
}
