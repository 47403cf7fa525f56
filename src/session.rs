//! A console session: the message log and connection state for one console,
//! bound to a transport for its whole lifetime.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConsoleConfig, ReconnectConfig};
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::message_log::{display_time, EntryKind, MessageLog};
use crate::transport::{InboundReceiver, LinkStatus, Transport};

/// Outcome of one connection attempt. Only the caller that moved the machine
/// to `Connected` sees `Established`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    Established,
    AlreadyConnected,
    Failed,
}

pub struct ConsoleSession {
    id: Uuid,
    log: MessageLog,
    connection: ConnectionStateMachine,
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl ConsoleSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        console: &ConsoleConfig,
        reconnect: ReconnectConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            log: MessageLog::new(console.max_entries),
            connection: ConnectionStateMachine::new(),
            transport,
            reconnect,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn connection(&self) -> &ConnectionStateMachine {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.current()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn clear(&self) {
        self.log.clear();
    }

    /// Acquires the transport and starts the background tasks. Returns whether
    /// the first connection attempt succeeded; on failure the reconnect policy
    /// takes over.
    pub async fn start(self: &Arc<Self>) -> bool {
        info!(session = %self.id, transport = self.transport.name(), "starting console session");

        if let Some(inbound) = self.transport.take_inbound() {
            self.tasks.spawn(Arc::clone(self).pump_inbound(inbound));
        }

        // Subscribe before connecting so the first link change is not missed.
        let link = self.transport.link_events();
        let attempt = self.connect_once().await;
        self.tasks.spawn(Arc::clone(self).supervise(link));
        attempt != Attempt::Failed
    }

    /// Manual reconnect, e.g. from the panel. No-op unless disconnected.
    pub async fn reconnect_now(&self) -> bool {
        if self.connection.is_connected() {
            return true;
        }
        match self.connect_once().await {
            Attempt::Established => {
                self.log.append(EntryKind::Success, "Reconnected to server");
                true
            }
            Attempt::AlreadyConnected => true,
            Attempt::Failed => false,
        }
    }

    /// Cancels background work, waits for it, and releases the transport.
    pub async fn shutdown(&self) {
        info!(session = %self.id, "shutting down console session");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.transport.close().await;
        self.connection.reset();
    }

    async fn connect_once(&self) -> Attempt {
        if self.connection.begin_connect().is_err() {
            return if self.connection.is_connected() {
                Attempt::AlreadyConnected
            } else {
                Attempt::Failed
            };
        }
        match self.transport.connect().await {
            Ok(()) => {
                if self.connection.established().is_err() {
                    return Attempt::Failed;
                }
                info!(session = %self.id, "console connected");
                Attempt::Established
            }
            Err(e) => {
                let _ = self.connection.failed();
                warn!(session = %self.id, "console connection failed: {}", e);
                self.log
                    .append(EntryKind::Warning, format!("Connection to server failed: {e}"));
                Attempt::Failed
            }
        }
    }

    async fn pump_inbound(self: Arc<Self>, mut inbound: InboundReceiver) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = inbound.recv() => message,
            };
            let Some(message) = message else { break };
            let timestamp = message.timestamp.unwrap_or_else(display_time);
            self.log.append_stamped(message.kind, message.message, timestamp);
        }
    }

    async fn supervise(self: Arc<Self>, mut link: watch::Receiver<LinkStatus>) {
        let mut state = self.connection.subscribe();
        loop {
            if !self.connection.is_connected() && !self.reconnect_with_backoff().await {
                // Out of attempts: idle until a manual reconnect succeeds.
                let reconnected = async {
                    state
                        .wait_for(|s| *s == ConnectionState::Connected)
                        .await
                        .is_ok()
                };
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    ok = reconnected => {
                        if !ok {
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                changed = link.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            let status = *link.borrow_and_update();
            if status == LinkStatus::Down && self.connection.lost().is_ok() {
                warn!(session = %self.id, "console connection lost");
                self.log.append(EntryKind::Warning, "Connection lost");
            }
        }
    }

    async fn reconnect_with_backoff(&self) -> bool {
        let mut attempt = 0;
        while self.reconnect.allows_attempt(attempt) {
            let delay = self.reconnect.backoff(attempt);
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
            info!(session = %self.id, attempt, "reconnecting console");
            match self.connect_once().await {
                Attempt::Established => {
                    self.log.append(EntryKind::Success, "Reconnected to server");
                    return true;
                }
                Attempt::AlreadyConnected => return true,
                Attempt::Failed => {}
            }
        }
        if self.reconnect.enabled {
            self.log.append(
                EntryKind::Error,
                format!("Giving up after {attempt} reconnect attempts"),
            );
        }
        false
    }
}
