//! In-process stand-in for the game server: acknowledges every command after a
//! delay and reports itself connected.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{InboundReceiver, LinkStatus, ServerMessage, Transport, TransportError};
use crate::message_log::EntryKind;

pub struct MockTransport {
    delay: Duration,
    jitter: Duration,
    scripted_delays: Mutex<VecDeque<Duration>>,
    banner: Vec<ServerMessage>,
    link: watch::Sender<LinkStatus>,
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    inbound_rx: Mutex<Option<InboundReceiver>>,
    failing_connects: AtomicU32,
    failing_sends: AtomicBool,
    banner_sent: AtomicBool,
    connects: AtomicU32,
    sent: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        let (link, _) = watch::channel(LinkStatus::Down);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            delay,
            jitter: Duration::ZERO,
            scripted_delays: Mutex::new(VecDeque::new()),
            banner: Vec::new(),
            link,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            failing_connects: AtomicU32::new(0),
            failing_sends: AtomicBool::new(false),
            banner_sent: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Randomizes each response delay uniformly in `[delay, delay + jitter]`.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Per-call delays consumed in send order before falling back to the
    /// configured delay.
    pub fn with_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.scripted_delays.lock().extend(delays);
        self
    }

    /// Startup lines streamed once, on the first successful connect.
    pub fn with_boot_banner(mut self, world: &str) -> Self {
        self.banner = vec![
            ServerMessage::new(EntryKind::Info, "Starting MinePanel Server v1.0.0..."),
            ServerMessage::new(EntryKind::Info, format!("Loading world \"{world}\"...")),
            ServerMessage::new(EntryKind::Success, "Server started on port 25565"),
            ServerMessage::new(EntryKind::Warning, "Can't keep up! Is the server overloaded?"),
        ];
        self
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing_sends.store(failing, Ordering::SeqCst);
    }

    /// Simulates the remote end going away.
    pub fn drop_link(&self) {
        self.link.send_replace(LinkStatus::Down);
    }

    /// Pushes a line as if the server had printed it.
    pub fn emit(&self, message: ServerMessage) {
        let _ = self.inbound_tx.send(message);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn next_delay(&self) -> Duration {
        if let Some(delay) = self.scripted_delays.lock().pop_front() {
            return delay;
        }
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::ConnectFailed("mock connect refused".to_string()));
        }

        self.link.send_replace(LinkStatus::Up);
        // Refused attempts do not consume the banner.
        if !self.banner_sent.swap(true, Ordering::SeqCst) {
            for line in &self.banner {
                self.emit(line.clone());
            }
        }
        Ok(())
    }

    async fn send(&self, command: &str) -> Result<String, TransportError> {
        if *self.link.borrow() == LinkStatus::Down {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(command.to_string());

        let delay = self.next_delay();
        tokio::time::sleep(delay).await;

        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock delivery failure".to_string()));
        }
        Ok(format!("Command executed: {command}"))
    }

    fn link_events(&self) -> watch::Receiver<LinkStatus> {
        self.link.subscribe()
    }

    fn take_inbound(&self) -> Option<InboundReceiver> {
        self.inbound_rx.lock().take()
    }

    async fn close(&self) {
        self.link.send_replace(LinkStatus::Down);
    }
}
