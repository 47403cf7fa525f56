//! Append-only console history shared by the dispatcher and the renderer.

use chrono::Local;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Severity of a console line. Wire names follow the streaming log format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Info,
    #[serde(rename = "warn", alias = "warning")]
    Warning,
    Error,
    Success,
}

/// One immutable line of console history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsoleEntry {
    id: u64,
    timestamp: String,
    text: String,
    kind: EntryKind,
}

impl ConsoleEntry {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }
}

/// Wall-clock time in the console's `HH:MM:SS` display format.
pub fn display_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Notification sent to observers after every mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "entry", rename_all = "lowercase")]
pub enum LogEvent {
    Appended(ConsoleEntry),
    Cleared,
}

/// Ordered, read-only view of the log at one point in time.
pub type Snapshot = Arc<[ConsoleEntry]>;

struct LogInner {
    entries: VecDeque<ConsoleEntry>,
    next_id: u64,
}

pub struct MessageLog {
    inner: RwLock<LogInner>,
    max_entries: usize,
    events: broadcast::Sender<LogEvent>,
}

impl MessageLog {
    /// `max_entries == 0` keeps every entry for the lifetime of the log.
    pub fn new(max_entries: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(LogInner {
                entries: VecDeque::new(),
                next_id: 1,
            }),
            max_entries,
            events,
        }
    }

    pub fn append(&self, kind: EntryKind, text: impl Into<String>) -> ConsoleEntry {
        self.append_stamped(kind, text, display_time())
    }

    /// Appends an entry that carries its own display timestamp, e.g. a line
    /// streamed from the game server.
    pub fn append_stamped(
        &self,
        kind: EntryKind,
        text: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> ConsoleEntry {
        let mut inner = self.inner.write();
        let entry = ConsoleEntry {
            id: inner.next_id,
            timestamp: timestamp.into(),
            text: text.into(),
            kind,
        };
        inner.next_id += 1;

        if self.max_entries > 0 {
            while inner.entries.len() >= self.max_entries {
                inner.entries.pop_front();
            }
        }
        inner.entries.push_back(entry.clone());

        // Sent under the lock so observers see events in append order.
        let _ = self.events.send(LogEvent::Appended(entry.clone()));
        entry
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        let _ = self.events.send(LogEvent::Cleared);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().entries.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        (self.max_entries > 0).then_some(self.max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.iter().map(|e| e.text()).collect()
    }

    #[test]
    fn snapshot_preserves_append_order() {
        let log = MessageLog::new(0);
        for i in 0..20 {
            log.append(EntryKind::Info, format!("line {i}"));
        }
        let snapshot = log.snapshot();
        let expected: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
        assert_eq!(texts(&snapshot), expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(snapshot.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn clear_always_yields_empty_snapshot() {
        let log = MessageLog::new(0);
        assert!(log.snapshot().is_empty());
        log.clear();
        assert!(log.snapshot().is_empty());

        log.append(EntryKind::Error, "boom");
        log.append(EntryKind::Success, "ok");
        log.clear();
        assert!(log.snapshot().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn ids_are_not_reused_after_clear() {
        let log = MessageLog::new(0);
        let first = log.append(EntryKind::Info, "a");
        log.clear();
        let second = log.append(EntryKind::Info, "b");
        assert!(second.id() > first.id());
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let log = MessageLog::new(0);
        log.append(EntryKind::Info, "before");
        let snapshot = log.snapshot();
        log.append(EntryKind::Info, "after");
        assert_eq!(texts(&snapshot), vec!["before"]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn bounded_log_evicts_oldest_first() {
        let log = MessageLog::new(3);
        for i in 0..5 {
            log.append(EntryKind::Info, format!("{i}"));
        }
        assert_eq!(texts(&log.snapshot()), vec!["2", "3", "4"]);
        assert_eq!(log.capacity(), Some(3));
        assert_eq!(MessageLog::new(0).capacity(), None);
    }

    #[test]
    fn stamped_entries_keep_their_timestamp() {
        let log = MessageLog::new(0);
        let entry = log.append_stamped(EntryKind::Warning, "lagging", "12:35:12");
        assert_eq!(entry.timestamp(), "12:35:12");
        assert_eq!(entry.kind(), EntryKind::Warning);
    }

    #[test]
    fn generated_timestamps_use_clock_format() {
        let log = MessageLog::new(0);
        let entry = log.append(EntryKind::Info, "x");
        let parts: Vec<&str> = entry.timestamp().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit())));
    }

    #[tokio::test]
    async fn observers_receive_events_in_order() {
        let log = MessageLog::new(0);
        let mut rx = log.subscribe();
        log.append(EntryKind::Info, "one");
        log.clear();
        log.append(EntryKind::Success, "two");

        match rx.recv().await.unwrap() {
            LogEvent::Appended(entry) => assert_eq!(entry.text(), "one"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), LogEvent::Cleared);
        match rx.recv().await.unwrap() {
            LogEvent::Appended(entry) => assert_eq!(entry.kind(), EntryKind::Success),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn kind_uses_streaming_wire_names() {
        assert_eq!(serde_json::to_string(&EntryKind::Warning).unwrap(), "\"warn\"");
        let parsed: EntryKind = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(parsed, EntryKind::Warning);
        let parsed: EntryKind = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(parsed, EntryKind::Success);
    }
}
