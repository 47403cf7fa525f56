//! The channel a console session uses to reach the game server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::message_log::EntryKind;

pub mod mock;
pub mod remote;

pub use mock::MockTransport;
pub use remote::RemoteTransport;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport closed")]
    Closed,
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Link status reported by the transport, independent of in-flight sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

/// A log line pushed by the game server over the streaming endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ServerMessage {
    pub fn new(kind: EntryKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            timestamp: None,
        }
    }

    /// Decodes one text frame; anything that is not the JSON shape is kept as
    /// a plain info line.
    pub fn from_frame(frame: &str) -> Self {
        serde_json::from_str(frame).unwrap_or_else(|_| Self::new(EntryKind::Info, frame))
    }
}

pub type InboundReceiver = mpsc::UnboundedReceiver<ServerMessage>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Establishes the link. Called again by the session on reconnect.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Delivers one command and yields the response text.
    async fn send(&self, command: &str) -> Result<String, TransportError>;

    fn link_events(&self) -> watch::Receiver<LinkStatus>;

    /// Server-pushed log lines. Only the first caller gets the receiver.
    fn take_inbound(&self) -> Option<InboundReceiver>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_streaming_json_frames() {
        let msg = ServerMessage::from_frame(
            r#"{"message":"Server started on port 25565","type":"success","timestamp":"12:30:10"}"#,
        );
        assert_eq!(msg.kind, EntryKind::Success);
        assert_eq!(msg.message, "Server started on port 25565");
        assert_eq!(msg.timestamp.as_deref(), Some("12:30:10"));
    }

    #[test]
    fn timestamp_is_optional() {
        let msg = ServerMessage::from_frame(r#"{"message":"lag","type":"warn"}"#);
        assert_eq!(msg.kind, EntryKind::Warning);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn raw_frames_become_info_lines() {
        let msg = ServerMessage::from_frame("[Server thread/INFO]: Done (3.2s)!");
        assert_eq!(msg.kind, EntryKind::Info);
        assert_eq!(msg.message, "[Server thread/INFO]: Done (3.2s)!");
    }

    #[test]
    fn timeout_error_reports_millis() {
        let err = TransportError::TimedOut(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1500ms");
    }
}
