//! WebSocket client for a game server's console endpoint.
//!
//! Commands go out as raw text frames. Everything the server pushes back is
//! decoded as [`ServerMessage`] and handed to the session's inbound pump, so a
//! command "succeeds" once its frame is flushed.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{InboundReceiver, LinkStatus, ServerMessage, Transport, TransportError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct RemoteTransport {
    url: String,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    link: Arc<watch::Sender<LinkStatus>>,
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    inbound_rx: Mutex<Option<InboundReceiver>>,
}

impl RemoteTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (link, _) = watch::channel(LinkStatus::Down);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            link: Arc::new(link),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!(url = %self.url, "console stream connected");

        let (sink, mut source) = stream.split();
        *self.sink.lock().await = Some(sink);

        // The previous reader must be gone before the link goes up, and the link
        // must be up before the new reader can report it down.
        let previous = self.reader.lock().take();
        if let Some(handle) = previous {
            handle.abort();
            let _ = handle.await;
        }
        self.link.send_replace(LinkStatus::Up);

        let link = self.link.clone();
        let inbound = self.inbound_tx.clone();
        let url = self.url.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound.send(ServerMessage::from_frame(&text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(?reason, "console stream closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %url, "console stream error: {}", e);
                        break;
                    }
                }
            }
            link.send_replace(LinkStatus::Down);
        });
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    async fn send(&self, command: &str) -> Result<String, TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = sink.send(Message::text(command)).await {
            *guard = None;
            self.link.send_replace(LinkStatus::Down);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(format!("Command delivered: {command}"))
    }

    fn link_events(&self) -> watch::Receiver<LinkStatus> {
        self.link.subscribe()
    }

    fn take_inbound(&self) -> Option<InboundReceiver> {
        self.inbound_rx.lock().take()
    }

    async fn close(&self) {
        self.stop_reader();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.link.send_replace(LinkStatus::Down);
    }
}

impl Drop for RemoteTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
