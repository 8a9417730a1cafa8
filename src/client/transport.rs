//! WebSocket transport for the client
//!
//! Reader and writer tasks only move frames; all game logic stays in the
//! frame loop, which drains staged events with [`ClientTransport::try_next`].

use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::ws::protocol::{ClientMsg, ServerMsg};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Outbound channel full")]
    Backpressure,

    #[error("Transport closed")]
    Closed,
}

/// Something the reader task observed
#[derive(Debug)]
pub enum TransportEvent {
    Message(ServerMsg, Instant),
    Closed,
}

pub struct ClientTransport {
    outbound_tx: mpsc::Sender<String>,
    inbound_rx: mpsc::Receiver<TransportEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientTransport {
    pub async fn connect(url: &str, capacity: usize) -> Result<Self, TransportError> {
        let (socket, _) = connect_async(url).await?;
        info!(url = %url, "Connected to server");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMsg>(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(TransportEvent::Message(msg, Instant::now())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to parse server message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed).await;
        });

        Ok(Self {
            outbound_tx,
            inbound_rx,
            reader,
            writer,
        })
    }

    /// Queue a message without waiting
    pub fn send(&self, msg: &ClientMsg) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)?;
        self.outbound_tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Next staged event, if any
    pub fn try_next(&mut self) -> Option<TransportEvent> {
        match self.inbound_rx.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(TransportEvent::Closed),
        }
    }

    /// Wait for the next event
    pub async fn next(&mut self) -> TransportEvent {
        self.inbound_rx.recv().await.unwrap_or(TransportEvent::Closed)
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
