use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use veil_core::{ClientEvent, HubEvent};

use crate::error::ClientError;
use crate::subscribers::Subscribers;

const OUTBOUND_QUEUE: usize = 64;

/// WebSocket connection to a relay hub.
///
/// Every inbound `HubEvent` is dispatched to the shared [`Subscribers`]; a
/// frame that does not parse is logged and skipped.
pub struct ObserverClient {
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
    /// `None` once the reader has been seen to finish.
    reader: Option<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl ObserverClient {
    pub async fn connect(url: &str, subscribers: Subscribers) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        tracing::info!(url, "connected to hub");

        let (mut sink, mut stream) = ws.split();
        let connected = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let writer_connected = Arc::clone(&connected);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "hub write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_connected.store(false, Ordering::Relaxed);
        });

        let reader_connected = Arc::clone(&connected);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<HubEvent>(&text) {
                        Ok(event) => {
                            let _ = subscribers.dispatch(&event);
                        }
                        Err(e) => tracing::warn!(error = %e, "skipping unparseable hub frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "hub read failed");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::Relaxed);
            tracing::info!("hub connection closed");
        });

        Ok(Self {
            outbound,
            connected,
            reader: Some(reader),
            writer,
        })
    }

    pub async fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Closed);
        }
        let json = serde_json::to_string(event)?;
        self.outbound
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ClientError::Send(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Wait until the hub ends the connection. Returns at once if it
    /// already has.
    pub async fn closed(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            let _ = reader.await;
            self.reader = None;
        }
    }

    /// Send a close frame and stop both tasks.
    pub async fn close(self) -> Result<(), ClientError> {
        let sent = self.outbound.send(Message::Close(None)).await;
        drop(self.outbound);
        let _ = self.writer.await;
        if let Some(reader) = self.reader {
            reader.abort();
        }
        self.connected.store(false, Ordering::Relaxed);
        sent.map_err(|_| ClientError::Closed)
    }
}
