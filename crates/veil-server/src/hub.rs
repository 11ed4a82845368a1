use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Interval;

use veil_core::{ClientEvent, ConnectionStatus, HubEvent, LogLevel, ObserverId, PartyId, PartyState};
use veil_store::RecordStore;
use veil_telemetry::{Counter, Gauge, MetricsRecorder};

/// Outbound frame as shared between observer queues. Serialized once per
/// broadcast.
pub type Frame = Arc<str>;

struct Observer {
    tx: mpsc::Sender<Frame>,
    connected_at: DateTime<Utc>,
}

/// Fan-out point between the relay pipeline and connected observers.
///
/// Each observer owns a bounded queue. A queue that is full or closed at
/// broadcast time gets its observer dropped; the broadcast itself never
/// fails and never waits.
pub struct ObserverHub {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_observer: AtomicU64,
    store: Arc<RecordStore>,
    metrics: Arc<MetricsRecorder>,
    max_send_queue: usize,
}

impl ObserverHub {
    pub fn new(store: Arc<RecordStore>, metrics: Arc<MetricsRecorder>, max_send_queue: usize) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
            store,
            metrics,
            // Room for the status snapshot at minimum.
            max_send_queue: max_send_queue.max(PartyId::ALL.len()),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    /// Register an observer. Its queue already holds one `server_status`
    /// per known party when this returns, ahead of anything broadcast later.
    pub fn connect(&self) -> (ObserverId, mpsc::Receiver<Frame>) {
        let id = ObserverId::new(self.next_observer.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.max_send_queue);

        let count = {
            let mut observers = self.observers.write();
            for status in self.store.statuses() {
                if let Some(frame) = encode(&HubEvent::status(&status)) {
                    let _ = tx.try_send(frame);
                }
            }
            let _ = observers.insert(
                id,
                Observer {
                    tx,
                    connected_at: Utc::now(),
                },
            );
            observers.len()
        };

        self.metrics.gauge_set(Gauge::Observers, count as i64);
        tracing::info!(observer_id = %id, observers = count, "observer connected");
        (id, rx)
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn disconnect(&self, id: &ObserverId) {
        if let Some(observer) = self.remove(id) {
            let connected_for = Utc::now() - observer.connected_at;
            tracing::info!(
                observer_id = %id,
                connected_secs = connected_for.num_seconds(),
                "observer disconnected"
            );
        }
    }

    fn remove(&self, id: &ObserverId) -> Option<Observer> {
        let (removed, count) = {
            let mut observers = self.observers.write();
            let removed = observers.remove(id);
            (removed, observers.len())
        };
        if removed.is_some() {
            self.metrics.gauge_set(Gauge::Observers, count as i64);
        }
        removed
    }

    /// Deliver `event` to every observer. Returns how many queues accepted it.
    pub fn broadcast(&self, event: &HubEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let observers = self.observers.read();
            for (id, observer) in observers.iter() {
                match observer.tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(observer_id = %id, "send queue full, dropping observer");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }

        for id in &dropped {
            if self.remove(id).is_some() {
                self.metrics.incr(Counter::BroadcastDrops);
            }
        }

        tracing::trace!(event = event.event_type(), delivered, dropped = dropped.len(), "broadcast");
        delivered
    }

    /// Deliver `event` to one observer only.
    pub fn send_to(&self, id: &ObserverId, event: &HubEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };
        let result = match self.observers.read().get(id) {
            Some(observer) => observer.tx.try_send(frame),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(observer_id = %id, "send queue full, dropping direct event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.remove(id);
                false
            }
        }
    }

    /// Validate an inbound frame from `id`.
    ///
    /// Invalid frames are answered with an `error` event to that observer
    /// alone; the connection stays open.
    pub fn handle_inbound(&self, id: &ObserverId, raw: &str) -> Option<ClientEvent> {
        match ClientEvent::parse(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(observer_id = %id, error = %e, "rejected inbound frame");
                self.metrics.incr(Counter::InboundRejected(e.error_kind()));
                let _ = self.send_to(id, &HubEvent::error(e.to_string()));
                None
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Broadcast a `log_entry` and mirror it to the process log.
    pub fn log(&self, party: PartyId, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(party = %party, "{message}"),
            LogLevel::Success => tracing::info!(party = %party, success = true, "{message}"),
            LogLevel::Warning => tracing::warn!(party = %party, "{message}"),
            LogLevel::Error => tracing::error!(party = %party, "{message}"),
        }
        let _ = self.broadcast(&HubEvent::log(party, level, message));
    }

    /// Record `party`'s new state and announce it.
    pub fn set_party_state(&self, party: PartyId, state: PartyState) -> ConnectionStatus {
        let port = self
            .store
            .status(party)
            .map(|s| s.listen_port)
            .unwrap_or_default();
        let status = self
            .store
            .upsert_status(ConnectionStatus::new(party, state, port));
        let _ = self.broadcast(&HubEvent::status(&status));
        status
    }
}

fn encode(event: &HubEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!(event = event.event_type(), error = %e, "failed to serialize hub event");
            None
        }
    }
}

/// Drive one WebSocket: the writer drains the observer's queue and pings,
/// the reader forwards text frames to `inbound`. Either side ending
/// disconnects the observer. A zero `heartbeat` sends no pings.
pub async fn serve_connection(
    socket: WebSocket,
    observer_id: ObserverId,
    mut rx: mpsc::Receiver<Frame>,
    hub: Arc<ObserverHub>,
    inbound: mpsc::Sender<(ObserverId, String)>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = observer_id;
    let writer = tokio::spawn(async move {
        let mut ping_interval = (!heartbeat.is_zero()).then(|| tokio::time::interval(heartbeat));
        if let Some(interval) = ping_interval.as_mut() {
            interval.tick().await;
        }

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = next_ping(&mut ping_interval) => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(observer_id = %writer_id, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_id = observer_id;
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if inbound.send((reader_id, text.to_string())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    hub.disconnect(&observer_id);
}

async fn next_ping(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
