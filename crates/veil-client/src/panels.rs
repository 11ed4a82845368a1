use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use veil_core::events::{
    EncryptedMessagePayload, LogEntryPayload, ProcessingResultPayload, ServerStatusPayload,
};
use veil_core::{HubEvent, Kind, PartyId};

use crate::subscribers::{Subscribers, Subscription};

/// Entries kept by a party log panel.
pub const DEFAULT_TRAILING: usize = 10;

/// Bounded FIFO that discards the oldest entry once full.
#[derive(Clone, Debug)]
pub struct TrailingLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> TrailingLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for TrailingLog<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TRAILING)
    }
}

#[derive(Default)]
struct PartyView {
    entries: TrailingLog<LogEntryPayload>,
    status: Option<ServerStatusPayload>,
}

/// Recent activity of one party: its last log entries and latest status.
pub struct PartyLogPanel {
    party: PartyId,
    view: Mutex<PartyView>,
}

impl PartyLogPanel {
    pub fn new(party: PartyId) -> Arc<Self> {
        Arc::new(Self {
            party,
            view: Mutex::new(PartyView::default()),
        })
    }

    /// Register this panel under `panel:<party>`.
    pub fn attach(self: &Arc<Self>, subscribers: &Subscribers) -> Subscription {
        let panel = Arc::clone(self);
        subscribers.register(format!("panel:{}", self.party), move |event| panel.handle(event))
    }

    pub fn handle(&self, event: &HubEvent) -> anyhow::Result<()> {
        if event.party_id() != Some(self.party) {
            return Ok(());
        }
        match event {
            HubEvent::LogEntry(entry) => self.view.lock().entries.push(entry.clone()),
            HubEvent::ServerStatus(status) => self.view.lock().status = Some(status.clone()),
            _ => {}
        }
        Ok(())
    }

    pub fn party(&self) -> PartyId {
        self.party
    }

    pub fn entries(&self) -> Vec<LogEntryPayload> {
        self.view.lock().entries.iter().cloned().collect()
    }

    pub fn status(&self) -> Option<ServerStatusPayload> {
        self.view.lock().status.clone()
    }

    pub fn render(&self) -> String {
        let view = self.view.lock();
        let state = view
            .status
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |s| format!("{} :{}", s.state, s.listen_port));
        let mut out = format!("== {} [{}] ==\n", self.party.display_name(), state);
        for entry in view.entries.iter() {
            out.push_str(&format!(
                "{} {:<7} {}\n",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.level.to_string(),
                entry.message
            ));
        }
        out
    }
}

#[derive(Default)]
struct ProcessingView {
    last_sent: Option<Kind>,
    last_result: Option<ProcessingResultPayload>,
    sent: u64,
    completed: u64,
}

/// Latest transmission and verdict, plus running totals.
#[derive(Default)]
pub struct ProcessingPanel {
    view: Mutex<ProcessingView>,
}

impl ProcessingPanel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(self: &Arc<Self>, subscribers: &Subscribers) -> Subscription {
        let panel = Arc::clone(self);
        subscribers.register("panel:processing", move |event| panel.handle(event))
    }

    pub fn handle(&self, event: &HubEvent) -> anyhow::Result<()> {
        let mut view = self.view.lock();
        match event {
            HubEvent::EncryptedMessage(EncryptedMessagePayload { kind, .. }) => {
                view.last_sent = Some(*kind);
                view.sent += 1;
            }
            HubEvent::ProcessingResult(result) => {
                view.last_result = Some(result.clone());
                view.completed += 1;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn last_result(&self) -> Option<ProcessingResultPayload> {
        self.view.lock().last_result.clone()
    }

    pub fn last_sent(&self) -> Option<Kind> {
        self.view.lock().last_sent
    }

    /// `(sent, completed)`.
    pub fn totals(&self) -> (u64, u64) {
        let view = self.view.lock();
        (view.sent, view.completed)
    }

    pub fn render(&self) -> String {
        let view = self.view.lock();
        let last = match &view.last_result {
            Some(r) => format!("verdict={} in {}ms", r.verdict, r.evaluation_duration_ms),
            None => "no result yet".to_string(),
        };
        format!(
            "== Processing == sent={} completed={} last_sent={} {}\n",
            view.sent,
            view.completed,
            view.last_sent.map_or("-", Kind::as_str),
            last
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use veil_core::{ConnectionStatus, LogLevel, PartyState, SealedPayload};

    use super::*;

    #[test]
    fn trailing_log_keeps_last_n() {
        let mut log = TrailingLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(log.latest(), Some(&4));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn trailing_log_default_capacity() {
        let mut log = TrailingLog::default();
        for i in 0..25 {
            log.push(i);
        }
        assert_eq!(log.capacity(), DEFAULT_TRAILING);
        assert_eq!(log.len(), 10);
        assert_eq!(log.iter().next(), Some(&15));
    }

    #[test]
    fn zero_capacity_stays_empty() {
        let mut log = TrailingLog::new(0);
        log.push("x");
        assert!(log.is_empty());
    }

    #[test]
    fn party_panel_filters_by_party() {
        let subs = Subscribers::new();
        let panel_a = PartyLogPanel::new(PartyId::A);
        let _sub = panel_a.attach(&subs);

        for i in 0..12 {
            subs.dispatch(&HubEvent::log(PartyId::A, LogLevel::Info, format!("a{i}")));
        }
        subs.dispatch(&HubEvent::log(PartyId::B, LogLevel::Info, "b"));
        subs.dispatch(&HubEvent::status(&ConnectionStatus::new(
            PartyId::A,
            PartyState::Busy,
            3000,
        )));

        let entries = panel_a.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].message, "a2");
        assert_eq!(entries[9].message, "a11");
        assert_eq!(panel_a.status().unwrap().state, PartyState::Busy);
        assert!(panel_a.render().contains("Server A [busy :3000]"));
    }

    #[test]
    fn processing_panel_tracks_latest_result() {
        let subs = Subscribers::new();
        let panel = ProcessingPanel::new();
        let _sub = panel.attach(&subs);

        subs.dispatch(&HubEvent::EncryptedMessage(EncryptedMessagePayload {
            kind: Kind::A2,
            sealed_payload: SealedPayload::new("{}"),
            timestamp: Utc::now(),
        }));
        subs.dispatch(&HubEvent::ProcessingResult(ProcessingResultPayload {
            verdict: false,
            evaluation_duration_ms: 742,
            timestamp: Utc::now(),
        }));

        assert_eq!(panel.last_sent(), Some(Kind::A2));
        assert_eq!(panel.totals(), (1, 1));
        let result = panel.last_result().unwrap();
        assert!(!result.verdict);
        assert!(panel.render().contains("verdict=false in 742ms"));
    }
}
