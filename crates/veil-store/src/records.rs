use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

use veil_core::{ConnectionStatus, Evaluation, Kind, Message, PartyId, SealedPayload};

use crate::error::StoreError;

/// Fields supplied when a sealed message is first recorded.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub kind: Kind,
    pub sealed_payload: SealedPayload,
    pub created_at: DateTime<Utc>,
}

/// Partial update. `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct MessageUpdate {
    pub delivered_at: Option<DateTime<Utc>>,
    pub evaluation: Option<Evaluation>,
    pub failure: Option<String>,
}

impl MessageUpdate {
    pub fn delivered(at: DateTime<Utc>) -> Self {
        Self {
            delivered_at: Some(at),
            ..Self::default()
        }
    }

    pub fn evaluated(evaluation: Evaluation) -> Self {
        Self {
            evaluation: Some(evaluation),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delivered_at.is_none() && self.evaluation.is_none() && self.failure.is_none()
    }
}

struct Messages {
    by_id: HashMap<u64, Message>,
    next_id: u64,
}

/// In-memory message and party-status records.
///
/// Every operation runs inside a single critical section, so a lookup
/// followed by a write is atomic with respect to other callers. Records
/// live for the lifetime of the process.
pub struct RecordStore {
    messages: Mutex<Messages>,
    statuses: RwLock<BTreeMap<PartyId, ConnectionStatus>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Messages {
                by_id: HashMap::new(),
                next_id: 1,
            }),
            statuses: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record a freshly sealed message and return a copy with its id.
    #[instrument(skip(self, new), fields(kind = %new.kind))]
    pub fn create(&self, new: NewMessage) -> Message {
        let mut guard = self.messages.lock();
        let id = guard.next_id;
        guard.next_id += 1;

        let message = Message {
            id,
            kind: new.kind,
            sealed_payload: new.sealed_payload,
            created_at: new.created_at,
            delivered_at: None,
            verdict: None,
            evaluation_duration_ms: None,
            failure: None,
        };
        let _ = guard.by_id.insert(id, message.clone());
        debug!(message_id = id, "message recorded");
        message
    }

    /// Merge the provided fields into message `id`.
    ///
    /// The whole update is checked before anything is written; a rejected
    /// update leaves the record exactly as it was.
    #[instrument(skip(self, update), fields(message_id = id))]
    pub fn update(&self, id: u64, update: MessageUpdate) -> Result<Message, StoreError> {
        let mut guard = self.messages.lock();
        let current = guard.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if update.is_empty() {
            return Ok(current.clone());
        }
        check_update(current, &update)?;

        if let Some(at) = update.delivered_at {
            current.delivered_at = Some(at);
        }
        if let Some(evaluation) = update.evaluation {
            current.verdict = Some(evaluation.verdict);
            current.evaluation_duration_ms = Some(evaluation.duration_ms);
        }
        if let Some(reason) = update.failure {
            current.failure = Some(reason);
        }
        debug!(
            delivered = current.delivered_at.is_some(),
            evaluated = current.verdict.is_some(),
            failed = current.failure.is_some(),
            "message updated"
        );
        Ok(current.clone())
    }

    pub fn get(&self, id: u64) -> Result<Message, StoreError> {
        self.messages
            .lock()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Snapshot of every message, newest first. Equal timestamps fall back
    /// to descending id.
    pub fn all(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.messages.lock().by_id.values().cloned().collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages
    }

    pub fn len(&self) -> usize {
        self.messages.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the status for `status.party_id`.
    #[instrument(skip(self, status), fields(party = %status.party_id, state = %status.state))]
    pub fn upsert_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        let _ = self.statuses.write().insert(status.party_id, status.clone());
        status
    }

    pub fn status(&self, party: PartyId) -> Option<ConnectionStatus> {
        self.statuses.read().get(&party).cloned()
    }

    /// All known statuses, `A` before `B`.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.read().values().cloned().collect()
    }
}

fn check_update(current: &Message, update: &MessageUpdate) -> Result<(), StoreError> {
    if current.is_terminal() {
        return Err(StoreError::Conflict(format!(
            "message {} is terminal",
            current.id
        )));
    }

    if let Some(at) = update.delivered_at {
        if current.delivered_at.is_some() {
            return Err(StoreError::Conflict(format!(
                "message {} already delivered",
                current.id
            )));
        }
        if at < current.created_at {
            return Err(StoreError::Conflict(format!(
                "message {} delivery precedes creation",
                current.id
            )));
        }
    }

    if update.evaluation.is_some() {
        if current.delivered_at.is_none() && update.delivered_at.is_none() {
            return Err(StoreError::Conflict(format!(
                "message {} evaluated before delivery",
                current.id
            )));
        }
        if update.failure.is_some() {
            return Err(StoreError::Conflict(format!(
                "message {} cannot carry both a verdict and a failure",
                current.id
            )));
        }
    }

    Ok(())
}
