use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// The closed set of message classifications a requester may submit.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    A1,
    A2,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::A1, Kind::A2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A1" => Ok(Self::A1),
            "A2" => Ok(Self::A2),
            other => Err(RelayError::InvalidKind(other.to_string())),
        }
    }
}

/// Opaque output of the sealing engine.
///
/// Nothing outside the engine interprets the contents; the relay only
/// stores it, broadcasts it, and hands it back for evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedPayload(String);

impl SealedPayload {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Verdict and measured duration, always recorded as a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub verdict: bool,
    pub duration_ms: u64,
}

/// A relayed message record as held by the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub kind: Kind,
    pub sealed_payload: SealedPayload,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub verdict: Option<bool>,
    pub evaluation_duration_ms: Option<u64>,
    /// Set when the pipeline abandoned this message short of completion.
    pub failure: Option<String>,
}

impl Message {
    /// No field may change once a verdict or a failure is recorded.
    pub fn is_terminal(&self) -> bool {
        self.verdict.is_some() || self.failure.is_some()
    }
}
