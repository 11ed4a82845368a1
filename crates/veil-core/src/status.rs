use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the fixed logical roles in the protocol.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartyId {
    /// Sealing side ("Server A").
    A,
    /// Processing side ("Server B").
    B,
}

impl PartyId {
    pub const ALL: [PartyId; 2] = [PartyId::A, PartyId::B];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::A => "Server A",
            Self::B => "Server B",
        }
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(format!("unknown party: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyState {
    Online,
    Offline,
    Busy,
}

impl fmt::Display for PartyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Liveness record for one party. Exactly one exists per `party_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub party_id: PartyId,
    pub state: PartyState,
    pub last_heartbeat: DateTime<Utc>,
    pub listen_port: u16,
}

impl ConnectionStatus {
    pub fn new(party_id: PartyId, state: PartyState, listen_port: u16) -> Self {
        Self {
            party_id,
            state,
            last_heartbeat: Utc::now(),
            listen_port,
        }
    }
}
