use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::messages::{Kind, SealedPayload};
use crate::status::{ConnectionStatus, PartyId, PartyState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessagePayload {
    pub kind: Kind,
    pub sealed_payload: SealedPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResultPayload {
    pub verdict: bool,
    pub evaluation_duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusPayload {
    pub party_id: PartyId,
    pub state: PartyState,
    pub listen_port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryPayload {
    pub party_id: PartyId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events the hub sends to observers.
///
/// `Error` is only ever addressed to a single observer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HubEvent {
    EncryptedMessage(EncryptedMessagePayload),
    ProcessingResult(ProcessingResultPayload),
    ServerStatus(ServerStatusPayload),
    LogEntry(LogEntryPayload),
    Error(ErrorPayload),
}

impl HubEvent {
    pub fn log(party_id: PartyId, level: LogLevel, message: impl Into<String>) -> Self {
        Self::LogEntry(LogEntryPayload {
            party_id,
            message: message.into(),
            timestamp: Utc::now(),
            level,
        })
    }

    pub fn status(status: &ConnectionStatus) -> Self {
        Self::ServerStatus(ServerStatusPayload {
            party_id: status.party_id,
            state: status.state,
            listen_port: status.listen_port,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EncryptedMessage(_) => "encrypted_message",
            Self::ProcessingResult(_) => "processing_result",
            Self::ServerStatus(_) => "server_status",
            Self::LogEntry(_) => "log_entry",
            Self::Error(_) => "error",
        }
    }

    /// The party an event concerns, when it concerns exactly one.
    pub fn party_id(&self) -> Option<PartyId> {
        match self {
            Self::ServerStatus(p) => Some(p.party_id),
            Self::LogEntry(p) => Some(p.party_id),
            Self::EncryptedMessage(_) => Some(PartyId::A),
            Self::ProcessingResult(_) => Some(PartyId::B),
            Self::Error(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub kind: Kind,
}

/// Events observers may send to the hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    EncryptMessage(EncryptRequest),
}

/// Loose envelope used to tell a bad kind apart from a bad frame.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientEvent {
    /// Validate an inbound frame.
    ///
    /// A well-formed `encrypt_message` carrying an unknown kind fails with
    /// `InvalidKind`; anything else that does not match the schema fails
    /// with `MalformedEvent`.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let envelope: RawEnvelope = serde_json::from_str(raw)
            .map_err(|e| RelayError::MalformedEvent(e.to_string()))?;

        match envelope.event_type.as_str() {
            "encrypt_message" => {
                let kind = envelope
                    .payload
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .ok_or_else(|| {
                        RelayError::MalformedEvent("encrypt_message requires payload.kind".into())
                    })?;
                Ok(Self::EncryptMessage(EncryptRequest { kind: kind.parse()? }))
            }
            other => Err(RelayError::MalformedEvent(format!(
                "unsupported event type: {other}"
            ))),
        }
    }

    pub fn encrypt(kind: Kind) -> Self {
        Self::EncryptMessage(EncryptRequest { kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_event_wire_shape() {
        let event = HubEvent::log(PartyId::A, LogLevel::Success, "done");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "log_entry");
        assert_eq!(json["payload"]["partyId"], "A");
        assert_eq!(json["payload"]["level"], "success");
        assert_eq!(json["payload"]["message"], "done");
        assert!(json["payload"]["timestamp"].is_string());
    }

    #[test]
    fn processing_result_wire_shape() {
        let event = HubEvent::ProcessingResult(ProcessingResultPayload {
            verdict: true,
            evaluation_duration_ms: 812,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "processing_result");
        assert_eq!(json["payload"]["verdict"], true);
        assert_eq!(json["payload"]["evaluationDurationMs"], 812);
    }

    #[test]
    fn status_event_from_record() {
        let status = ConnectionStatus::new(PartyId::B, PartyState::Busy, 5000);
        let event = HubEvent::status(&status);
        assert_eq!(event.event_type(), "server_status");
        assert_eq!(event.party_id(), Some(PartyId::B));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["state"], "busy");
    }

    #[test]
    fn hub_event_parses_back() {
        let raw = r#"{"type":"error","payload":{"message":"nope"}}"#;
        let event: HubEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, HubEvent::error("nope"));
    }

    #[test]
    fn client_event_parses_encrypt_request() {
        let raw = r#"{"type":"encrypt_message","payload":{"kind":"A2"}}"#;
        assert_eq!(ClientEvent::parse(raw).unwrap(), ClientEvent::encrypt(Kind::A2));
    }

    #[test]
    fn client_event_rejects_unknown_kind() {
        let raw = r#"{"type":"encrypt_message","payload":{"kind":"A9"}}"#;
        let err = ClientEvent::parse(raw).unwrap_err();
        assert!(matches!(err, RelayError::InvalidKind(ref k) if k == "A9"));
    }

    #[test]
    fn client_event_rejects_malformed_frames() {
        for raw in [
            "not json",
            r#"{"payload":{"kind":"A1"}}"#,
            r#"{"type":"encrypt_message"}"#,
            r#"{"type":"encrypt_message","payload":{"kind":1}}"#,
            r#"{"type":"log_entry","payload":{}}"#,
        ] {
            let err = ClientEvent::parse(raw).unwrap_err();
            assert!(matches!(err, RelayError::MalformedEvent(_)), "{raw}: {err:?}");
        }
    }

    #[test]
    fn client_event_serializes_to_parseable_frame() {
        let frame = serde_json::to_string(&ClientEvent::encrypt(Kind::A1)).unwrap();
        assert_eq!(frame, r#"{"type":"encrypt_message","payload":{"kind":"A1"}}"#);
        assert_eq!(ClientEvent::parse(&frame).unwrap(), ClientEvent::encrypt(Kind::A1));
    }
}
