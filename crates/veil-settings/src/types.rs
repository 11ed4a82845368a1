//! Settings types. Every section deserializes with `#[serde(default)]` so a
//! partial user file only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VeilSettings {
    pub server: ServerSettings,
    pub parties: PartySettings,
    pub pipeline: PipelineSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

impl VeilSettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.evaluation_latency_min_ms > engine.evaluation_latency_max_ms {
            return Err(SettingsError::invalid(
                "engine.evaluationLatencyMinMs",
                format!(
                    "{} exceeds evaluationLatencyMaxMs ({})",
                    engine.evaluation_latency_min_ms, engine.evaluation_latency_max_ms
                ),
            ));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::invalid("server.maxSendQueue", "must be at least 1"));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::invalid(
                "server.heartbeatIntervalSecs",
                "must be at least 1",
            ));
        }
        if self.parties.sealing_port == self.parties.processing_port {
            return Err(SettingsError::invalid(
                "parties.processingPort",
                "must differ from parties.sealingPort",
            ));
        }
        let pipeline = &self.pipeline;
        let delays_enabled = pipeline.sealing_delay_ms > 0 || pipeline.transmission_delay_ms > 0;
        if delays_enabled && pipeline.transmission_delay_ms >= pipeline.sealing_delay_ms {
            return Err(SettingsError::invalid(
                "pipeline.transmissionDelayMs",
                format!(
                    "{} must be shorter than sealingDelayMs ({})",
                    pipeline.transmission_delay_ms, pipeline.sealing_delay_ms
                ),
            ));
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Per-observer outbound queue length before the observer is dropped.
    pub max_send_queue: usize,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Informational ports reported for each party.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartySettings {
    pub sealing_port: u16,
    pub processing_port: u16,
}

impl Default for PartySettings {
    fn default() -> Self {
        Self {
            sealing_port: 3000,
            processing_port: 5000,
        }
    }
}

/// Deliberate delays between relay stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub sealing_delay_ms: u64,
    pub transmission_delay_ms: u64,
    pub evaluation_gap_ms: u64,
}

impl PipelineSettings {
    pub fn sealing_delay(&self) -> Duration {
        Duration::from_millis(self.sealing_delay_ms)
    }

    pub fn transmission_delay(&self) -> Duration {
        Duration::from_millis(self.transmission_delay_ms)
    }

    pub fn evaluation_gap(&self) -> Duration {
        Duration::from_millis(self.evaluation_gap_ms)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sealing_delay_ms: 800,
            transmission_delay_ms: 500,
            evaluation_gap_ms: 1000,
        }
    }
}

/// Simulated engine tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub evaluation_latency_min_ms: u64,
    pub evaluation_latency_max_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout_ms: Option<u64>,
}

impl EngineSettings {
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluation_latency_min_ms: 500,
            evaluation_latency_max_ms: 1500,
            evaluation_timeout_ms: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
