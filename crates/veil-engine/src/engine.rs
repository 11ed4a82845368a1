use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use veil_core::{Evaluation, Kind, SealedPayload};

use crate::error::EngineError;

/// Result of evaluating a sealed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub verdict: bool,
    /// Measured wall-clock time of the evaluation.
    pub duration_ms: u64,
}

impl From<EvaluationOutcome> for Evaluation {
    fn from(o: EvaluationOutcome) -> Self {
        Evaluation {
            verdict: o.verdict,
            duration_ms: o.duration_ms,
        }
    }
}

/// Static description of the engine's key material, for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterialInfo {
    pub public_key_size: u32,
    pub private_key_size: u32,
    pub eval_key_size: u32,
    pub security_level: u32,
    pub scheme: String,
}

/// The seal/evaluate pair the relay is built around.
///
/// `seal` output is opaque to everyone but the engine that produced it.
/// `evaluate` must derive the verdict from the payload alone.
#[async_trait]
pub trait SealEngine: Send + Sync {
    async fn seal(&self, kind: Kind) -> Result<SealedPayload, EngineError>;

    async fn evaluate(&self, payload: &SealedPayload) -> Result<EvaluationOutcome, EngineError>;

    fn key_material_info(&self) -> KeyMaterialInfo;
}
