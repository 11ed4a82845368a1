//! Relay orchestrator: drives one message from request to verdict.
//!
//! Each submission runs as its own tokio task. The sealing side seals,
//! records and transmits; the processing side is spawned as a separate
//! continuation after the evaluation gap. Failures are reported at the
//! stage where they happen and freeze the record. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use veil_core::events::{EncryptedMessagePayload, ProcessingResultPayload};
use veil_core::{HubEvent, Kind, LogLevel, Message, PartyId, PartyState, RelayError, RunId};
use veil_engine::SealEngine;
use veil_store::{MessageUpdate, NewMessage, RecordStore};
use veil_telemetry::{Counter, Gauge, MetricsRecorder};

use crate::hub::ObserverHub;

/// Deliberate waits between stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDelays {
    /// Before the engine seals.
    pub sealing: Duration,
    /// Between recording and broadcasting the sealed payload.
    pub transmission: Duration,
    /// Between delivery and the start of evaluation.
    pub evaluation_gap: Duration,
}

impl Default for PipelineDelays {
    fn default() -> Self {
        Self {
            sealing: Duration::from_millis(800),
            transmission: Duration::from_millis(500),
            evaluation_gap: Duration::from_millis(1000),
        }
    }
}

impl PipelineDelays {
    pub fn zero() -> Self {
        Self {
            sealing: Duration::ZERO,
            transmission: Duration::ZERO,
            evaluation_gap: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Sealing,
    Delivery,
    Evaluation,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sealing => "sealing",
            Self::Delivery => "delivery",
            Self::Evaluation => "evaluation",
        }
    }

    fn party(self) -> PartyId {
        match self {
            Self::Sealing | Self::Delivery => PartyId::A,
            Self::Evaluation => PartyId::B,
        }
    }

    fn failure_label(self) -> &'static str {
        match self {
            Self::Sealing => "Encryption",
            Self::Delivery => "Transmission",
            Self::Evaluation => "Processing",
        }
    }
}

/// How a pipeline ended.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    Completed {
        message_id: u64,
        verdict: bool,
        duration_ms: u64,
    },
    Failed {
        /// `None` when sealing failed before a record existed.
        message_id: Option<u64>,
        stage: Stage,
        error: RelayError,
    },
}

impl PipelineOutcome {
    pub fn message_id(&self) -> Option<u64> {
        match self {
            Self::Completed { message_id, .. } => Some(*message_id),
            Self::Failed { message_id, .. } => *message_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// An accepted request. Awaiting `handle` yields the final outcome; dropping
/// it leaves the pipeline running.
pub struct Submission {
    pub run_id: RunId,
    pub handle: JoinHandle<PipelineOutcome>,
}

struct Pipeline {
    store: Arc<RecordStore>,
    hub: Arc<ObserverHub>,
    engine: Arc<dyn SealEngine>,
    delays: PipelineDelays,
    metrics: Arc<MetricsRecorder>,
}

pub struct RelayOrchestrator {
    pipeline: Arc<Pipeline>,
}

impl RelayOrchestrator {
    pub fn new(
        store: Arc<RecordStore>,
        hub: Arc<ObserverHub>,
        engine: Arc<dyn SealEngine>,
        delays: PipelineDelays,
    ) -> Self {
        let metrics = hub.metrics();
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                hub,
                engine,
                delays,
                metrics,
            }),
        }
    }

    /// Validate `kind` and start a pipeline for it.
    ///
    /// An unknown kind is rejected here with no record and no events.
    pub fn submit(&self, kind: &str) -> Result<Submission, RelayError> {
        let kind: Kind = kind.parse().inspect_err(|e| {
            tracing::debug!(error = %e, "rejected submission");
        })?;
        Ok(self.submit_kind(kind))
    }

    pub fn submit_kind(&self, kind: Kind) -> Submission {
        let run_id = RunId::new();
        self.pipeline.metrics.incr(Counter::Submitted(kind.as_str()));

        let span = tracing::info_span!("relay", run_id = %run_id, kind = %kind);
        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::spawn(pipeline.run(kind).instrument(span));
        Submission { run_id, handle }
    }
}

impl Pipeline {
    async fn run(self: Arc<Self>, kind: Kind) -> PipelineOutcome {
        self.metrics.gauge_add(Gauge::InFlight, 1);

        let outcome = match self.sealing_side(kind).await {
            Ok(message) => {
                let message_id = message.id;
                let pipeline = Arc::clone(&self);
                let evaluation = tokio::spawn(
                    async move {
                        tokio::time::sleep(pipeline.delays.evaluation_gap).await;
                        pipeline.processing_side(message).await
                    }
                    .in_current_span(),
                );
                match evaluation.await {
                    Ok(outcome) => outcome,
                    Err(e) => self.fail(
                        Stage::Evaluation,
                        Some(message_id),
                        RelayError::Engine(format!("evaluation task ended abnormally: {e}")),
                    ),
                }
            }
            Err(failed) => failed,
        };

        self.metrics.gauge_add(Gauge::InFlight, -1);
        match &outcome {
            PipelineOutcome::Completed { message_id, verdict, .. } => {
                self.metrics.incr(Counter::Completed);
                tracing::info!(message_id, verdict, "relay completed");
            }
            PipelineOutcome::Failed { message_id, stage, error } => {
                self.metrics.incr(Counter::Failed(stage.as_str()));
                tracing::warn!(?message_id, stage = stage.as_str(), error = %error, "relay failed");
            }
        }
        outcome
    }

    /// Seal, record, transmit and confirm delivery.
    async fn sealing_side(&self, kind: Kind) -> Result<Message, PipelineOutcome> {
        self.hub.log(
            PartyId::A,
            LogLevel::Info,
            format!("Starting encryption of message \"{kind}\""),
        );
        let _ = self.hub.set_party_state(PartyId::A, PartyState::Busy);
        tokio::time::sleep(self.delays.sealing).await;

        let sealed = self
            .engine
            .seal(kind)
            .await
            .map_err(|e| self.fail(Stage::Sealing, None, e.into()))?;

        let message = self.store.create(NewMessage {
            kind,
            sealed_payload: sealed,
            created_at: Utc::now(),
        });
        tracing::debug!(message_id = message.id, "sealed message recorded");
        self.hub.log(
            PartyId::A,
            LogLevel::Success,
            format!("Encryption complete for message ID {}", message.id),
        );
        self.hub.log(
            PartyId::A,
            LogLevel::Info,
            "Transmitting encrypted message to Server B",
        );
        tokio::time::sleep(self.delays.transmission).await;

        let _ = self
            .hub
            .broadcast(&HubEvent::EncryptedMessage(EncryptedMessagePayload {
                kind,
                sealed_payload: message.sealed_payload.clone(),
                timestamp: Utc::now(),
            }));
        self.hub.log(
            PartyId::A,
            LogLevel::Success,
            "Encryption and transmission cycle complete",
        );

        let delivered = self
            .store
            .update(message.id, MessageUpdate::delivered(Utc::now()))
            .map_err(|e| self.fail(Stage::Delivery, Some(message.id), e.into()))?;
        let _ = self.hub.set_party_state(PartyId::A, PartyState::Online);
        Ok(delivered)
    }

    /// Evaluate the delivered payload and publish the verdict.
    async fn processing_side(&self, message: Message) -> PipelineOutcome {
        self.hub
            .log(PartyId::B, LogLevel::Info, "Encrypted message received");
        self.hub
            .log(PartyId::B, LogLevel::Info, "Starting circuit evaluation");
        let _ = self.hub.set_party_state(PartyId::B, PartyState::Busy);

        let outcome = match self.engine.evaluate(&message.sealed_payload).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(Stage::Evaluation, Some(message.id), e.into()),
        };
        if let Err(e) = self
            .store
            .update(message.id, MessageUpdate::evaluated(outcome.into()))
        {
            return self.fail(Stage::Evaluation, Some(message.id), e.into());
        }
        self.metrics.observe_evaluation(outcome.duration_ms);

        self.hub.log(
            PartyId::B,
            LogLevel::Success,
            format!("Circuit evaluation complete in {}ms", outcome.duration_ms),
        );
        self.hub.log(
            PartyId::B,
            LogLevel::Success,
            format!("Message identified without decryption: {}", outcome.verdict),
        );
        let _ = self
            .hub
            .broadcast(&HubEvent::ProcessingResult(ProcessingResultPayload {
                verdict: outcome.verdict,
                evaluation_duration_ms: outcome.duration_ms,
                timestamp: Utc::now(),
            }));
        let _ = self.hub.set_party_state(PartyId::B, PartyState::Online);

        PipelineOutcome::Completed {
            message_id: message.id,
            verdict: outcome.verdict,
            duration_ms: outcome.duration_ms,
        }
    }

    /// Report a failure at `stage`, freeze the record, and release the party.
    fn fail(&self, stage: Stage, message_id: Option<u64>, error: RelayError) -> PipelineOutcome {
        let party = stage.party();
        self.hub.log(
            party,
            LogLevel::Error,
            format!("{} failed: {error}", stage.failure_label()),
        );
        if let Some(id) = message_id {
            if let Err(e) = self.store.update(id, MessageUpdate::failed(error.to_string())) {
                tracing::warn!(message_id = id, error = %e, "could not record failure");
            }
        }
        let _ = self.hub.set_party_state(party, PartyState::Online);
        PipelineOutcome::Failed {
            message_id,
            stage,
            error,
        }
    }
}
