//! Placeholder sealing engine.
//!
//! The ciphertext is real ChaCha20-Poly1305 output, but evaluation reads an
//! engine-keyed tag rather than computing homomorphically. Only this module
//! knows how to turn a payload back into a [`Kind`].

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use veil_core::{Kind, SealedPayload};

use crate::engine::{EvaluationOutcome, KeyMaterialInfo, SealEngine};
use crate::error::EngineError;

const PUBLIC_KEY_LEN: usize = 256;
const PRIVATE_KEY_LEN: usize = 256;
const EVAL_KEY_LEN: usize = 512;
const NONCE_LEN: usize = 12;
const NOISE_LEN: usize = 64;
const KEY_HINT_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub evaluation_latency_min: Duration,
    pub evaluation_latency_max: Duration,
    /// Upper bound on a single evaluation. `None` waits indefinitely.
    pub evaluation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_latency_min: Duration::from_millis(500),
            evaluation_latency_max: Duration::from_millis(1500),
            evaluation_timeout: None,
        }
    }
}

impl EngineConfig {
    /// No simulated latency.
    pub fn instant() -> Self {
        Self {
            evaluation_latency_min: Duration::ZERO,
            evaluation_latency_max: Duration::ZERO,
            evaluation_timeout: None,
        }
    }
}

/// Wire layout of a sealed payload.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ciphertext: String,
    nonce: String,
    noise: String,
    timestamp: String,
    key_hint: String,
    tag: String,
}

pub struct SimulatedEngine {
    config: EngineConfig,
    /// Hex-encoded, as the sizes in [`KeyMaterialInfo`] are measured on it.
    public_key: String,
    private_key: String,
    eval_key: String,
}

impl SimulatedEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            public_key: random_hex(PUBLIC_KEY_LEN),
            private_key: random_hex(PRIVATE_KEY_LEN),
            eval_key: random_hex(EVAL_KEY_LEN),
        }
    }

    /// Verdict the engine yields for `kind`: `A1` is true, `A2` false.
    pub fn expected_verdict(kind: Kind) -> bool {
        matches!(kind, Kind::A1)
    }

    /// Decrypt a payload sealed by this engine. Verification only; the relay
    /// never calls this.
    pub fn open(&self, payload: &SealedPayload) -> Result<Kind, EngineError> {
        let envelope = parse_envelope(payload)?;
        let nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| EngineError::MalformedPayload(format!("nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(EngineError::MalformedPayload("nonce length".into()));
        }
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| EngineError::MalformedPayload(format!("ciphertext: {e}")))?;

        let cipher = self.cipher_for(&envelope.timestamp);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| EngineError::MalformedPayload("decryption failed".into()))?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| EngineError::MalformedPayload("plaintext is not utf-8".into()))?;
        text.parse()
            .map_err(|_| EngineError::MalformedPayload(format!("unknown plaintext: {text}")))
    }

    fn cipher_for(&self, timestamp: &str) -> ChaCha20Poly1305 {
        let mut hasher = Sha256::new();
        hasher.update(self.public_key.as_bytes());
        hasher.update(timestamp.as_bytes());
        let digest = hasher.finalize();
        ChaCha20Poly1305::new(Key::from_slice(digest.as_slice()))
    }

    fn tag_for(&self, nonce_b64: &str, kind: Kind) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.eval_key.as_bytes());
        hasher.update(nonce_b64.as_bytes());
        hasher.update(kind.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn recover_kind(&self, envelope: &Envelope) -> Result<Kind, EngineError> {
        Kind::ALL
            .into_iter()
            .find(|kind| self.tag_for(&envelope.nonce, *kind) == envelope.tag)
            .ok_or_else(|| EngineError::MalformedPayload("tag does not match this engine".into()))
    }

    fn draw_latency(&self) -> Duration {
        let min = self.config.evaluation_latency_min;
        let max = self.config.evaluation_latency_max;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl SealEngine for SimulatedEngine {
    #[instrument(skip(self, kind), fields(kind = %kind))]
    async fn seal(&self, kind: Kind) -> Result<SealedPayload, EngineError> {
        let timestamp = Utc::now().timestamp_millis().to_string();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher_for(&timestamp)
            .encrypt(Nonce::from_slice(&nonce), kind.as_str().as_bytes())
            .map_err(|_| EngineError::SealFailed("encryption failed".into()))?;

        let nonce_b64 = BASE64.encode(nonce);
        let envelope = Envelope {
            ciphertext: BASE64.encode(&ciphertext),
            tag: self.tag_for(&nonce_b64, kind),
            nonce: nonce_b64,
            noise: random_hex(NOISE_LEN),
            timestamp,
            key_hint: self.public_key[..KEY_HINT_LEN].to_string(),
        };

        let raw = serde_json::to_string(&envelope)
            .map_err(|e| EngineError::SealFailed(e.to_string()))?;
        debug!(bytes = raw.len(), "payload sealed");
        Ok(SealedPayload::new(raw))
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn evaluate(&self, payload: &SealedPayload) -> Result<EvaluationOutcome, EngineError> {
        let started = tokio::time::Instant::now();
        let envelope = parse_envelope(payload)?;
        let verdict = Self::expected_verdict(self.recover_kind(&envelope)?);

        let circuit = tokio::time::sleep(self.draw_latency());
        match self.config.evaluation_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, circuit).await.is_err() {
                    warn!(?limit, "evaluation timed out");
                    return Err(EngineError::EvaluationTimeout(limit));
                }
            }
            None => circuit.await,
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(verdict, duration_ms, "evaluation complete");
        Ok(EvaluationOutcome {
            verdict,
            duration_ms,
        })
    }

    fn key_material_info(&self) -> KeyMaterialInfo {
        KeyMaterialInfo {
            public_key_size: (self.public_key.len() * 4) as u32,
            private_key_size: (self.private_key.len() * 4) as u32,
            eval_key_size: (self.eval_key.len() * 4) as u32,
            security_level: 128,
            scheme: "Simulated TFHE".to_string(),
        }
    }
}

fn parse_envelope(payload: &SealedPayload) -> Result<Envelope, EngineError> {
    serde_json::from_str(payload.as_str()).map_err(|e| EngineError::MalformedPayload(e.to_string()))
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
