//! Relay metrics.
//!
//! The relay tracks a fixed set of series, so counters and gauges are enum
//! keys rather than free-form names. Label values are `&'static str` taken
//! from the relay's own enums (kind, stage, rejection reason).

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Evaluation durations kept for percentiles.
const EVALUATION_WINDOW: usize = 1024;

/// Monotonic relay counters. Variants with a field carry its one label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    /// Accepted submissions, by kind.
    Submitted(&'static str),
    Completed,
    /// Failed runs, by the stage that failed.
    Failed(&'static str),
    /// Observers dropped because their queue was full or closed.
    BroadcastDrops,
    /// Inbound frames answered with an `error` event, by reason.
    InboundRejected(&'static str),
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Self::Submitted(_) => "relay_submitted_total",
            Self::Completed => "relay_completed_total",
            Self::Failed(_) => "relay_failed_total",
            Self::BroadcastDrops => "hub_broadcast_drops_total",
            Self::InboundRejected(_) => "hub_inbound_rejected_total",
        }
    }

    fn label(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Submitted(kind) => Some(("kind", kind)),
            Self::Failed(stage) => Some(("stage", stage)),
            Self::InboundRejected(reason) => Some(("reason", reason)),
            Self::Completed | Self::BroadcastDrops => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gauge {
    /// Pipelines between submission and verdict or failure.
    InFlight,
    /// Connected observers.
    Observers,
}

impl Gauge {
    pub fn name(self) -> &'static str {
        match self {
            Self::InFlight => "relay_in_flight",
            Self::Observers => "hub_observers",
        }
    }
}

/// Name of the evaluation duration histogram in snapshots.
pub const EVALUATION_MS: &str = "relay_evaluation_ms";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One series at the time of a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<EvaluationSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<MetricSample>,
}

/// Evaluation durations in milliseconds over the recent window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl EvaluationSummary {
    fn from_window(window: &VecDeque<u64>) -> Self {
        let mut sorted: Vec<u64> = window.iter().copied().collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_unstable();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        Self {
            count: count as u64,
            sum: sorted.iter().sum(),
            min: sorted[0],
            max: sorted[count - 1],
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

#[derive(Default)]
struct Series {
    counters: BTreeMap<Counter, u64>,
    gauges: BTreeMap<Gauge, i64>,
    evaluation_ms: VecDeque<u64>,
}

/// Thread-safe recorder shared by the hub and the orchestrator.
#[derive(Default)]
pub struct MetricsRecorder {
    series: Mutex<Series>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        *self.series.lock().counters.entry(counter).or_insert(0) += 1;
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.series.lock().counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn gauge_set(&self, gauge: Gauge, value: i64) {
        let _ = self.series.lock().gauges.insert(gauge, value);
    }

    pub fn gauge_add(&self, gauge: Gauge, delta: i64) {
        *self.series.lock().gauges.entry(gauge).or_insert(0) += delta;
    }

    pub fn gauge(&self, gauge: Gauge) -> i64 {
        self.series.lock().gauges.get(&gauge).copied().unwrap_or(0)
    }

    pub fn observe_evaluation(&self, duration_ms: u64) {
        let mut series = self.series.lock();
        if series.evaluation_ms.len() == EVALUATION_WINDOW {
            let _ = series.evaluation_ms.pop_front();
        }
        series.evaluation_ms.push_back(duration_ms);
    }

    pub fn evaluation_summary(&self) -> EvaluationSummary {
        EvaluationSummary::from_window(&self.series.lock().evaluation_ms)
    }

    /// Every recorded series, sorted by name then labels.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let series = self.series.lock();
        let mut samples = Vec::new();

        for (counter, value) in &series.counters {
            samples.push(MetricSample {
                name: counter.name().to_string(),
                labels: counter
                    .label()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .into_iter()
                    .collect(),
                metric_type: MetricType::Counter,
                value: *value as f64,
                summary: None,
            });
        }
        for (gauge, value) in &series.gauges {
            samples.push(MetricSample {
                name: gauge.name().to_string(),
                labels: BTreeMap::new(),
                metric_type: MetricType::Gauge,
                value: *value as f64,
                summary: None,
            });
        }
        if !series.evaluation_ms.is_empty() {
            let summary = EvaluationSummary::from_window(&series.evaluation_ms);
            samples.push(MetricSample {
                name: EVALUATION_MS.to_string(),
                labels: BTreeMap::new(),
                metric_type: MetricType::Histogram,
                value: summary.p50 as f64,
                summary: Some(summary),
            });
        }
        drop(series);

        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        MetricsSnapshot {
            timestamp: Utc::now(),
            samples,
        }
    }
}
