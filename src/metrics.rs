//! Observability sink for token expiry series.
//!
//! Scans write through the [`ObservabilitySink`] trait. The production
//! implementation is [`PrometheusSink`], which owns a private registry that
//! the `/metrics` handler encodes. [`MemorySink`] keeps the same upsert/reset
//! semantics in a map so tests can inspect what a cycle emitted.

use prometheus::{Encoder, Gauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::gitlab::ResourceKind;

pub const DAYS_UNTIL_EXPIRE: &str = "gl_days_until_expire";

const TOKEN_LABELS: [&str; 6] = [
    "name",
    "project_name",
    "url_to_repo",
    "id",
    "last_used",
    "root_token",
];

/// One gauge sample: a token and its remaining validity in days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityRecord {
    pub token_name: String,
    pub owner_name: String,
    pub owner_url: String,
    pub token_id: String,
    pub last_used: String,
    pub is_root: bool,
    pub days_until_expire: i64,
}

impl ObservabilityRecord {
    /// Label values in [`TOKEN_LABELS`] order. This tuple is the series key.
    pub fn label_values(&self) -> [&str; 6] {
        [
            &self.token_name,
            &self.owner_name,
            &self.owner_url,
            &self.token_id,
            &self.last_used,
            if self.is_root { "true" } else { "false" },
        ]
    }
}

/// Destination for scan results.
///
/// `upsert` is keyed by the full label tuple; writing the same tuple twice
/// keeps the last value. Implementations must tolerate concurrent calls from
/// scanner workers.
pub trait ObservabilitySink: Send + Sync {
    /// Drop every token series. Called once at the start of a cycle.
    fn reset(&self);

    fn upsert(&self, record: &ObservabilityRecord);

    /// Number of resources of `kind` processed in the last cycle.
    fn record_scanned(&self, _kind: ResourceKind, _count: usize) {}

    fn record_cycle_duration(&self, _elapsed: Duration) {}
}

// ── Prometheus ────────────────────────────────────────────────

pub struct PrometheusSink {
    registry: Registry,
    days_until_expire: IntGaugeVec,
    scanned_resources: IntGaugeVec,
    last_cycle_seconds: Gauge,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let days_until_expire = IntGaugeVec::new(
            Opts::new(
                DAYS_UNTIL_EXPIRE,
                "Count days until expire Gitlab project access token",
            ),
            &TOKEN_LABELS,
        )?;
        let scanned_resources = IntGaugeVec::new(
            Opts::new(
                "gl_scanned_resources",
                "Resources whose access tokens were inspected in the last cycle",
            ),
            &["resource_kind"],
        )?;
        let last_cycle_seconds = Gauge::with_opts(Opts::new(
            "gl_scan_last_duration_seconds",
            "Wall time of the last completed scan cycle",
        ))?;

        registry.register(Box::new(days_until_expire.clone()))?;
        registry.register(Box::new(scanned_resources.clone()))?;
        registry.register(Box::new(last_cycle_seconds.clone()))?;

        Ok(Self {
            registry,
            days_until_expire,
            scanned_resources,
            last_cycle_seconds,
        })
    }

    /// Encode the registry in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl ObservabilitySink for PrometheusSink {
    fn reset(&self) {
        tracing::info!("reset token metrics");
        self.days_until_expire.reset();
    }

    fn upsert(&self, record: &ObservabilityRecord) {
        self.days_until_expire
            .with_label_values(&record.label_values())
            .set(record.days_until_expire);
        tracing::debug!(
            token_id = %record.token_id,
            owner = %record.owner_name,
            days = record.days_until_expire,
            "updated token metric"
        );
    }

    fn record_scanned(&self, kind: ResourceKind, count: usize) {
        self.scanned_resources
            .with_label_values(&[kind.as_str()])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn record_cycle_duration(&self, elapsed: Duration) {
        self.last_cycle_seconds.set(elapsed.as_secs_f64());
    }
}

// ── In-memory ─────────────────────────────────────────────────

/// Map-backed sink used by tests and the one-shot `scan` command.
#[derive(Debug, Default)]
pub struct MemorySink {
    series: Mutex<HashMap<Vec<String>, ObservabilityRecord>>,
    scanned: Mutex<HashMap<ResourceKind, usize>>,
    resets: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current series, sorted by token name then ID.
    pub fn records(&self) -> Vec<ObservabilityRecord> {
        let mut out: Vec<ObservabilityRecord> = match self.series.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        out.sort_by(|a, b| {
            a.token_name
                .cmp(&b.token_name)
                .then_with(|| a.token_id.cmp(&b.token_id))
        });
        out
    }

    pub fn reset_count(&self) -> usize {
        self.resets.lock().map(|g| *g).unwrap_or(0)
    }

    pub fn scanned(&self, kind: ResourceKind) -> Option<usize> {
        self.scanned.lock().ok().and_then(|g| g.get(&kind).copied())
    }
}

impl ObservabilitySink for MemorySink {
    fn reset(&self) {
        if let Ok(mut guard) = self.series.lock() {
            guard.clear();
        }
        if let Ok(mut guard) = self.resets.lock() {
            *guard += 1;
        }
    }

    fn upsert(&self, record: &ObservabilityRecord) {
        let key = record.label_values().iter().map(|s| s.to_string()).collect();
        if let Ok(mut guard) = self.series.lock() {
            guard.insert(key, record.clone());
        }
    }

    fn record_scanned(&self, kind: ResourceKind, count: usize) {
        if let Ok(mut guard) = self.scanned.lock() {
            guard.insert(kind, count);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
