//! Result sink: metrics and structured logs for every completed run.
//!
//! The sink is observability only. Content changes were already persisted by
//! the runner through the command executor.

use std::sync::Arc;
use std::time::Duration;

use prometheus::proto::Metric;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit::{build_audit_event, AuditSink, MirrorPhase, SkipReason};
use super::{MirrorError, MirrorResult, MirrorStatus};

/// Upper bounds (seconds) of the run duration histogram buckets.
pub const DURATION_BUCKETS_SECS: [f64; 7] = [0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0];

/// Metrics backend keyed by mirror and status.
pub trait MetricsSink: Send + Sync {
    /// Count one completed run and its duration.
    fn record_result(&self, mirror: &str, status: MirrorStatus, elapsed: Duration);

    /// Count one skipped tick.
    fn record_skip(&self, _mirror: &str, _reason: SkipReason) {}

    /// Count one failed registry read.
    fn record_enumeration_failure(&self, _project: &str) {}
}

/// Prometheus metrics for mirror runs, registered in their own [`Registry`].
///
/// | Metric | Labels |
/// |--------|--------|
/// | `mirror_runs_total` | `mirror`, `status` |
/// | `mirror_run_duration_seconds` | `mirror`, `status` |
/// | `mirror_skips_total` | `mirror`, `reason` |
/// | `mirror_enumeration_failures_total` | `project` |
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    runs: IntCounterVec,
    durations: HistogramVec,
    skips: IntCounterVec,
    enumeration_failures: IntCounterVec,
}

impl PrometheusMetrics {
    /// Metrics registered in a fresh registry.
    ///
    /// # Errors
    ///
    /// Fails if a metric cannot be created or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Metrics registered in `registry`, e.g. one already served by an exporter.
    ///
    /// # Errors
    ///
    /// Fails if a metric cannot be created, or one of the same name is
    /// already registered.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let runs = IntCounterVec::new(
            Opts::new("mirror_runs_total", "Completed mirror runs"),
            &["mirror", "status"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new("mirror_run_duration_seconds", "Mirror run duration")
                .buckets(DURATION_BUCKETS_SECS.to_vec()),
            &["mirror", "status"],
        )?;
        let skips = IntCounterVec::new(
            Opts::new("mirror_skips_total", "Due ticks that did not run"),
            &["mirror", "reason"],
        )?;
        let enumeration_failures = IntCounterVec::new(
            Opts::new(
                "mirror_enumeration_failures_total",
                "Failed reads of a project's mirror definitions",
            ),
            &["project"],
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(durations.clone()))?;
        registry.register(Box::new(skips.clone()))?;
        registry.register(Box::new(enumeration_failures.clone()))?;

        Ok(Self {
            registry,
            runs,
            durations,
            skips,
            enumeration_failures,
        })
    }

    /// Registry holding the metrics.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be encoded.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Completed runs of `mirror` with `status`.
    #[must_use]
    pub fn count(&self, mirror: &str, status: MirrorStatus) -> u64 {
        self.counter("mirror_runs_total", &[("mirror", mirror), ("status", status.as_str())])
    }

    /// Completed runs of `mirror`, any status.
    #[must_use]
    pub fn runs(&self, mirror: &str) -> u64 {
        [MirrorStatus::Success, MirrorStatus::UpToDate, MirrorStatus::Error]
            .into_iter()
            .map(|status| self.count(mirror, status))
            .sum()
    }

    /// Observation count and sum (seconds) of the duration histogram of
    /// `mirror` runs with `status`.
    #[must_use]
    pub fn durations(&self, mirror: &str, status: MirrorStatus) -> Option<(u64, f64)> {
        self.sample(
            "mirror_run_duration_seconds",
            &[("mirror", mirror), ("status", status.as_str())],
        )
        .map(|m| {
            let h = m.get_histogram();
            (h.get_sample_count(), h.get_sample_sum())
        })
    }

    /// Skipped ticks of `mirror` for `reason`.
    #[must_use]
    pub fn skips(&self, mirror: &str, reason: SkipReason) -> u64 {
        let reason = reason.to_string();
        self.counter("mirror_skips_total", &[("mirror", mirror), ("reason", reason.as_str())])
    }

    /// Failed registry reads of `project`.
    #[must_use]
    pub fn enumeration_failures(&self, project: &str) -> u64 {
        self.counter("mirror_enumeration_failures_total", &[("project", project)])
    }

    // Integer counters hold whole, non-negative values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.sample(name, labels)
            .map_or(0, |m| m.get_counter().get_value() as u64)
    }

    /// Series of metric `name` whose labels are exactly `labels`. Read from a
    /// gather so that queries never create empty series.
    fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<Metric> {
        self.registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)?
            .get_metric()
            .iter()
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == labels.len()
                    && labels.iter().all(|(key, value)| {
                        pairs
                            .iter()
                            .any(|p| p.get_name() == *key && p.get_value() == *value)
                    })
            })
            .cloned()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_result(&self, mirror: &str, status: MirrorStatus, elapsed: Duration) {
        let labels = [mirror, status.as_str()];
        self.runs.with_label_values(&labels).inc();
        self.durations
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
    }

    fn record_skip(&self, mirror: &str, reason: SkipReason) {
        let reason = reason.to_string();
        self.skips.with_label_values(&[mirror, reason.as_str()]).inc();
    }

    fn record_enumeration_failure(&self, project: &str) {
        self.enumeration_failures.with_label_values(&[project]).inc();
    }
}

/// Consumes lifecycle transitions and completed results.
#[derive(Clone)]
pub struct ResultSink {
    metrics: Arc<dyn MetricsSink>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ResultSink {
    /// Sink reporting to `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics, audit: None }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Record a transition that carries no result.
    pub fn record_phase(&self, mirror: &str, run_id: Option<Uuid>, phase: MirrorPhase) {
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(mirror, run_id, phase, None));
        }
    }

    /// Record a due mirror that will not run this tick.
    pub fn record_skip(&self, mirror: &str, reason: SkipReason, detail: Option<String>) {
        debug!(mirror = %mirror, reason = %reason, "mirror skipped for this tick");
        self.metrics.record_skip(mirror, reason);
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(mirror, None, MirrorPhase::Skipped(reason), detail));
        }
    }

    /// Record a project whose mirrors could not be enumerated.
    pub fn record_enumeration_failure(&self, project: &str, error: &MirrorError) {
        warn!(project = %project, error = %error, "skipping project for this tick");
        self.metrics.record_enumeration_failure(project);
    }

    /// Record a completed run.
    pub fn record_result(&self, result: &MirrorResult) {
        let elapsed = result.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match result.status {
            MirrorStatus::Success => info!(
                mirror = %result.mirror,
                run_id = %result.run_id,
                elapsed_ms,
                description = result.description.as_deref().unwrap_or_default(),
                "mirror run succeeded"
            ),
            MirrorStatus::UpToDate => debug!(
                mirror = %result.mirror,
                run_id = %result.run_id,
                elapsed_ms,
                "mirror is up to date"
            ),
            MirrorStatus::Error => warn!(
                mirror = %result.mirror,
                run_id = %result.run_id,
                elapsed_ms,
                cause = result.cause.as_deref().unwrap_or_default(),
                "mirror run failed"
            ),
        }

        self.metrics.record_result(&result.mirror, result.status, elapsed);
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(
                result.mirror.clone(),
                Some(result.run_id),
                MirrorPhase::Completed(result.status),
                result.cause.clone().or_else(|| result.description.clone()),
            ));
        }
    }
}
