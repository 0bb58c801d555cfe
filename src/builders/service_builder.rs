//! Builder wiring a [`MirrorSchedulingService`] from configuration and collaborators.

use std::sync::Arc;

use crate::config::SchedulingConfig;
use crate::core::{
    AccessGate, AuditSink, InMemoryAuditSink, MetricsSink, MirrorAccessController,
    MirrorError, MirrorRegistry, MirrorRunner, MirrorSchedulingService, MirrorTransport,
    PrometheusMetrics, RepositoryStore, ResultSink,
};
use crate::infra::{InMemoryAccessController, LocalDirectoryTransport};

/// Assemble a scheduling service.
///
/// The registry and the repository store are required. Without an explicit
/// access controller every target is allowed; without a transport only
/// `file://` remotes are served; metrics default to a [`PrometheusMetrics`]
/// with its own registry and audit to an in-memory trail sized from the
/// configuration.
pub struct MirrorSchedulingServiceBuilder {
    config: SchedulingConfig,
    registry: Option<Arc<dyn MirrorRegistry>>,
    store: Option<Arc<dyn RepositoryStore>>,
    access: Option<Arc<dyn MirrorAccessController>>,
    transports: Vec<Arc<dyn MirrorTransport>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl MirrorSchedulingServiceBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: SchedulingConfig) -> Self {
        Self {
            config,
            registry: None,
            store: None,
            access: None,
            transports: Vec::new(),
            metrics: None,
            audit: None,
        }
    }

    /// Source of mirror definitions.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn MirrorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Read side of the repository storage.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RepositoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Admission policy.
    #[must_use]
    pub fn access_controller(mut self, access: Arc<dyn MirrorAccessController>) -> Self {
        self.access = Some(access);
        self
    }

    /// Add a transport; the first that supports a mirror serves it.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn MirrorTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Metrics backend.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Audit trail.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidConfig`] if the configuration is invalid or a
    /// required collaborator is missing, [`MirrorError::Metrics`] if the
    /// default metrics cannot be registered.
    pub fn build(self) -> Result<MirrorSchedulingService, MirrorError> {
        self.config.validate().map_err(MirrorError::InvalidConfig)?;

        let registry = self
            .registry
            .ok_or_else(|| MirrorError::InvalidConfig("a mirror registry is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| MirrorError::InvalidConfig("a repository store is required".into()))?;
        let access = self
            .access
            .unwrap_or_else(|| Arc::new(InMemoryAccessController::allow_all()));

        let mut transports = self.transports.into_iter();
        let first = transports
            .next()
            .unwrap_or_else(|| Arc::new(LocalDirectoryTransport::new()));
        let runner = transports.fold(MirrorRunner::new(first, store, &self.config), |runner, t| {
            runner.with_transport(t)
        });

        let gate = AccessGate::new(access, self.config.access_failure)
            .with_timeout(self.config.access_timeout());
        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(PrometheusMetrics::new()?),
        };
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditSink::new(self.config.audit_capacity)));
        let sink = ResultSink::new(metrics).with_audit(audit);

        MirrorSchedulingService::new(self.config, registry, gate, Arc::new(runner), sink)
    }
}
