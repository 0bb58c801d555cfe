//! Admission control for mirror targets.
//!
//! The [`MirrorAccessController`] trait is the pluggable policy; [`AccessGate`]
//! wraps one and turns every outcome, including backend failures, timeouts and
//! panics, into a definite [`AccessDecision`].

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AccessFailurePolicy;

use super::{MirrorConfig, MirrorError};

/// A policy rule keyed by a remote target pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Glob over remote repository URIs.
    pub target_pattern: String,
    /// Allow or deny on match.
    pub allow: bool,
    /// Why the rule exists.
    pub reason: String,
    /// Lower orders are evaluated first.
    pub order: i32,
}

/// Where an [`AccessDecision`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSource {
    /// The policy answered.
    Policy,
    /// The policy failed and the configured failure policy answered instead.
    Fallback {
        /// What went wrong.
        reason: String,
    },
}

/// Admission answer, valid only at the instant it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the mirror may run.
    pub allowed: bool,
    /// Rule that produced the answer, if the policy reports one.
    pub matched: Option<AccessRule>,
    /// Policy or fallback.
    pub source: DecisionSource,
}

impl AccessDecision {
    /// Decision made by the policy.
    #[must_use]
    pub const fn policy(allowed: bool, matched: Option<AccessRule>) -> Self {
        Self {
            allowed,
            matched,
            source: DecisionSource::Policy,
        }
    }

    /// Decision made by the failure policy.
    #[must_use]
    pub const fn fallback(allowed: bool, reason: String) -> Self {
        Self {
            allowed,
            matched: None,
            source: DecisionSource::Fallback { reason },
        }
    }
}

/// Pluggable admission policy.
///
/// `allow`/`disallow` are administrative operations; the scheduler only asks.
#[async_trait]
pub trait MirrorAccessController: Send + Sync {
    /// Register a rule allowing targets matching `target_pattern`.
    async fn allow(&self, target_pattern: &str, reason: &str, order: i32) -> Result<bool, MirrorError>;

    /// Register a rule denying targets matching `target_pattern`.
    async fn disallow(&self, target_pattern: &str, reason: &str, order: i32)
        -> Result<bool, MirrorError>;

    /// Whether a remote repository URI may be mirrored.
    async fn is_allowed(&self, repo_uri: &str) -> Result<bool, MirrorError>;

    /// Whether a mirror may run. Defaults to checking its remote URI.
    async fn is_allowed_mirror(&self, mirror: &MirrorConfig) -> Result<bool, MirrorError> {
        self.is_allowed(&mirror.remote_uri).await
    }

    /// One entry per distinct input URI; duplicates collapse, nothing is omitted.
    /// Distinct URIs are checked concurrently.
    async fn is_allowed_batch(&self, repo_uris: &[String]) -> Result<HashMap<String, bool>, MirrorError> {
        let distinct: HashSet<&String> = repo_uris.iter().collect();
        let checks = distinct.into_iter().map(|uri| async move {
            self.is_allowed(uri).await.map(|allowed| (uri.clone(), allowed))
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Full decision for a mirror. Policies that track rules override this to
    /// report the matched rule.
    async fn decide_mirror(&self, mirror: &MirrorConfig) -> Result<AccessDecision, MirrorError> {
        let allowed = self.is_allowed_mirror(mirror).await?;
        Ok(AccessDecision::policy(allowed, None))
    }
}

/// Admission gate consulted by the scheduler for every due mirror.
#[derive(Clone)]
pub struct AccessGate {
    controller: Arc<dyn MirrorAccessController>,
    on_failure: AccessFailurePolicy,
    timeout: Option<Duration>,
}

impl AccessGate {
    /// Wrap a policy with an explicit failure policy.
    #[must_use]
    pub fn new(controller: Arc<dyn MirrorAccessController>, on_failure: AccessFailurePolicy) -> Self {
        Self {
            controller,
            on_failure,
            timeout: None,
        }
    }

    /// Treat a policy call slower than `timeout` as failed.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The wrapped policy.
    #[must_use]
    pub fn controller(&self) -> &Arc<dyn MirrorAccessController> {
        &self.controller
    }

    /// The configured failure policy.
    #[must_use]
    pub const fn failure_policy(&self) -> AccessFailurePolicy {
        self.on_failure
    }

    /// Consult the policy. Never fails: errors, timeouts and panics resolve
    /// through the failure policy.
    pub async fn check(&self, mirror: &MirrorConfig) -> AccessDecision {
        let call = AssertUnwindSafe(self.controller.decide_mirror(mirror)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(MirrorError::AccessCheck(format!(
                    "no answer within {}ms",
                    limit.as_millis()
                )))),
            },
            None => call.await,
        };

        let failure = match outcome {
            Ok(Ok(decision)) => {
                debug!(mirror = %mirror.key(), allowed = decision.allowed, "access decision");
                return decision;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "access policy panicked".to_string(),
        };

        let allowed = self.on_failure.allows();
        warn!(
            mirror = %mirror.key(),
            error = %failure,
            allowed,
            "access check failed; applying failure policy"
        );
        AccessDecision::fallback(allowed, failure)
    }

    /// `check` reduced to a boolean.
    pub async fn allow(&self, mirror: &MirrorConfig) -> bool {
        self.check(mirror).await.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CronSchedule, MirrorDirection};

    struct Broken;

    #[async_trait]
    impl MirrorAccessController for Broken {
        async fn allow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn disallow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn is_allowed(&self, _: &str) -> Result<bool, MirrorError> {
            Err(MirrorError::AccessCheck("backend unreachable".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl MirrorAccessController for Slow {
        async fn allow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn disallow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn is_allowed(&self, _: &str) -> Result<bool, MirrorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    /// Answers after a fixed delay, counting calls.
    struct Delayed {
        delay: Duration,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl MirrorAccessController for Delayed {
        async fn allow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn disallow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn is_allowed(&self, uri: &str) -> Result<bool, MirrorError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(!uri.contains("blocked"))
        }
    }

    struct Panicky;

    #[async_trait]
    impl MirrorAccessController for Panicky {
        async fn allow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn disallow(&self, _: &str, _: &str, _: i32) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn is_allowed(&self, _: &str) -> Result<bool, MirrorError> {
            panic!("policy bug")
        }
    }

    fn mirror() -> MirrorConfig {
        MirrorConfig::new(
            "m",
            "p",
            "r",
            CronSchedule::parse("* * * * * *").unwrap(),
            MirrorDirection::RemoteToLocal,
            "git+https://example.com/a.git",
        )
    }

    #[tokio::test]
    async fn fail_closed_denies_on_backend_error() {
        let gate = AccessGate::new(Arc::new(Broken), AccessFailurePolicy::FailClosed);
        let decision = gate.check(&mirror()).await;
        assert!(!decision.allowed);
        assert!(matches!(decision.source, DecisionSource::Fallback { .. }));
    }

    #[tokio::test]
    async fn fail_open_allows_on_backend_error() {
        let gate = AccessGate::new(Arc::new(Broken), AccessFailurePolicy::FailOpen);
        assert!(gate.allow(&mirror()).await);
    }

    #[tokio::test]
    async fn timeout_resolves_through_failure_policy() {
        let gate = AccessGate::new(Arc::new(Slow), AccessFailurePolicy::FailClosed)
            .with_timeout(Some(Duration::from_millis(20)));
        assert!(!gate.allow(&mirror()).await);
    }

    #[tokio::test]
    async fn panicking_policy_does_not_escape_the_gate() {
        let gate = AccessGate::new(Arc::new(Panicky), AccessFailurePolicy::FailOpen);
        let decision = gate.check(&mirror()).await;
        assert!(decision.allowed);
        assert_eq!(
            decision.source,
            DecisionSource::Fallback {
                reason: "access policy panicked".into()
            }
        );
    }

    #[tokio::test]
    async fn batch_checks_distinct_uris_concurrently() {
        let controller = Delayed {
            delay: Duration::from_millis(200),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let mut uris: Vec<String> = (0..5).map(|i| format!("https://example.com/r{i}.git")).collect();
        uris.push("https://example.com/blocked.git".into());
        uris.push("https://example.com/r0.git".into());

        let started = std::time::Instant::now();
        let decisions = controller.is_allowed_batch(&uris).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(800));
        assert_eq!(decisions.len(), 6);
        assert!(!decisions["https://example.com/blocked.git"]);
        assert_eq!(controller.calls.load(std::sync::atomic::Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn batch_propagates_a_backend_error() {
        let uris = vec!["https://example.com/a.git".to_string()];
        assert!(matches!(
            Broken.is_allowed_batch(&uris).await,
            Err(MirrorError::AccessCheck(_))
        ));
    }
}
