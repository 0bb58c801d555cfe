//! In-memory access policy with ordered glob rules.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use glob::Pattern;
use parking_lot::RwLock;

use crate::core::{AccessDecision, AccessRule, MirrorAccessController, MirrorConfig, MirrorError};

struct CompiledRule {
    rule: AccessRule,
    pattern: Pattern,
    seq: u64,
}

#[derive(Default)]
struct Rules {
    entries: Vec<CompiledRule>,
    next_seq: u64,
}

/// Rule-based access policy kept in memory.
///
/// Rules are evaluated by ascending `order`, ties broken by insertion; the
/// first rule whose pattern matches the remote URI decides. When none match,
/// the default decision applies.
pub struct InMemoryAccessController {
    rules: RwLock<Rules>,
    default_allow: bool,
    unavailable: AtomicBool,
}

impl InMemoryAccessController {
    /// Controller answering `default_allow` when no rule matches.
    #[must_use]
    pub fn new(default_allow: bool) -> Self {
        Self {
            rules: RwLock::new(Rules::default()),
            default_allow,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Controller allowing everything unless a rule says otherwise.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(true)
    }

    /// Controller denying everything unless a rule says otherwise.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(false)
    }

    /// Simulate an unreachable policy backend: every query fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Registered rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> Vec<AccessRule> {
        self.rules.read().entries.iter().map(|c| c.rule.clone()).collect()
    }

    fn add_rule(&self, target_pattern: &str, reason: &str, order: i32, allow: bool) -> Result<bool, MirrorError> {
        let pattern = Pattern::new(target_pattern).map_err(|e| {
            MirrorError::InvalidConfig(format!("invalid target pattern '{target_pattern}': {e}"))
        })?;
        let mut rules = self.rules.write();
        let seq = rules.next_seq;
        rules.next_seq += 1;
        rules.entries.push(CompiledRule {
            rule: AccessRule {
                target_pattern: target_pattern.to_string(),
                allow,
                reason: reason.to_string(),
                order,
            },
            pattern,
            seq,
        });
        rules.entries.sort_by_key(|c| (c.rule.order, c.seq));
        Ok(true)
    }

    fn decide(&self, repo_uri: &str) -> Result<AccessDecision, MirrorError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(MirrorError::AccessCheck("access policy backend unavailable".into()));
        }
        let rules = self.rules.read();
        Ok(rules
            .entries
            .iter()
            .find(|c| c.pattern.matches(repo_uri))
            .map_or_else(
                || AccessDecision::policy(self.default_allow, None),
                |c| AccessDecision::policy(c.rule.allow, Some(c.rule.clone())),
            ))
    }
}

impl Default for InMemoryAccessController {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[async_trait]
impl MirrorAccessController for InMemoryAccessController {
    async fn allow(&self, target_pattern: &str, reason: &str, order: i32) -> Result<bool, MirrorError> {
        self.add_rule(target_pattern, reason, order, true)
    }

    async fn disallow(&self, target_pattern: &str, reason: &str, order: i32) -> Result<bool, MirrorError> {
        self.add_rule(target_pattern, reason, order, false)
    }

    async fn is_allowed(&self, repo_uri: &str) -> Result<bool, MirrorError> {
        self.decide(repo_uri).map(|d| d.allowed)
    }

    async fn decide_mirror(&self, mirror: &MirrorConfig) -> Result<AccessDecision, MirrorError> {
        self.decide(&mirror.remote_uri)
    }
}
