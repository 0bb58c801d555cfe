//! In-memory mirror registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{MirrorConfig, MirrorError, MirrorRegistry};

/// Registry kept in memory, for development and testing.
///
/// Projects list in name order and mirrors in insertion order. Reads of
/// individual projects, or of the project list, can be made to fail.
#[derive(Default)]
pub struct InMemoryMirrorRegistry {
    projects: RwLock<BTreeMap<String, Vec<MirrorConfig>>>,
    failing: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,
    reads: AtomicU64,
}

impl InMemoryMirrorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `mirrors`.
    #[must_use]
    pub fn with_mirrors(mirrors: impl IntoIterator<Item = MirrorConfig>) -> Self {
        let registry = Self::new();
        for mirror in mirrors {
            registry.upsert(mirror);
        }
        registry
    }

    /// Register a project without mirrors.
    pub fn add_project(&self, project: impl Into<String>) {
        self.projects.write().entry(project.into()).or_default();
    }

    /// Insert a mirror or replace the one with the same project and id.
    pub fn upsert(&self, mirror: MirrorConfig) {
        let mut projects = self.projects.write();
        let mirrors = projects.entry(mirror.project.clone()).or_default();
        match mirrors.iter_mut().find(|m| m.id == mirror.id) {
            Some(existing) => *existing = mirror,
            None => mirrors.push(mirror),
        }
    }

    /// Remove a mirror; returns whether it existed.
    pub fn remove(&self, project: &str, id: &str) -> bool {
        let mut projects = self.projects.write();
        let Some(mirrors) = projects.get_mut(project) else {
            return false;
        };
        let before = mirrors.len();
        mirrors.retain(|m| m.id != id);
        mirrors.len() != before
    }

    /// Make reads of `project` fail (or succeed again).
    pub fn set_failing(&self, project: impl Into<String>, failing: bool) {
        let project = project.into();
        if failing {
            self.failing.write().insert(project);
        } else {
            self.failing.write().remove(&project);
        }
    }

    /// Make the project listing itself fail (or succeed again).
    pub fn set_listing_failing(&self, failing: bool) {
        self.fail_listing.store(failing, Ordering::Release);
    }

    /// Number of per-project reads served, failed ones included.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MirrorRegistry for InMemoryMirrorRegistry {
    async fn projects(&self) -> Result<Vec<String>, MirrorError> {
        if self.fail_listing.load(Ordering::Acquire) {
            return Err(MirrorError::ConfigEnumeration {
                project: "*".into(),
                reason: "project listing unavailable".into(),
            });
        }
        Ok(self.projects.read().keys().cloned().collect())
    }

    async fn mirrors(&self, project: &str) -> Result<Vec<MirrorConfig>, MirrorError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().contains(project) {
            return Err(MirrorError::ConfigEnumeration {
                project: project.to_string(),
                reason: "mirror definitions unreadable".into(),
            });
        }
        Ok(self.projects.read().get(project).cloned().unwrap_or_default())
    }
}
