//! Direction-specific transfer strategies and per-run caps.

use std::path::Path;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};

use super::{CapKind, MirrorConfig, MirrorDirection, MirrorError, Snapshot};

/// Effective per-run caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCaps {
    /// Maximum number of files.
    pub max_files: u32,
    /// Maximum total content bytes.
    pub max_bytes: u64,
}

impl TransferCaps {
    /// Caps of `mirror`, falling back to the given defaults.
    #[must_use]
    pub fn resolve(mirror: &MirrorConfig, default_max_files: u32, default_max_bytes: u64) -> Self {
        Self {
            max_files: mirror.max_files.unwrap_or(default_max_files),
            max_bytes: mirror.max_bytes.unwrap_or(default_max_bytes),
        }
    }
}

/// Running tally charged by a transport as it transfers files. Fails as soon
/// as a cap is crossed, so a transfer never grows past its caps.
#[derive(Debug)]
pub struct TransferBudget {
    caps: TransferCaps,
    files: u32,
    bytes: u64,
}

impl TransferBudget {
    /// Fresh budget.
    #[must_use]
    pub const fn new(caps: TransferCaps) -> Self {
        Self {
            caps,
            files: 0,
            bytes: 0,
        }
    }

    /// Account for one file of `len` bytes.
    ///
    /// # Errors
    ///
    /// [`MirrorError::ResourceCapExceeded`] when either cap would be exceeded.
    pub fn charge(&mut self, len: u64) -> Result<(), MirrorError> {
        if self.files >= self.caps.max_files {
            return Err(MirrorError::ResourceCapExceeded {
                kind: CapKind::Files,
                limit: u64::from(self.caps.max_files),
            });
        }
        let bytes = self.bytes.saturating_add(len);
        if bytes > self.caps.max_bytes {
            return Err(MirrorError::ResourceCapExceeded {
                kind: CapKind::Bytes,
                limit: self.caps.max_bytes,
            });
        }
        self.files += 1;
        self.bytes = bytes;
        Ok(())
    }

    /// Charge every file of a snapshot.
    ///
    /// # Errors
    ///
    /// See [`TransferBudget::charge`].
    pub fn charge_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), MirrorError> {
        snapshot
            .values()
            .try_for_each(|content| self.charge(content.len() as u64))
    }

    /// Files charged so far.
    #[must_use]
    pub const fn files(&self) -> u32 {
        self.files
    }

    /// Bytes charged so far.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// `*` and `?` stop at `/`; only `**` spans directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Exclusion patterns from a mirror's content filter.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    patterns: Vec<Pattern>,
}

impl ContentFilter {
    /// Parse newline-separated globs; blank lines and `#` comments are ignored.
    /// A pattern without `/` matches the file name at any depth.
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidConfig`] for a malformed pattern.
    pub fn parse(filter: Option<&str>) -> Result<Self, MirrorError> {
        let mut patterns = Vec::new();
        for line in filter.unwrap_or_default().lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let glob = if line.contains('/') {
                format!("/{}", line.trim_start_matches('/'))
            } else {
                format!("/**/{line}")
            };
            let pattern = Pattern::new(&glob).map_err(|e| {
                MirrorError::InvalidConfig(format!("invalid content filter pattern '{line}': {e}"))
            })?;
            patterns.push(pattern);
        }
        Ok(Self { patterns })
    }

    /// Whether a relative path (`/a/b.json`) is excluded.
    #[must_use]
    pub fn excludes(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// Drop excluded entries from a snapshot of relative paths.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        if !self.patterns.is_empty() {
            snapshot.retain(|path, _| !self.excludes(path));
        }
    }
}

/// Content fetched from a remote repository.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    /// Remote revision the content was taken from.
    pub revision: String,
    /// Files under the mirror's remote path, keyed relative to it (`/a.json`).
    pub files: Snapshot,
}

/// Outcome of pushing local content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote changed; carries the new remote revision.
    Pushed(String),
    /// The remote already held this content.
    UpToDate,
}

/// Remote transfer primitives, chosen per mirror and direction.
///
/// Implementations must charge every transferred file to the budget before
/// materializing it and must stay responsive to task cancellation, since an
/// interrupted run simply drops their future.
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    /// Current revision of the remote, without transferring content.
    async fn remote_revision(&self, mirror: &MirrorConfig) -> Result<String, MirrorError>;

    /// Fetch the remote content under the mirror's remote path.
    async fn fetch(
        &self,
        mirror: &MirrorConfig,
        work_dir: &Path,
        filter: &ContentFilter,
        budget: &mut TransferBudget,
    ) -> Result<RemoteSnapshot, MirrorError>;

    /// Replace the content under the mirror's remote path with `files`.
    async fn push(
        &self,
        mirror: &MirrorConfig,
        work_dir: &Path,
        files: &Snapshot,
        filter: &ContentFilter,
        summary: &str,
    ) -> Result<PushOutcome, MirrorError>;

    /// Whether this transport serves `mirror` in `direction`.
    fn supports(&self, mirror: &MirrorConfig, direction: MirrorDirection) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_rejects_the_file_past_the_cap() {
        let mut budget = TransferBudget::new(TransferCaps {
            max_files: 2,
            max_bytes: 1_000,
        });
        budget.charge(10).unwrap();
        budget.charge(10).unwrap();
        let err = budget.charge(10).unwrap_err();
        assert!(matches!(
            err,
            MirrorError::ResourceCapExceeded {
                kind: CapKind::Files,
                limit: 2
            }
        ));
        assert_eq!(budget.files(), 2);
    }

    #[test]
    fn budget_rejects_bytes_over_cap() {
        let mut budget = TransferBudget::new(TransferCaps {
            max_files: 10,
            max_bytes: 15,
        });
        budget.charge(10).unwrap();
        assert!(matches!(
            budget.charge(6),
            Err(MirrorError::ResourceCapExceeded {
                kind: CapKind::Bytes,
                ..
            })
        ));
        assert_eq!(budget.bytes(), 10);
    }

    #[test]
    fn filter_matches_names_at_any_depth_and_anchored_paths() {
        let filter = ContentFilter::parse(Some("*.tmp\n# comment\n/secret/*\n")).unwrap();
        assert!(filter.excludes("/a.tmp"));
        assert!(filter.excludes("/deep/dir/b.tmp"));
        assert!(filter.excludes("/secret/key.json"));
        assert!(!filter.excludes("/public/key.json"));
    }

    #[test]
    fn single_star_stays_within_one_directory() {
        let filter = ContentFilter::parse(Some("/secret/*\n/cache/**\n*.tmp")).unwrap();
        assert!(filter.excludes("/secret/a.json"));
        assert!(!filter.excludes("/secret/a/b.json"));
        assert!(filter.excludes("/cache/x/y/z.json"));
        assert!(filter.excludes("/deep/nested/dir/c.tmp"));
        assert!(!filter.excludes("/deep/c.tmp/keep.json"));
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = ContentFilter::parse(None).unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.insert("/a".into(), vec![1]);
        filter.apply(&mut snapshot);
        assert_eq!(snapshot.len(), 1);
    }
}
