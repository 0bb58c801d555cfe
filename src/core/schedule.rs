//! Cron schedules and the per-mirror state carried between ticks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use super::{MirrorConfig, MirrorError};

/// A parsed seconds-resolution cron expression (`sec min hour dom month dow [year]`).
#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse a 6- or 7-field expression.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::InvalidCron`] if the expression is malformed.
    pub fn parse(expr: &str) -> Result<Self, MirrorError> {
        let trimmed = expr.trim();
        let schedule = Schedule::from_str(trimmed).map_err(|e| MirrorError::InvalidCron {
            expr: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written.
    #[must_use]
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether the schedule has a fire time in `(after, until]`.
    #[must_use]
    pub fn fires_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        if until <= after {
            return false;
        }
        self.schedule
            .after(&after)
            .next()
            .is_some_and(|next| next <= until)
    }

    /// First fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl FromStr for CronSchedule {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for CronSchedule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expr)
    }
}

impl<'de> serde::Deserialize<'de> for CronSchedule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        Self::parse(&expr).map_err(serde::de::Error::custom)
    }
}

/// Per-mirror `last_checked_at` timestamps.
///
/// Owned by the ticker alone; nothing else reads or writes it, so it needs no lock.
#[derive(Debug, Default)]
pub struct ScheduleState {
    last_tick: Option<DateTime<Utc>>,
    last_checked: HashMap<String, DateTime<Utc>>,
}

impl ScheduleState {
    /// State whose first evaluation window starts at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            last_tick: Some(start),
            last_checked: HashMap::new(),
        }
    }

    /// Decide whether `mirror` fired in `(last_checked_at, now]` and advance its
    /// `last_checked_at` to `now` whatever the answer.
    ///
    /// A mirror seen for the first time is evaluated from the previous tick, or
    /// from `now` on the very first tick.
    pub fn check_due(&mut self, mirror: &MirrorConfig, now: DateTime<Utc>) -> bool {
        let key = mirror.key();
        let since = self
            .last_checked
            .get(&key)
            .copied()
            .or(self.last_tick)
            .unwrap_or(now);
        let due = mirror.schedule.fires_between(since, now);
        // Never move backwards if the wall clock does.
        self.last_checked.insert(key, since.max(now));
        due
    }

    /// Close a tick: forget mirrors that were not seen. Mirrors of projects
    /// whose enumeration failed this tick are kept, with `last_checked_at`
    /// advanced to `now`, so fire times that passed while the project was
    /// unreadable are not replayed once it recovers.
    pub fn finish_tick(
        &mut self,
        now: DateTime<Utc>,
        seen: &HashSet<String>,
        failed_projects: &HashSet<String>,
    ) {
        self.last_checked.retain(|key, last_checked| {
            if seen.contains(key) {
                return true;
            }
            let failed = key
                .split_once('/')
                .is_some_and(|(project, _)| failed_projects.contains(project));
            if failed {
                *last_checked = (*last_checked).max(now);
            }
            failed
        });
        self.last_tick = Some(self.last_tick.map_or(now, |prev| prev.max(now)));
    }

    /// `last_checked_at` of a mirror key.
    #[must_use]
    pub fn last_checked(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_checked.get(key).copied()
    }

    /// Time of the last completed tick.
    #[must_use]
    pub const fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }

    /// Number of tracked mirrors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_checked.len()
    }

    /// Whether no mirror is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_checked.is_empty()
    }
}
