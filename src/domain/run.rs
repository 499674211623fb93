//! Snapshot types for sync runs.
//!
//! A run status is reset when a run starts, mutated only by the run's own
//! task, and read by any number of pollers. Counters only grow within a run.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

/// How the most recent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Engine-specific counters carried by a [`RunStatus`].
pub trait Counters: Clone + Default + Send + Sync + 'static {
    /// Items committed so far, compared against `max_new_downloads`.
    fn committed(&self) -> u32;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrimaryCounters {
    pub scanned_posts: u32,
    pub skipped_existing: u32,
    pub new_attempted: u32,
    pub downloaded_ok: u32,
    pub failed_downloads: u32,
    pub unavailable: u32,
    /// Secondary rows promoted to the primary source by hash match.
    pub upgraded: u32,
}

impl Counters for PrimaryCounters {
    fn committed(&self) -> u32 {
        self.downloaded_ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecondaryCounters {
    pub scanned: u32,
    pub skipped_url: u32,
    pub skipped_md5: u32,
    pub imported: u32,
    pub upgraded: u32,
    pub errors: u32,
    pub unavailable: u32,
}

impl Counters for SecondaryCounters {
    fn committed(&self) -> u32 {
        self.imported + self.upgraded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus<C> {
    pub running: bool,
    pub cancelled: bool,
    pub outcome: Option<RunOutcome>,
    pub max_new_downloads: Option<u32>,
    pub scanned_pages: u32,
    pub cursor: Option<String>,
    pub current_message: String,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: C,
}

pub type SyncRun = RunStatus<PrimaryCounters>;
pub type SecondaryRun = RunStatus<SecondaryCounters>;

impl<C: Counters> RunStatus<C> {
    /// Fresh status for a run that is starting now.
    pub fn begin(max_new_downloads: Option<u32>) -> Self {
        Self {
            running: true,
            max_new_downloads,
            started_at: Some(Utc::now()),
            current_message: "Starting...".to_string(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> RunState {
        if self.running {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    pub fn reached_limit(&self) -> bool {
        self.max_new_downloads
            .is_some_and(|max| self.counters.committed() >= max)
    }

    /// Ends the run. Only the first call has an effect.
    pub fn finish(&mut self, outcome: RunOutcome) {
        if !self.running {
            return;
        }
        self.running = false;
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        self.current_message = match outcome {
            RunOutcome::Completed => "Done.".to_string(),
            RunOutcome::Cancelled => "Cancelled.".to_string(),
            RunOutcome::Failed => "Failed.".to_string(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let run = SyncRun::default();
        assert_eq!(run.state(), RunState::Idle);
        assert!(run.outcome.is_none());
    }

    #[test]
    fn test_finish_only_once() {
        let mut run = SyncRun::begin(None);
        assert_eq!(run.state(), RunState::Running);

        run.finish(RunOutcome::Cancelled);
        run.finish(RunOutcome::Failed);

        assert_eq!(run.state(), RunState::Idle);
        assert_eq!(run.outcome, Some(RunOutcome::Cancelled));
    }

    #[test]
    fn test_reached_limit_uses_committed_count() {
        let mut run = SecondaryRun::begin(Some(3));
        run.counters.imported = 2;
        assert!(!run.reached_limit());
        run.counters.upgraded = 1;
        assert!(run.reached_limit());

        let unlimited = SyncRun::begin(None);
        assert!(!unlimited.reached_limit());
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let mut run = SyncRun::begin(Some(5));
        run.counters.downloaded_ok = 2;
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["downloaded_ok"], 2);
        assert_eq!(json["max_new_downloads"], 5);
        assert_eq!(json["running"], true);
    }
}
