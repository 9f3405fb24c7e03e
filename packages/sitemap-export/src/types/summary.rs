//! Per-run regeneration summary, persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Published,
    RolledBack,
    Aborted,
}

/// Counts recorded for a regeneration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
    /// Ranges that produced a shard
    pub shards_written: usize,
    /// Ranges visited that produced no records
    pub empty_ranges: usize,
    pub failed_ranges: usize,
    pub urls_written: usize,
    /// Windows the registry claimed empty but the cursor found records in
    pub stale_registry_windows: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            shards_written: 0,
            empty_ranges: 0,
            failed_ranges: 0,
            urls_written: 0,
            stale_registry_windows: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome, error: Option<String>) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
        self.outcome = Some(outcome);
        self.error = error;
    }
}
