//! Cron-driven re-execution of test suites.

pub mod cron;
pub mod engine;

pub use self::cron::{next_run_after, parse_cron, PlannedRun, Scheduler};
pub use self::engine::{run_scheduler_loop, SchedulerEngine};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::probes::TestType;

/// How often the loop looks for due tasks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before a newly added task first becomes due.
pub const DEFAULT_GRACE_WINDOW_SECS: i64 = 300;

/// Probe set a scheduled run uses unless configured otherwise.
pub fn default_test_types() -> Vec<TestType> {
    vec![
        TestType::Functional,
        TestType::Performance,
        TestType::Accessibility,
        TestType::BrokenLinks,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub cron_expr: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// Enabled and `next_run` at or before `now`. A task that never got a
    /// `next_run` is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.map_or(true, |next| next <= now)
    }
}

/// What the scheduler invokes for each due task.
#[async_trait::async_trait]
pub trait RunCallback: Send + Sync {
    async fn run(&self, project_id: &str, base_url: &str, test_types: &[TestType]) -> Result<()>;
}
