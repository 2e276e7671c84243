use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::cron::InFlightGuard;
use super::{RunCallback, ScheduledTask, Scheduler, DEFAULT_POLL_INTERVAL};
use crate::probes::TestType;
use crate::storage;

/// Drives due tasks through a [`RunCallback`].
#[derive(Clone)]
pub struct SchedulerEngine {
    scheduler: Scheduler,
    callback: Arc<dyn RunCallback>,
    test_types: Vec<TestType>,
    poll_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(scheduler: Scheduler, callback: Arc<dyn RunCallback>, test_types: Vec<TestType>) -> Self {
        Self {
            scheduler,
            callback,
            test_types,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// One polling pass: reload, pick due tasks, spawn each on its own task.
    /// The returned handles finish when the corresponding run does.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        if let Err(e) = self.scheduler.reload() {
            // Keep working from the last good cache.
            error!("Failed to reload schedules: {:#}", e);
        }

        let mut handles = Vec::new();
        for task in self.scheduler.due_tasks(now) {
            let Some(guard) = self.scheduler.try_begin(&task.id) else {
                continue;
            };
            info!(task_id = %task.id, schedule = %task.name, project = %task.project_id, "Task due");

            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.execute(task, guard).await;
            }));
        }
        handles
    }

    async fn execute(&self, task: ScheduledTask, _guard: InFlightGuard) {
        let base_url = match storage::get_project(self.scheduler.pool(), &task.project_id) {
            Ok(Some(project)) => project.base_url,
            Ok(None) => {
                warn!(task_id = %task.id, project = %task.project_id, "Project not found; task left due");
                return;
            }
            Err(e) => {
                error!(task_id = %task.id, "Failed to load project: {:#}", e);
                return;
            }
        };

        match self.callback.run(&task.project_id, &base_url, &self.test_types).await {
            Ok(()) => match self.scheduler.mark_run(&task.id, Utc::now()) {
                Ok(next) => info!(task_id = %task.id, next_run = %next, "Scheduled run finished"),
                Err(e) => error!(task_id = %task.id, "Failed to record run: {:#}", e),
            },
            Err(e) => error!(task_id = %task.id, schedule = %task.name, "Scheduled run failed: {:#}", e),
        }
    }
}

/// Main scheduler loop. Never returns; runs are detached so a slow suite does
/// not delay the next tick.
pub async fn run_scheduler_loop(engine: SchedulerEngine) {
    info!(poll_secs = engine.poll_interval.as_secs(), "Scheduler engine started");

    let mut interval = tokio::time::interval(engine.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let spawned = engine.tick(Utc::now());
        if !spawned.is_empty() {
            info!(count = spawned.len(), "Dispatched scheduled runs");
        }
    }
}
