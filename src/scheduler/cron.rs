use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use parking_lot::{Mutex, RwLock};
use rusqlite::params;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ScheduledTask, DEFAULT_GRACE_WINDOW_SECS};
use crate::storage::{parse_timestamp, Pool};

/// Parse a five-, six- or seven-field cron expression. Five-field input is
/// classic minute-resolution Unix cron: it gets a leading seconds field of `0`
/// and its day-of-week field (0-7, 0 and 7 both Sunday) is renumbered to the
/// 1-7, 1 = Sunday convention the `cron` crate uses.
pub fn parse_cron(expr: &str) -> Result<CronSchedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            let dow = unix_day_of_week(dow)
                .with_context(|| format!("Invalid cron expression '{}'", expr))?;
            format!("0 {} {} {} {} {}", minute, hour, dom, month, dow)
        }
        _ => expr.trim().to_string(),
    };
    CronSchedule::from_str(&normalized)
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
}

fn parse_day(s: &str) -> Result<u32> {
    let day: u32 = s
        .parse()
        .with_context(|| format!("bad day-of-week value '{}'", s))?;
    if day > 7 {
        anyhow::bail!("day-of-week value {} out of range 0-7", day);
    }
    Ok(day)
}

/// Rewrite a Unix day-of-week field into `cron` crate numbering. Numeric
/// items (single days, ranges, steps) are expanded to explicit days so ranges
/// ending on Sunday do not wrap. Items containing names or `?` pass through.
fn unix_day_of_week(field: &str) -> Result<String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut out: Vec<String> = Vec::new();
    let mut days: Vec<u32> = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic() || c == '?') {
            out.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .with_context(|| format!("bad day-of-week step '{}'", step))?;
                if step == 0 {
                    anyhow::bail!("day-of-week step must be positive");
                }
                (range, Some(step))
            }
            None => (item, None),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((a, b)) => (parse_day(a)?, parse_day(b)?),
            None => {
                let day = parse_day(range)?;
                (day, if step.is_some() { 6 } else { day })
            }
        };
        if start > end {
            anyhow::bail!("day-of-week range {}-{} is reversed", start, end);
        }
        days.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    // Unix 0/7 = Sunday = 1 here; Monday..Saturday shift up by one.
    let mut mapped: Vec<u32> = days.into_iter().map(|d| if d == 0 || d == 7 { 1 } else { d + 1 }).collect();
    mapped.sort_unstable();
    mapped.dedup();
    out.extend(mapped.into_iter().map(|d| d.to_string()));
    Ok(out.join(","))
}

/// First fire time strictly after `now`. An unparseable expression (or one
/// that never fires again) falls back to one hour from now.
pub fn next_run_after(expr: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    match parse_cron(expr).map(|s| s.after(&now).next()) {
        Ok(Some(next)) => next,
        Ok(None) => {
            warn!(cron = %expr, "Cron expression has no future fire time; retrying in 1h");
            now + Duration::hours(1)
        }
        Err(e) => {
            warn!(cron = %expr, "{:#}; retrying in 1h", e);
            now + Duration::hours(1)
        }
    }
}

/// One upcoming fire time in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRun {
    pub at: DateTime<Utc>,
    pub task_id: String,
    pub name: String,
    pub project_id: String,
}

/// Marks a task as executing; dropping it clears the mark.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Schedule definitions persisted in SQLite with an in-memory read-through
/// cache. The cache only changes through this type: explicit [`reload`],
/// add, disable and [`mark_run`].
///
/// [`reload`]: Scheduler::reload
/// [`mark_run`]: Scheduler::mark_run
#[derive(Clone)]
pub struct Scheduler {
    pool: Pool,
    tasks: Arc<RwLock<HashMap<String, ScheduledTask>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    grace_window: Duration,
}

const TASK_COLUMNS: &str = "id, project_id, name, cron_expr, enabled, last_run_at, next_run_at";

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        cron_expr: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        last_run: parse_timestamp(row.get(5)?),
        next_run: parse_timestamp(row.get(6)?),
    })
}

impl Scheduler {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            grace_window: Duration::seconds(DEFAULT_GRACE_WINDOW_SECS),
        }
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Persist a new enabled task. Its first run is one grace window out.
    pub fn add_schedule(&self, project_id: &str, name: &str, cron_expr: &str) -> Result<ScheduledTask> {
        parse_cron(cron_expr)?;

        let now = Utc::now();
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            cron_expr: cron_expr.to_string(),
            enabled: true,
            last_run: None,
            next_run: Some(now + self.grace_window),
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO schedules (id, project_id, name, cron_expr, enabled, next_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
            params![
                task.id,
                task.project_id,
                task.name,
                task.cron_expr,
                task.next_run.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
            ],
        )
        .context("Failed to insert schedule")?;

        info!(task_id = %task.id, project = %project_id, cron = %cron_expr, "Schedule added");
        self.tasks.write().insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Disable a task for good.
    pub fn disable(&self, id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE schedules SET enabled = 0, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            anyhow::bail!("Schedule '{}' not found", id);
        }

        if let Some(task) = self.tasks.write().get_mut(id) {
            task.enabled = false;
        }
        info!(task_id = %id, "Schedule disabled");
        Ok(())
    }

    /// All tasks straight from the store, optionally for one project.
    pub fn list(&self, project_id: Option<&str>) -> Result<Vec<ScheduledTask>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedules WHERE (?1 IS NULL OR project_id = ?1) ORDER BY created_at, id",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], task_from_row)?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }

    /// Replace the cache with the current table contents.
    pub fn reload(&self) -> Result<usize> {
        let tasks = self.list(None)?;
        let count = tasks.len();
        let mut cache = self.tasks.write();
        cache.clear();
        cache.extend(tasks.into_iter().map(|t| (t.id.clone(), t)));
        debug!(count, "Schedule cache reloaded");
        Ok(count)
    }

    pub fn cached(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.read().get(id).cloned()
    }

    /// Due tasks from the cache that are not already running, oldest first.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let in_flight = self.in_flight.lock();
        let mut due: Vec<ScheduledTask> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.is_due(now) && !in_flight.contains(&t.id))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Claim a task for execution. `None` if it is already in flight.
    pub fn try_begin(&self, id: &str) -> Option<InFlightGuard> {
        if !self.in_flight.lock().insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            id: id.to_string(),
        })
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Record a successful run at `ran_at` and schedule the next one.
    pub fn mark_run(&self, id: &str, ran_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let cron_expr = match self.cached(id) {
            Some(task) => task.cron_expr,
            None => {
                let conn = self.pool.get()?;
                conn.query_row("SELECT cron_expr FROM schedules WHERE id = ?1", params![id], |row| {
                    row.get::<_, String>(0)
                })
                .with_context(|| format!("Schedule '{}' not found", id))?
            }
        };
        let next = next_run_after(&cron_expr, ran_at);

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE schedules SET last_run_at = ?2, next_run_at = ?3, updated_at = ?2 WHERE id = ?1",
            params![id, ran_at.to_rfc3339(), next.to_rfc3339()],
        )
        .context("Failed to update schedule timestamps")?;

        if let Some(task) = self.tasks.write().get_mut(id) {
            task.last_run = Some(ran_at);
            task.next_run = Some(next);
        }
        Ok(next)
    }

    /// Every fire time of every enabled task within the next `hours`.
    pub fn preview_next_runs(&self, hours: u64, now: DateTime<Utc>) -> Result<Vec<PlannedRun>> {
        let end = now + Duration::hours(hours as i64);
        let mut preview = Vec::new();

        for task in self.list(None)?.into_iter().filter(|t| t.enabled) {
            let schedule = match parse_cron(&task.cron_expr) {
                Ok(s) => s,
                Err(e) => {
                    warn!(task_id = %task.id, "Skipping in preview: {:#}", e);
                    continue;
                }
            };
            for at in schedule.after(&now).take_while(|at| *at <= end) {
                preview.push(PlannedRun {
                    at,
                    task_id: task.id.clone(),
                    name: task.name.clone(),
                    project_id: task.project_id.clone(),
                });
            }
        }

        preview.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(preview)
    }
}
