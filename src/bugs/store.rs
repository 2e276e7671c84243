use super::{Bug, BugRecord, BugStatus, BugType, Severity};
use crate::storage::Pool;
use anyhow::{Context, Result};
use rusqlite::params;
use tracing::{error, info};

pub struct BugStore {
    pool: Pool,
}

impl BugStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record(&self, project_id: &str, execution_id: &str, bug: &Bug) -> Result<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO bug_reports (project_id, execution_id, title, severity, bug_type, description,
                page_url, steps_json, expected_behavior, actual_behavior, browser_info_json,
                screenshot_path, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                project_id,
                execution_id,
                bug.title,
                bug.severity.as_str(),
                bug.bug_type.as_str(),
                bug.description,
                bug.page_url,
                serde_json::to_string(&bug.steps_to_reproduce)?,
                bug.expected_behavior,
                bug.actual_behavior,
                serde_json::to_string(&bug.browser_info)?,
                bug.screenshot_path,
                bug.status.as_str(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert bug report")?;

        Ok(conn.last_insert_rowid())
    }

    /// Persist each bug on its own; a failed insert is logged and skipped.
    /// Returns how many were stored.
    pub fn record_all(&self, project_id: &str, execution_id: &str, bugs: &[Bug]) -> usize {
        let mut saved = 0;
        for bug in bugs {
            match self.record(project_id, execution_id, bug) {
                Ok(_) => saved += 1,
                Err(e) => error!(%execution_id, title = %bug.title, "Failed to save bug: {:#}", e),
            }
        }
        info!(%execution_id, saved, total = bugs.len(), "Bug reports persisted");
        saved
    }

    pub fn list_for_execution(&self, execution_id: &str) -> Result<Vec<BugRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, execution_id, title, severity, bug_type, description, page_url,
                    steps_json, expected_behavior, actual_behavior, browser_info_json,
                    screenshot_path, status, created_at
             FROM bug_reports WHERE execution_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map([execution_id], |row| {
            let severity: String = row.get(4)?;
            let bug_type: String = row.get(5)?;
            let steps_json: String = row.get(8)?;
            let browser_json: String = row.get(11)?;
            let status: String = row.get(13)?;

            Ok(BugRecord {
                id: row.get(0)?,
                project_id: row.get(1)?,
                execution_id: row.get(2)?,
                bug: Bug {
                    title: row.get(3)?,
                    severity: Severity::parse(&severity).unwrap_or(Severity::Info),
                    bug_type: BugType::parse(&bug_type).unwrap_or(BugType::ConsoleError),
                    description: row.get(6)?,
                    page_url: row.get(7)?,
                    steps_to_reproduce: serde_json::from_str(&steps_json).unwrap_or_default(),
                    expected_behavior: row.get(9)?,
                    actual_behavior: row.get(10)?,
                    browser_info: serde_json::from_str(&browser_json).unwrap_or_default(),
                    screenshot_path: row.get(12)?,
                    status: BugStatus::parse(&status),
                },
                created_at: row.get(14)?,
            })
        })?;

        let mut bugs = Vec::new();
        for r in rows {
            bugs.push(r?);
        }
        Ok(bugs)
    }
}
