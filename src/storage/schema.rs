//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema revision recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            target_url TEXT NOT NULL,
            status TEXT NOT NULL,
            total_tests INTEGER NOT NULL DEFAULT 0,
            passed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            warnings INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE TABLE IF NOT EXISTS test_results (
            id INTEGER PRIMARY KEY,
            execution_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            test_type TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            details_json TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS bug_reports (
            id INTEGER PRIMARY KEY,
            project_id TEXT NOT NULL,
            execution_id TEXT NOT NULL,
            title TEXT NOT NULL,
            severity TEXT NOT NULL,
            bug_type TEXT NOT NULL,
            description TEXT NOT NULL,
            page_url TEXT NOT NULL,
            steps_json TEXT NOT NULL,
            expected_behavior TEXT NOT NULL,
            actual_behavior TEXT NOT NULL,
            browser_info_json TEXT NOT NULL,
            screenshot_path TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS performance_metrics (
            id INTEGER PRIMARY KEY,
            execution_id TEXT NOT NULL,
            page_url TEXT NOT NULL,
            page_load_time_ms REAL NOT NULL,
            first_contentful_paint_ms REAL NOT NULL,
            dom_content_loaded_ms REAL NOT NULL,
            resource_count INTEGER NOT NULL,
            total_size_kb REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            cron_expr TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_run_at TEXT,
            next_run_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_executions_project ON executions(project_id);
        CREATE INDEX IF NOT EXISTS idx_test_results_execution ON test_results(execution_id);
        CREATE INDEX IF NOT EXISTS idx_bug_reports_execution ON bug_reports(execution_id);
        CREATE INDEX IF NOT EXISTS idx_perf_execution ON performance_metrics(execution_id);
        CREATE INDEX IF NOT EXISTS idx_schedules_project ON schedules(project_id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
