//! Execution, result and performance-metric tables.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{parse_timestamp, Pool};
use crate::coordinator::{ExecutionStatus, TestExecution};
use crate::probes::{TestResult, TestStatus, TestType};

/// Page timing captured by the performance probe, one row per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub execution_id: String,
    pub page_url: String,
    pub page_load_time_ms: f64,
    pub first_contentful_paint_ms: f64,
    pub dom_content_loaded_ms: f64,
    pub resource_count: u64,
    pub total_size_kb: f64,
}

/// Insert or overwrite the execution row.
pub fn save_execution(pool: &Pool, exec: &TestExecution) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR REPLACE INTO executions (id, project_id, target_url, status, total_tests,
            passed, failed, warnings, error, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            exec.id,
            exec.project_id,
            exec.target_url,
            exec.status.as_str(),
            exec.total_tests,
            exec.passed,
            exec.failed,
            exec.warnings,
            exec.error,
            exec.started_at.to_rfc3339(),
            exec.finished_at.map(|t| t.to_rfc3339()),
        ],
    )
    .with_context(|| format!("Failed to save execution {}", exec.id))?;
    Ok(())
}

/// Store every result of one execution in a single transaction, keeping order.
pub fn save_results(pool: &Pool, execution_id: &str, results: &[TestResult]) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO test_results (execution_id, position, test_type, status, message,
                duration_ms, details_json, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (position, result) in results.iter().enumerate() {
            stmt.execute(params![
                execution_id,
                position as i64,
                result.test_type.as_str(),
                result.status.as_str(),
                result.message,
                result.duration_ms as i64,
                serde_json::to_string(&result.details)?,
                result.error,
            ])?;
        }
    }
    tx.commit().context("Failed to commit test results")?;
    Ok(())
}

pub fn save_performance_metric(pool: &Pool, metric: &PerformanceMetric) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO performance_metrics (execution_id, page_url, page_load_time_ms,
            first_contentful_paint_ms, dom_content_loaded_ms, resource_count, total_size_kb)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            metric.execution_id,
            metric.page_url,
            metric.page_load_time_ms,
            metric.first_contentful_paint_ms,
            metric.dom_content_loaded_ms,
            metric.resource_count as i64,
            metric.total_size_kb,
        ],
    )
    .context("Failed to save performance metric")?;
    Ok(())
}

const EXECUTION_COLUMNS: &str = "id, project_id, target_url, status, total_tests, passed, failed,
    warnings, error, started_at, finished_at";

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<TestExecution> {
    let status: String = row.get(3)?;
    let started_at: Option<String> = row.get(9)?;
    Ok(TestExecution {
        id: row.get(0)?,
        project_id: row.get(1)?,
        target_url: row.get(2)?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        total_tests: row.get(4)?,
        passed: row.get(5)?,
        failed: row.get(6)?,
        warnings: row.get(7)?,
        error: row.get(8)?,
        started_at: parse_timestamp(started_at).unwrap_or_default(),
        finished_at: parse_timestamp(row.get(10)?),
    })
}

pub fn load_execution(pool: &Pool, id: &str) -> Result<Option<TestExecution>> {
    let conn = pool.get()?;
    let exec = conn
        .query_row(
            &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
            params![id],
            execution_from_row,
        )
        .optional()?;
    Ok(exec)
}

/// Most recent executions first, optionally for one project.
pub fn list_executions(pool: &Pool, project_id: Option<&str>, limit: usize) -> Result<Vec<TestExecution>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM executions
         WHERE (?1 IS NULL OR project_id = ?1)
         ORDER BY started_at DESC, id
         LIMIT ?2",
        EXECUTION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], execution_from_row)?;

    let mut executions = Vec::new();
    for r in rows {
        executions.push(r?);
    }
    Ok(executions)
}

pub fn load_results(pool: &Pool, execution_id: &str) -> Result<Vec<TestResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT test_type, status, message, duration_ms, details_json, error_message
         FROM test_results WHERE execution_id = ?1 ORDER BY position",
    )?;

    let rows = stmt.query_map([execution_id], |row| {
        let test_type: String = row.get(0)?;
        let status: String = row.get(1)?;
        let duration_ms: i64 = row.get(3)?;
        let details_json: String = row.get(4)?;
        Ok((test_type, status, row.get::<_, String>(2)?, duration_ms, details_json, row.get::<_, Option<String>>(5)?))
    })?;

    let mut results = Vec::new();
    for r in rows {
        let (test_type, status, message, duration_ms, details_json, error) = r?;
        let test_type: TestType = test_type
            .parse()
            .with_context(|| format!("corrupt result row for execution {}", execution_id))?;
        results.push(TestResult {
            test_type,
            status: TestStatus::parse(&status).unwrap_or(TestStatus::Failed),
            message,
            duration_ms: duration_ms.max(0) as u64,
            details: serde_json::from_str(&details_json).unwrap_or_default(),
            error,
        });
    }
    Ok(results)
}

pub fn load_performance_metrics(pool: &Pool, execution_id: &str) -> Result<Vec<PerformanceMetric>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT execution_id, page_url, page_load_time_ms, first_contentful_paint_ms,
                dom_content_loaded_ms, resource_count, total_size_kb
         FROM performance_metrics WHERE execution_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([execution_id], |row| {
        let resource_count: i64 = row.get(5)?;
        Ok(PerformanceMetric {
            execution_id: row.get(0)?,
            page_url: row.get(1)?,
            page_load_time_ms: row.get(2)?,
            first_contentful_paint_ms: row.get(3)?,
            dom_content_loaded_ms: row.get(4)?,
            resource_count: resource_count.max(0) as u64,
            total_size_kb: row.get(6)?,
        })
    })?;

    let mut metrics = Vec::new();
    for r in rows {
        metrics.push(r?);
    }
    Ok(metrics)
}
