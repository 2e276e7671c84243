//! Report aggregation over persisted execution records.
//!
//! Every output format is a pure function of [`ReportData`] plus the
//! generation timestamp the caller passes in.

pub mod render;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::bugs::{BugRecord, BugStore, Severity};
use crate::coordinator::TestExecution;
use crate::probes::{TestResult, TestStatus};
use crate::storage::executions::{self, PerformanceMetric};
use crate::storage::Pool;

/// Bugs listed in the HTML report; the rest only appear in the counts.
pub const HTML_BUG_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("execution {0} not found")]
    NotFound(String),

    #[error("unknown report format '{0}' (expected json, html or markdown)")]
    UnknownFormat(String),

    #[error("template rendering failed: {0}")]
    Render(#[from] askama::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Html,
    Markdown,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 3] = [ReportFormat::Json, ReportFormat::Html, ReportFormat::Markdown];

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
            ReportFormat::Markdown => "md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Html => "text/html; charset=utf-8",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Everything persisted for one execution.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub execution: TestExecution,
    pub results: Vec<TestResult>,
    pub bugs: Vec<BugRecord>,
    pub metrics: Vec<PerformanceMetric>,
}

impl ReportData {
    pub fn load(pool: &Pool, execution_id: &str) -> Result<Self, ReportError> {
        let execution = executions::load_execution(pool, execution_id)?
            .ok_or_else(|| ReportError::NotFound(execution_id.to_string()))?;
        let results = executions::load_results(pool, execution_id)?;
        let bugs = BugStore::new(pool.clone()).list_for_execution(execution_id)?;
        let metrics = executions::load_performance_metrics(pool, execution_id)?;

        Ok(Self {
            execution,
            results,
            bugs,
            metrics,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub project_id: String,
    pub target_url: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<i64>,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub warnings: u32,
    pub pass_rate: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub warning: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugSummary {
    pub total_bugs: usize,
    pub severity_breakdown: BTreeMap<String, usize>,
    pub type_breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceSummary {
    pub total_pages_tested: usize,
    pub average_load_time_ms: u64,
    pub average_fcp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub execution: ExecutionSummary,
    pub tests_by_type: BTreeMap<String, StatusCounts>,
    pub bugs: BugSummary,
    pub performance: PerformanceSummary,
}

impl Summary {
    /// Bug counts most severe first, including zero rows.
    pub fn severity_rows(&self) -> Vec<(&'static str, usize)> {
        Severity::DESCENDING
            .iter()
            .map(|s| (s.as_str(), self.bugs.severity_breakdown.get(s.as_str()).copied().unwrap_or(0)))
            .collect()
    }
}

fn pass_rate(passed: u32, total: u32) -> f64 {
    f64::from(passed) / f64::from(total.max(1)) * 100.0
}

pub fn summarize(data: &ReportData) -> Summary {
    let exec = &data.execution;

    let mut tests_by_type: BTreeMap<String, StatusCounts> = BTreeMap::new();
    for result in &data.results {
        let counts = tests_by_type.entry(result.test_type.to_string()).or_default();
        match result.status {
            TestStatus::Passed => counts.passed += 1,
            TestStatus::Failed => counts.failed += 1,
            TestStatus::Warning => counts.warning += 1,
            TestStatus::Skipped => counts.skipped += 1,
        }
    }

    let mut severity_breakdown: BTreeMap<String, usize> = Severity::DESCENDING
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut type_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for record in &data.bugs {
        *severity_breakdown.entry(record.bug.severity.as_str().to_string()).or_default() += 1;
        *type_breakdown.entry(record.bug.bug_type.as_str().to_string()).or_default() += 1;
    }

    let pages = data.metrics.len();
    let average = |f: fn(&PerformanceMetric) -> f64| -> u64 {
        if pages == 0 {
            return 0;
        }
        (data.metrics.iter().map(f).sum::<f64>() / pages as f64) as u64
    };

    Summary {
        execution: ExecutionSummary {
            execution_id: exec.id.clone(),
            project_id: exec.project_id.clone(),
            target_url: exec.target_url.clone(),
            status: exec.status.to_string(),
            started_at: exec.started_at.to_rfc3339(),
            finished_at: exec.finished_at.map(|t| t.to_rfc3339()),
            duration_seconds: exec.finished_at.map(|end| (end - exec.started_at).num_seconds()),
            total_tests: exec.total_tests,
            passed: exec.passed,
            failed: exec.failed,
            warnings: exec.warnings,
            pass_rate: pass_rate(exec.passed, exec.total_tests),
            error: exec.error.clone(),
        },
        tests_by_type,
        bugs: BugSummary {
            total_bugs: data.bugs.len(),
            severity_breakdown,
            type_breakdown,
        },
        performance: PerformanceSummary {
            total_pages_tested: pages,
            average_load_time_ms: average(|m| m.page_load_time_ms),
            average_fcp_ms: average(|m| m.first_contentful_paint_ms),
        },
    }
}

/// Render one format.
pub fn generate(data: &ReportData, format: ReportFormat, generated_at: DateTime<Utc>) -> Result<String, ReportError> {
    let summary = summarize(data);
    match format {
        ReportFormat::Json => render::json(data, &summary, generated_at),
        ReportFormat::Html => render::html(data, &summary, generated_at),
        ReportFormat::Markdown => render::markdown(data, &summary, generated_at),
    }
}

/// Write `<execution_id>.{json,html,md}` into `dir`.
pub fn write_reports(
    pool: &Pool,
    execution_id: &str,
    dir: &Path,
    generated_at: DateTime<Utc>,
) -> Result<Vec<PathBuf>, ReportError> {
    let data = ReportData::load(pool, execution_id)?;
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("failed to create report directory {}: {}", dir.display(), e))?;

    let mut written = Vec::new();
    for format in ReportFormat::ALL {
        let path = dir.join(format!("{}.{}", execution_id, format.extension()));
        let body = generate(&data, format, generated_at)?;
        std::fs::write(&path, body)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
        written.push(path);
    }
    info!(%execution_id, dir = %dir.display(), "Reports written");
    Ok(written)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::bugs::{normalize, Finding, PageContext};
    use crate::probes::TestType;
    use crate::session::ConsoleLevel;
    use crate::storage::executions::{save_execution, save_performance_metric, save_results};

    /// Persist a small completed execution and return its id.
    pub(crate) fn seed(pool: &Pool, bug_count: usize) -> String {
        let results = vec![
            TestResult::new(TestType::Functional, TestStatus::Passed, "ok"),
            TestResult::new(TestType::Accessibility, TestStatus::Warning, "2 issues"),
            TestResult::new(TestType::BrokenLinks, TestStatus::Failed, "4 broken"),
        ];
        let mut exec = TestExecution::new("shop", "https://shop.example/");
        exec.start().unwrap();
        for r in &results {
            exec.record(r).unwrap();
        }
        exec.complete().unwrap();
        save_execution(pool, &exec).unwrap();
        save_results(pool, &exec.id, &results).unwrap();
        save_performance_metric(
            pool,
            &PerformanceMetric {
                execution_id: exec.id.clone(),
                page_url: "https://shop.example/".to_string(),
                page_load_time_ms: 2100.0,
                first_contentful_paint_ms: 640.0,
                dom_content_loaded_ms: 900.0,
                resource_count: 18,
                total_size_kb: 512.0,
            },
        )
        .unwrap();

        let ctx = PageContext {
            page_url: "https://shop.example/",
            browser: "chrome",
        };
        let store = BugStore::new(pool.clone());
        for i in 0..bug_count {
            let finding = if i % 2 == 0 {
                Finding::Network {
                    url: format!("https://shop.example/api/{}", i),
                    status: 500,
                }
            } else {
                Finding::Console {
                    level: ConsoleLevel::Warning,
                    text: format!("<script>warning {}</script>", i),
                    location: None,
                }
            };
            store.record("shop", &exec.id, &normalize(&finding, &ctx)).unwrap();
        }
        exec.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::temp_pool;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_summary_counts() {
        let (_dir, pool) = temp_pool();
        let id = fixtures::seed(&pool, 3);
        let summary = summarize(&ReportData::load(&pool, &id).unwrap());

        assert_eq!(summary.execution.total_tests, 3);
        assert!((summary.execution.pass_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.bugs.total_bugs, 3);
        assert_eq!(summary.bugs.severity_breakdown["critical"], 2);
        assert_eq!(summary.bugs.severity_breakdown["low"], 1);
        assert_eq!(summary.bugs.severity_breakdown["info"], 0);
        assert_eq!(summary.bugs.type_breakdown["network_error"], 2);
        assert_eq!(summary.tests_by_type["broken_links"].failed, 1);
        assert_eq!(summary.performance.average_load_time_ms, 2100);
        assert_eq!(summary.severity_rows()[0], ("critical", 2));
    }

    #[test]
    fn test_pass_rate_with_no_tests_is_zero() {
        assert_eq!(pass_rate(0, 0), 0.0);
    }

    #[test]
    fn test_regeneration_is_byte_identical() {
        let (_dir, pool) = temp_pool();
        let id = fixtures::seed(&pool, 4);

        for format in ReportFormat::ALL {
            let first = generate(&ReportData::load(&pool, &id).unwrap(), format, fixed_time()).unwrap();
            let second = generate(&ReportData::load(&pool, &id).unwrap(), format, fixed_time()).unwrap();
            assert_eq!(first, second, "{:?} output drifted", format);
        }
    }

    #[test]
    fn test_missing_execution_is_not_found() {
        let (_dir, pool) = temp_pool();
        assert!(matches!(
            ReportData::load(&pool, "missing"),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!(matches!("pdf".parse::<ReportFormat>(), Err(ReportError::UnknownFormat(_))));
    }

    #[test]
    fn test_write_reports_creates_three_files() {
        let (dir, pool) = temp_pool();
        let id = fixtures::seed(&pool, 1);
        let out = dir.path().join("reports");

        let written = write_reports(&pool, &id, &out, fixed_time()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));
        assert!(out.join(format!("{}.md", id)).exists());
    }
}
