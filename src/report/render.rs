use askama::Template;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ReportData, ReportError, Summary, HTML_BUG_LIMIT};
use crate::bugs::BugRecord;
use crate::probes::TestResult;
use crate::storage::executions::PerformanceMetric;

#[derive(Serialize)]
struct JsonReport<'a> {
    execution_summary: &'a super::ExecutionSummary,
    tests_by_type: &'a std::collections::BTreeMap<String, super::StatusCounts>,
    bug_summary: &'a super::BugSummary,
    performance_summary: &'a super::PerformanceSummary,
    test_results: &'a [TestResult],
    bugs: &'a [BugRecord],
    performance_metrics: &'a [PerformanceMetric],
    generated_at: String,
}

pub fn json(data: &ReportData, summary: &Summary, generated_at: DateTime<Utc>) -> Result<String, ReportError> {
    let report = JsonReport {
        execution_summary: &summary.execution,
        tests_by_type: &summary.tests_by_type,
        bug_summary: &summary.bugs,
        performance_summary: &summary.performance,
        test_results: &data.results,
        bugs: &data.bugs,
        performance_metrics: &data.metrics,
        generated_at: generated_at.to_rfc3339(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[derive(Template)]
#[template(path = "report.html")]
struct HtmlReport<'a> {
    summary: &'a Summary,
    pass_rate: String,
    error: String,
    severity_rows: Vec<(&'static str, usize)>,
    bugs: &'a [BugRecord],
    hidden_bugs: usize,
    generated_at: String,
}

#[derive(Template)]
#[template(path = "report.md", escape = "none")]
struct MarkdownReport<'a> {
    summary: &'a Summary,
    pass_rate: String,
    error: String,
    severity_rows: Vec<(&'static str, usize)>,
    bugs: &'a [BugRecord],
    generated_at: String,
}

fn display_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn html(data: &ReportData, summary: &Summary, generated_at: DateTime<Utc>) -> Result<String, ReportError> {
    let shown = data.bugs.len().min(HTML_BUG_LIMIT);
    let page = HtmlReport {
        summary,
        pass_rate: format!("{:.1}", summary.execution.pass_rate),
        error: summary.execution.error.clone().unwrap_or_default(),
        severity_rows: summary.severity_rows(),
        bugs: &data.bugs[..shown],
        hidden_bugs: data.bugs.len() - shown,
        generated_at: display_time(generated_at),
    };
    Ok(page.render()?)
}

pub fn markdown(data: &ReportData, summary: &Summary, generated_at: DateTime<Utc>) -> Result<String, ReportError> {
    let page = MarkdownReport {
        summary,
        pass_rate: format!("{:.1}", summary.execution.pass_rate),
        error: summary.execution.error.clone().unwrap_or_default(),
        severity_rows: summary.severity_rows(),
        bugs: &data.bugs,
        generated_at: display_time(generated_at),
    };
    Ok(page.render()?)
}
