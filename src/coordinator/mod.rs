//! Run coordinator: one page session, probes in pipeline order, one
//! execution record.

pub mod execution;
pub mod sweep;

pub use self::execution::{ExecutionStatus, TestExecution, TransitionError};

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bugs::{normalize_all, Bug, BugStore, Finding, PageContext};
use crate::probes::performance::PageTiming;
use crate::probes::{run_probe, ProbeRegistry, TestResult, TestStatus, TestType};
use crate::report;
use crate::scheduler::RunCallback;
use crate::session::{PageSession, SessionFactory};
use crate::storage::executions::{self, PerformanceMetric};
use crate::storage::Pool;

/// Everything one suite run produced.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub execution: TestExecution,
    pub results: Vec<TestResult>,
    pub bugs: Vec<Bug>,
    pub bugs_saved: usize,
}

struct RunArtifacts {
    results: Vec<TestResult>,
    findings: Vec<Finding>,
    page_url: String,
}

pub struct RunCoordinator {
    pool: Pool,
    registry: Arc<ProbeRegistry>,
    sessions: Arc<dyn SessionFactory>,
    browser: String,
    report_dir: Option<PathBuf>,
}

impl RunCoordinator {
    pub fn new(
        pool: Pool,
        registry: Arc<ProbeRegistry>,
        sessions: Arc<dyn SessionFactory>,
        browser: &str,
    ) -> Self {
        Self {
            pool,
            registry,
            sessions,
            browser: browser.to_string(),
            report_dir: None,
        }
    }

    /// Write JSON/HTML/Markdown reports into `dir` after every completed run.
    pub fn with_report_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.report_dir = dir;
        self
    }

    /// Run `test_types` (deduplicated, pipeline order) against `base_url`.
    ///
    /// Probe failures become failed results. Anything else that goes wrong
    /// fails the execution, persists a failure record and is returned.
    pub async fn run_suite(&self, project_id: &str, base_url: &str, test_types: &[TestType]) -> Result<SuiteOutcome> {
        let mut execution = TestExecution::new(project_id, base_url);
        execution.start()?;
        info!(execution_id = %execution.id, project = %project_id, target = %base_url, "Test execution started");

        let artifacts = match self.drive(base_url, test_types).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(execution_id = %execution.id, "Test execution failed: {}", message);
                if let Err(t) = execution.fail(message) {
                    warn!(execution_id = %execution.id, "{}", t);
                }
                if let Err(pe) = executions::save_execution(&self.pool, &execution) {
                    error!(execution_id = %execution.id, "Failed to persist failure record: {:#}", pe);
                }
                return Err(e.context(format!("execution {} failed", execution.id)));
            }
        };

        for result in &artifacts.results {
            execution.record(result)?;
        }
        execution.complete()?;

        let ctx = PageContext {
            page_url: &artifacts.page_url,
            browser: &self.browser,
        };
        let bugs = normalize_all(&artifacts.findings, &ctx);
        let bugs_saved = self.persist(&execution, &artifacts, &bugs);

        info!(
            execution_id = %execution.id,
            total = execution.total_tests,
            passed = execution.passed,
            failed = execution.failed,
            warnings = execution.warnings,
            bugs = bugs.len(),
            "Test execution completed"
        );

        Ok(SuiteOutcome {
            execution,
            results: artifacts.results,
            bugs,
            bugs_saved,
        })
    }

    async fn drive(&self, base_url: &str, test_types: &[TestType]) -> Result<RunArtifacts> {
        let mut session = self
            .sessions
            .open()
            .await
            .context("Failed to acquire page session")?;

        let artifacts = self.run_probes(session.as_mut(), base_url, test_types).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close page session: {}", e);
        }
        Ok(artifacts)
    }

    async fn run_probes(&self, session: &mut dyn PageSession, base_url: &str, test_types: &[TestType]) -> RunArtifacts {
        let mut results = Vec::new();
        let mut findings = Vec::new();

        for test_type in ProbeRegistry::plan(test_types) {
            let Some(probe) = self.registry.get(test_type) else {
                warn!(test = %test_type, "No probe registered");
                results.push(TestResult::skipped(test_type, "No probe registered for this test type"));
                continue;
            };
            info!(test = %test_type, "Running probe");
            let outcome = run_probe(probe, session, base_url).await;
            results.push(outcome.result);
            findings.extend(outcome.findings);
        }

        match sweep::run(session, base_url).await {
            Ok(report) => findings.extend(report.findings),
            Err(e) => warn!(target = %base_url, "Diagnostic sweep skipped: {}", e),
        }

        RunArtifacts {
            results,
            findings,
            page_url: session.current_url().unwrap_or(base_url).to_string(),
        }
    }

    /// Best-effort persistence. Failures are logged, never returned.
    fn persist(&self, execution: &TestExecution, artifacts: &RunArtifacts, bugs: &[Bug]) -> usize {
        let id = &execution.id;

        if let Err(e) = executions::save_execution(&self.pool, execution) {
            error!(execution_id = %id, "Failed to save execution: {:#}", e);
        }
        if let Err(e) = executions::save_results(&self.pool, id, &artifacts.results) {
            error!(execution_id = %id, "Failed to save test results: {:#}", e);
        }

        let timing = artifacts
            .results
            .iter()
            .find(|r| r.test_type == TestType::Performance && r.status != TestStatus::Failed)
            .and_then(|r| PageTiming::from_details(&r.details));
        if let Some(timing) = timing {
            let metric = PerformanceMetric {
                execution_id: id.clone(),
                page_url: artifacts.page_url.clone(),
                page_load_time_ms: timing.load_event_end,
                first_contentful_paint_ms: timing.fcp,
                dom_content_loaded_ms: timing.dom_content_loaded,
                resource_count: timing.resource_count,
                total_size_kb: timing.total_size_kb,
            };
            if let Err(e) = executions::save_performance_metric(&self.pool, &metric) {
                error!(execution_id = %id, "Failed to save performance metric: {:#}", e);
            }
        }

        let saved = BugStore::new(self.pool.clone()).record_all(&execution.project_id, id, bugs);

        if let Some(dir) = &self.report_dir {
            if let Err(e) = report::write_reports(&self.pool, id, dir, Utc::now()) {
                error!(execution_id = %id, "Failed to write reports: {}", e);
            }
        }
        saved
    }
}

#[async_trait::async_trait]
impl RunCallback for RunCoordinator {
    async fn run(&self, project_id: &str, base_url: &str, test_types: &[TestType]) -> Result<()> {
        self.run_suite(project_id, base_url, test_types).await.map(|_| ())
    }
}
