//! Execution record and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probes::{TestResult, TestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Created => "created",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ExecutionStatus::Created),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("execution cannot move from {from} to {to}")]
    Illegal {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("results can only be recorded while running (status is {0})")]
    NotRunning(ExecutionStatus),
}

/// One run of a probe set against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecution {
    pub id: String,
    pub project_id: String,
    pub target_url: String,
    pub status: ExecutionStatus,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub warnings: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestExecution {
    pub fn new(project_id: &str, target_url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            target_url: target_url.to_string(),
            status: ExecutionStatus::Created,
            total_tests: 0,
            passed: 0,
            failed: 0,
            warnings: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), TransitionError> {
        let legal = matches!(
            (self.status, to),
            (ExecutionStatus::Created, ExecutionStatus::Running)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Created | ExecutionStatus::Running, ExecutionStatus::Failed)
        );
        if !legal {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Utc::now();
        Ok(())
    }

    /// Fold one result into the counters. Skipped results are not counted.
    pub fn record(&mut self, result: &TestResult) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Running {
            return Err(TransitionError::NotRunning(self.status));
        }
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Warning => self.warnings += 1,
            TestStatus::Skipped => return Ok(()),
        }
        self.total_tests += 1;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Completed)
    }

    /// Terminal failure: counters are reset to a single failure.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Failed)?;
        self.total_tests = 0;
        self.passed = 0;
        self.warnings = 0;
        self.failed = 1;
        self.error = Some(error.into());
        Ok(())
    }

    /// `total == passed + failed + warnings`
    pub fn is_consistent(&self) -> bool {
        self.total_tests == self.passed + self.failed + self.warnings
    }
}
