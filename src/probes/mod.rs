//! Diagnostic probes run against a live page session.
//!
//! Every probe reports through the same [`TestResult`] shape and the same
//! severity banding, so the coordinator can count outcomes without knowing
//! which probe produced them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bugs::Finding;
use crate::links::LinkValidator;
use crate::session::PageSession;

pub mod accessibility;
pub mod console;
pub mod forms;
pub mod functional;
pub mod links;
pub mod performance;

/// Findings above this count turn a probe `failed` (accessibility, forms, console).
pub const VIOLATION_FAIL_THRESHOLD: usize = 5;

/// Broken links above this count turn the link probe `failed`.
pub const BROKEN_LINK_FAIL_THRESHOLD: usize = 3;

/// Page loads slower than this are flagged as a warning.
pub const SLOW_LOAD_THRESHOLD_MS: f64 = 5000.0;

/// The closed set of probe kinds.
///
/// Declaration order is the pipeline order: probes that rely on an already
/// loaded page come first, the console probe re-navigates and runs last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Functional,
    Performance,
    Accessibility,
    BrokenLinks,
    FormValidation,
    ConsoleErrors,
}

impl TestType {
    pub const ALL: [TestType; 6] = [
        TestType::Functional,
        TestType::Performance,
        TestType::Accessibility,
        TestType::BrokenLinks,
        TestType::FormValidation,
        TestType::ConsoleErrors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Functional => "functional",
            TestType::Performance => "performance",
            TestType::Accessibility => "accessibility",
            TestType::BrokenLinks => "broken_links",
            TestType::FormValidation => "form_validation",
            TestType::ConsoleErrors => "console_errors",
        }
    }

    /// The default suite for an ad-hoc run.
    pub fn default_suite() -> Vec<TestType> {
        vec![
            TestType::Functional,
            TestType::Performance,
            TestType::Accessibility,
            TestType::BrokenLinks,
            TestType::FormValidation,
        ]
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown test type '{0}'")]
pub struct UnknownTestType(pub String);

impl std::str::FromStr for TestType {
    type Err = UnknownTestType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| UnknownTestType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Warning => "warning",
            TestStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "warning" => Some(TestStatus::Warning),
            "skipped" => Some(TestStatus::Skipped),
            _ => None,
        }
    }
}

/// Uniform severity banding: 0 passes, 1..=`fail_above` warns, more fails.
pub fn band(count: usize, fail_above: usize) -> TestStatus {
    if count > fail_above {
        TestStatus::Failed
    } else if count > 0 {
        TestStatus::Warning
    } else {
        TestStatus::Passed
    }
}

/// Outcome of a single probe invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_type: TestType,
    pub status: TestStatus,
    pub message: String,
    pub duration_ms: u64,
    pub details: Map<String, Value>,
    pub error: Option<String>,
}

impl TestResult {
    pub fn new(test_type: TestType, status: TestStatus, message: impl Into<String>) -> Self {
        Self {
            test_type,
            status,
            message: message.into(),
            duration_ms: 0,
            details: Map::new(),
            error: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn skipped(test_type: TestType, reason: &str) -> Self {
        Self::new(test_type, TestStatus::Skipped, reason)
    }

    fn failure(test_type: TestType, duration_ms: u64, error: &anyhow::Error) -> Self {
        Self {
            test_type,
            status: TestStatus::Failed,
            message: format!("{} test failed", test_type),
            duration_ms,
            details: Map::new(),
            error: Some(format!("{:#}", error)),
        }
    }
}

/// What a probe hands back: the result plus raw findings for the bug normalizer.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: TestResult,
    pub findings: Vec<Finding>,
}

impl ProbeOutcome {
    pub fn new(result: TestResult) -> Self {
        Self {
            result,
            findings: Vec::new(),
        }
    }

    pub fn with_findings(result: TestResult, findings: Vec<Finding>) -> Self {
        Self { result, findings }
    }
}

/// Trait for all page probes
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn test_type(&self) -> TestType;

    /// Run the check. Errors are turned into a `failed` result by [`run_probe`].
    async fn check(&self, session: &mut dyn PageSession, target: &str) -> Result<ProbeOutcome>;
}

/// Run a probe, stamping wall-clock duration and absorbing any error.
pub async fn run_probe(probe: &dyn Probe, session: &mut dyn PageSession, target: &str) -> ProbeOutcome {
    let test_type = probe.test_type();
    let start = Instant::now();
    let outcome = probe.check(session, target).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(mut outcome) => {
            outcome.result.duration_ms = duration_ms;
            debug!(test = %test_type, status = outcome.result.status.as_str(), duration_ms, "Probe finished");
            outcome
        }
        Err(e) => {
            warn!(test = %test_type, duration_ms, "Probe failed: {:#}", e);
            ProbeOutcome::new(TestResult::failure(test_type, duration_ms, &e))
        }
    }
}

/// Dispatch table from test type to probe, built once at startup.
pub struct ProbeRegistry {
    probes: BTreeMap<TestType, Box<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn empty() -> Self {
        Self {
            probes: BTreeMap::new(),
        }
    }

    /// Every built-in probe, with link checks going through `validator`.
    pub fn standard(validator: LinkValidator) -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(functional::FunctionalProbe));
        registry.register(Box::new(performance::PerformanceProbe));
        registry.register(Box::new(accessibility::AccessibilityProbe));
        registry.register(Box::new(links::BrokenLinksProbe::new(validator)));
        registry.register(Box::new(forms::FormValidationProbe));
        registry.register(Box::new(console::ConsoleErrorProbe));
        registry
    }

    pub fn register(&mut self, probe: Box<dyn Probe>) {
        self.probes.insert(probe.test_type(), probe);
    }

    pub fn get(&self, test_type: TestType) -> Option<&dyn Probe> {
        self.probes.get(&test_type).map(|p| p.as_ref())
    }

    /// Order a requested subset into pipeline order, dropping duplicates.
    pub fn plan(requested: &[TestType]) -> Vec<TestType> {
        let mut plan = requested.to_vec();
        plan.sort();
        plan.dedup();
        plan
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.probes.keys()).finish()
    }
}

/// Pull an array out of an evaluate() payload, tolerating `null`.
pub(crate) fn json_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::ScriptedSession;

    #[test]
    fn test_band_thresholds() {
        assert_eq!(band(0, VIOLATION_FAIL_THRESHOLD), TestStatus::Passed);
        assert_eq!(band(1, VIOLATION_FAIL_THRESHOLD), TestStatus::Warning);
        assert_eq!(band(5, VIOLATION_FAIL_THRESHOLD), TestStatus::Warning);
        assert_eq!(band(6, VIOLATION_FAIL_THRESHOLD), TestStatus::Failed);

        assert_eq!(band(3, BROKEN_LINK_FAIL_THRESHOLD), TestStatus::Warning);
        assert_eq!(band(4, BROKEN_LINK_FAIL_THRESHOLD), TestStatus::Failed);
    }

    #[test]
    fn test_type_round_trips_through_str() {
        for t in TestType::ALL {
            assert_eq!(t.as_str().parse::<TestType>().unwrap(), t);
        }
        assert!("visual_regression".parse::<TestType>().is_err());
    }

    #[test]
    fn test_plan_orders_console_last_and_dedups() {
        let plan = ProbeRegistry::plan(&[
            TestType::ConsoleErrors,
            TestType::Accessibility,
            TestType::Functional,
            TestType::Accessibility,
        ]);
        assert_eq!(
            plan,
            vec![TestType::Functional, TestType::Accessibility, TestType::ConsoleErrors]
        );
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl Probe for Exploding {
        fn test_type(&self) -> TestType {
            TestType::Functional
        }

        async fn check(&self, session: &mut dyn PageSession, target: &str) -> Result<ProbeOutcome> {
            session
                .navigate(target, crate::session::WaitPolicy::Load)
                .await?;
            anyhow::bail!("element detached")
        }
    }

    #[tokio::test]
    async fn test_run_probe_converts_errors_to_failed_result() {
        let mut session = ScriptedSession::new();
        let outcome = run_probe(&Exploding, &mut session, "https://example.com").await;

        assert_eq!(outcome.result.status, TestStatus::Failed);
        assert_eq!(outcome.result.error.as_deref(), Some("element detached"));
        assert!(outcome.findings.is_empty());
        assert_eq!(session.navigations(), vec!["https://example.com".to_string()]);
    }
}
