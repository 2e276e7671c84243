use super::{Probe, ProbeOutcome, TestResult, TestStatus, TestType, SLOW_LOAD_THRESHOLD_MS};
use crate::bugs::Finding;
use crate::session::PageSession;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Navigation, paint and resource timing in one round trip.
pub const TIMING_SCRIPT: &str = r#"() => {
    const nav = performance.getEntriesByType('navigation')[0] || {};
    const paint = performance.getEntriesByType('paint');
    const resources = performance.getEntriesByType('resource');
    const fcp = paint.find(p => p.name === 'first-contentful-paint');
    return {
        domContentLoaded: nav.domContentLoadedEventEnd || 0,
        loadEventEnd: nav.loadEventEnd || 0,
        fcp: fcp ? fcp.startTime : 0,
        resourceCount: resources.length,
        totalSizeKb: resources.reduce((sum, r) => sum + (r.transferSize || 0), 0) / 1024
    };
}"#;

/// Timing figures as reported by the page, all in milliseconds except size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageTiming {
    pub dom_content_loaded: f64,
    pub load_event_end: f64,
    pub fcp: f64,
    pub resource_count: u64,
    pub total_size_kb: f64,
}

impl PageTiming {
    /// Recover timing from a performance result's details.
    pub fn from_details(details: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(details.clone())).ok()
    }

    fn into_details(self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("timing serialized to {}", other),
        }
    }
}

/// Reads the browser's own timing for the page the previous probe loaded.
pub struct PerformanceProbe;

#[async_trait::async_trait]
impl Probe for PerformanceProbe {
    fn test_type(&self) -> TestType {
        TestType::Performance
    }

    async fn check(&self, session: &mut dyn PageSession, _target: &str) -> Result<ProbeOutcome> {
        let raw = session.evaluate(TIMING_SCRIPT).await?;
        let timing: PageTiming =
            serde_json::from_value(raw).context("Unexpected timing payload")?;

        let slow = timing.load_event_end > SLOW_LOAD_THRESHOLD_MS;
        let status = if slow { TestStatus::Warning } else { TestStatus::Passed };
        let load_time_ms = timing.load_event_end;

        let mut result = TestResult::new(TestType::Performance, status, "Performance test completed");
        result.details = timing.into_details()?;

        let findings = if slow {
            vec![Finding::SlowPage { load_time_ms }]
        } else {
            Vec::new()
        };
        Ok(ProbeOutcome::with_findings(result, findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::run_probe;
    use crate::session::scripted::ScriptedSession;
    use serde_json::json;

    fn session_with_load(load: f64) -> ScriptedSession {
        ScriptedSession::new().with_script(
            TIMING_SCRIPT,
            json!({
                "domContentLoaded": 800.5,
                "loadEventEnd": load,
                "fcp": 420.0,
                "resourceCount": 31,
                "totalSizeKb": 912.25
            }),
        )
    }

    #[tokio::test]
    async fn test_fast_page_passes() {
        let mut session = session_with_load(1200.0);
        let outcome = run_probe(&PerformanceProbe, &mut session, "https://example.com").await;

        assert_eq!(outcome.result.status, TestStatus::Passed);
        assert!(outcome.findings.is_empty());
        let timing = PageTiming::from_details(&outcome.result.details).unwrap();
        assert_eq!(timing.resource_count, 31);
        assert_eq!(timing.fcp, 420.0);
    }

    #[tokio::test]
    async fn test_slow_page_warns_and_reports() {
        let mut session = session_with_load(5000.1);
        let outcome = run_probe(&PerformanceProbe, &mut session, "https://example.com").await;

        assert_eq!(outcome.result.status, TestStatus::Warning);
        assert_eq!(outcome.findings, vec![Finding::SlowPage { load_time_ms: 5000.1 }]);
    }

    #[tokio::test]
    async fn test_exactly_at_threshold_passes() {
        let mut session = session_with_load(5000.0);
        let outcome = run_probe(&PerformanceProbe, &mut session, "https://example.com").await;
        assert_eq!(outcome.result.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_zero() {
        let mut session = ScriptedSession::new().with_script(TIMING_SCRIPT, json!({"resourceCount": 2}));
        let outcome = run_probe(&PerformanceProbe, &mut session, "https://example.com").await;
        assert_eq!(outcome.result.status, TestStatus::Passed);
        assert_eq!(outcome.result.details["loadEventEnd"], 0.0);
    }
}
