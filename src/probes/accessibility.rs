use super::{band, json_array, Probe, ProbeOutcome, TestResult, TestType, VIOLATION_FAIL_THRESHOLD};
use crate::bugs::finding::ViolationKind;
use crate::session::PageSession;
use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

pub const VIOLATIONS_SCRIPT: &str = r#"() => {
    const violations = [];
    document.querySelectorAll('img').forEach(img => {
        if (!img.alt || img.alt.trim() === '') {
            violations.push({type: 'missing_alt_text', element: 'img'});
        }
    });
    document.querySelectorAll('button').forEach(btn => {
        if (!btn.textContent.trim() && !btn.getAttribute('aria-label')) {
            violations.push({type: 'missing_button_label', element: 'button'});
        }
    });
    document.querySelectorAll('input').forEach(input => {
        const label = input.id ? document.querySelector(`label[for="${input.id}"]`) : null;
        if (!label && !input.getAttribute('aria-label')) {
            violations.push({type: 'missing_form_label', element: 'input'});
        }
    });
    let lastLevel = 0;
    document.querySelectorAll('h1, h2, h3, h4, h5, h6').forEach(h => {
        const level = parseInt(h.tagName[1]);
        if (level - lastLevel > 1) {
            violations.push({type: 'heading_level_skip', element: h.tagName});
        }
        lastLevel = level;
    });
    return violations;
}"#;

/// WCAG basics: alt text, control labels, heading order.
///
/// Violations only band the result. Bugs for them are filed by the
/// diagnostic sweep, which runs on every suite.
pub struct AccessibilityProbe;

fn parse_violation(entry: &Value) -> Option<(ViolationKind, String)> {
    let kind = ViolationKind::parse(entry.get("type")?.as_str()?)?;
    let element = entry.get("element")?.as_str()?.to_string();
    Some((kind, element))
}

#[async_trait::async_trait]
impl Probe for AccessibilityProbe {
    fn test_type(&self) -> TestType {
        TestType::Accessibility
    }

    async fn check(&self, session: &mut dyn PageSession, _target: &str) -> Result<ProbeOutcome> {
        let raw = json_array(session.evaluate(VIOLATIONS_SCRIPT).await?);

        let mut violations = Vec::new();
        for entry in &raw {
            match parse_violation(entry) {
                Some((violation, element)) => {
                    violations.push(json!({"type": violation.as_str(), "element": element}));
                }
                None => debug!(?entry, "Ignoring malformed violation entry"),
            }
        }

        let count = violations.len();
        let result = TestResult::new(
            TestType::Accessibility,
            band(count, VIOLATION_FAIL_THRESHOLD),
            format!("Accessibility test completed. Found {} potential issues.", count),
        )
        .with_detail("violations_count", count)
        .with_detail("violations", violations);

        Ok(ProbeOutcome::new(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{run_probe, TestStatus};
    use crate::session::scripted::ScriptedSession;

    fn violations(n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|_| json!({"type": "missing_alt_text", "element": "img"}))
                .collect(),
        )
    }

    async fn status_for(payload: Value) -> ProbeOutcome {
        let mut session = ScriptedSession::new().with_script(VIOLATIONS_SCRIPT, payload);
        run_probe(&AccessibilityProbe, &mut session, "https://example.com").await
    }

    #[tokio::test]
    async fn test_banding_follows_violation_count() {
        assert_eq!(status_for(violations(0)).await.result.status, TestStatus::Passed);
        assert_eq!(status_for(violations(1)).await.result.status, TestStatus::Warning);
        assert_eq!(status_for(violations(5)).await.result.status, TestStatus::Warning);
        assert_eq!(status_for(violations(6)).await.result.status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_violations_are_counted_not_filed() {
        let outcome = status_for(json!([
            {"type": "missing_button_label", "element": "button"},
            {"type": "heading_level_skip", "element": "H3"},
            {"type": "mystery", "element": "div"},
            "garbage"
        ]))
        .await;

        assert_eq!(outcome.result.details["violations_count"], 2);
        assert_eq!(outcome.result.details["violations"][1]["type"], "heading_level_skip");
        assert_eq!(outcome.result.status, TestStatus::Warning);
        assert!(outcome.findings.is_empty());
    }

    #[tokio::test]
    async fn test_script_error_fails_the_probe() {
        let mut session =
            ScriptedSession::new().with_script_error(VIOLATIONS_SCRIPT, "document is not defined");
        let outcome = run_probe(&AccessibilityProbe, &mut session, "https://example.com").await;
        assert_eq!(outcome.result.status, TestStatus::Failed);
        assert!(outcome.result.error.unwrap().contains("document is not defined"));
    }
}
