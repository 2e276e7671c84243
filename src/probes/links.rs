use super::{band, Probe, ProbeOutcome, TestResult, TestType, BROKEN_LINK_FAIL_THRESHOLD};
use crate::bugs::Finding;
use crate::links::LinkValidator;
use crate::session::PageSession;
use anyhow::Result;
use tracing::debug;

pub const ANCHOR_SELECTOR: &str = "a[href]";

/// Collects every anchor on the loaded page and hands them to the validator.
pub struct BrokenLinksProbe {
    validator: LinkValidator,
}

impl BrokenLinksProbe {
    pub fn new(validator: LinkValidator) -> Self {
        Self { validator }
    }
}

#[async_trait::async_trait]
impl Probe for BrokenLinksProbe {
    fn test_type(&self) -> TestType {
        TestType::BrokenLinks
    }

    async fn check(&self, session: &mut dyn PageSession, target: &str) -> Result<ProbeOutcome> {
        let anchors = session.query(ANCHOR_SELECTOR).await?;

        let mut hrefs = Vec::with_capacity(anchors.len());
        for anchor in &anchors {
            match session.attribute(anchor, "href").await {
                Ok(Some(href)) => hrefs.push(href),
                Ok(None) => {}
                // Anchor detached between query and read
                Err(e) => debug!(element = %anchor.0, "Skipping anchor: {}", e),
            }
        }

        let report = self.validator.validate(target, hrefs).await?;
        let count = report.broken.len();

        let result = TestResult::new(
            TestType::BrokenLinks,
            band(count, BROKEN_LINK_FAIL_THRESHOLD),
            format!("Broken links test completed. Found {} broken links.", count),
        )
        .with_detail("checked_links", report.checked)
        .with_detail("broken_links_count", count)
        .with_detail("broken_links", serde_json::to_value(&report.broken)?);

        let findings = report.broken.into_iter().map(Finding::BrokenLink).collect();
        Ok(ProbeOutcome::with_findings(result, findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{run_probe, TestStatus};
    use crate::session::scripted::ScriptedSession;
    use std::time::Duration;

    fn probe() -> BrokenLinksProbe {
        BrokenLinksProbe::new(LinkValidator::new(Duration::from_millis(500), 4, 5).unwrap())
    }

    #[tokio::test]
    async fn test_page_without_checkable_links_passes() {
        let mut session = ScriptedSession::new().with_attribute_values(
            ANCHOR_SELECTOR,
            "href",
            &[Some("#top"), Some("javascript:void(0)"), None, Some("")],
        );
        let outcome = run_probe(&probe(), &mut session, "https://example.com/").await;

        assert_eq!(outcome.result.status, TestStatus::Passed);
        assert_eq!(outcome.result.details["checked_links"], 0);
        assert!(outcome.findings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_links_are_banded() {
        // Nothing listens on port 9 of the loopback interface.
        let hrefs: Vec<String> = (0..4).map(|i| format!("http://127.0.0.1:9/{}", i)).collect();
        let values: Vec<Option<&str>> = hrefs.iter().map(|h| Some(h.as_str())).collect();
        let mut session = ScriptedSession::new().with_attribute_values(ANCHOR_SELECTOR, "href", &values);

        let outcome = run_probe(&probe(), &mut session, "https://example.com/").await;

        assert_eq!(outcome.result.status, TestStatus::Failed);
        assert_eq!(outcome.result.details["broken_links_count"], 4);
        assert_eq!(outcome.findings.len(), 4);
    }
}
