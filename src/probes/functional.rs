use super::{Probe, ProbeOutcome, TestResult, TestStatus, TestType};
use crate::session::{PageSession, WaitPolicy};
use anyhow::Result;

pub const INTERACTIVE_SELECTOR: &str = "button, input, a, form, select, textarea";

/// Loads the page and counts what a user could interact with.
pub struct FunctionalProbe;

#[async_trait::async_trait]
impl Probe for FunctionalProbe {
    fn test_type(&self) -> TestType {
        TestType::Functional
    }

    async fn check(&self, session: &mut dyn PageSession, target: &str) -> Result<ProbeOutcome> {
        session.navigate(target, WaitPolicy::NetworkIdle).await?;

        let all = session.query("*").await?;
        let interactive = session.query(INTERACTIVE_SELECTOR).await?;

        let result = TestResult::new(
            TestType::Functional,
            TestStatus::Passed,
            format!(
                "Functional test completed. Found {} interactive elements.",
                interactive.len()
            ),
        )
        .with_detail("total_elements", all.len())
        .with_detail("interactive_elements", interactive.len())
        .with_detail("page_loaded", true);

        Ok(ProbeOutcome::new(result))
    }
}
