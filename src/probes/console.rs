use super::{band, Probe, ProbeOutcome, TestResult, TestType, VIOLATION_FAIL_THRESHOLD};
use crate::session::{ConsoleLevel, EventKind, PageEvent, PageSession, WaitPolicy};
use anyhow::Result;
use serde_json::{json, Value};
use tracing::warn;

/// Re-navigates with console and page-error subscriptions open and counts
/// what the page logs while loading.
///
/// Captured entries stay in the result details; bug reports for them come
/// from the coordinator's diagnostic sweep so each message is filed once.
pub struct ConsoleErrorProbe;

#[async_trait::async_trait]
impl Probe for ConsoleErrorProbe {
    fn test_type(&self) -> TestType {
        TestType::ConsoleErrors
    }

    async fn check(&self, session: &mut dyn PageSession, target: &str) -> Result<ProbeOutcome> {
        let subscription = session.subscribe(&[EventKind::Console, EventKind::PageError]);
        session.navigate(target, WaitPolicy::NetworkIdle).await?;
        session.collect_events().await?;

        let mut console_errors: Vec<Value> = Vec::new();
        let mut exceptions: Vec<Value> = Vec::new();
        for event in subscription.drain() {
            match event {
                PageEvent::Console {
                    level: level @ (ConsoleLevel::Error | ConsoleLevel::Warning),
                    text,
                    location,
                } => console_errors.push(json!({
                    "type": level.as_str(),
                    "text": text,
                    "location": location,
                })),
                PageEvent::PageError { message } => exceptions.push(Value::String(message)),
                _ => {}
            }
        }

        let dropped = subscription.dropped();
        if dropped > 0 {
            warn!(%target, dropped, "Console buffer overflowed; counts are a lower bound");
        }

        let count = console_errors.len() + exceptions.len();
        let mut result = TestResult::new(
            TestType::ConsoleErrors,
            band(count + dropped, VIOLATION_FAIL_THRESHOLD),
            format!("Console error detection completed. Found {} issues.", count),
        )
        .with_detail("console_errors", console_errors)
        .with_detail("exceptions", exceptions);
        if dropped > 0 {
            result = result.with_detail("dropped_events", dropped);
        }

        Ok(ProbeOutcome::new(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{run_probe, TestStatus};
    use crate::session::scripted::ScriptedSession;

    fn console(level: ConsoleLevel, text: &str) -> PageEvent {
        PageEvent::Console {
            level,
            text: text.to_string(),
            location: Some("https://example.com/app.js:10".to_string()),
        }
    }

    #[tokio::test]
    async fn test_six_console_errors_fail_with_six_entries() {
        let mut session = ScriptedSession::new();
        for i in 0..6 {
            session = session.emit_on_navigate(console(ConsoleLevel::Error, &format!("error {}", i)));
        }

        let outcome = run_probe(&ConsoleErrorProbe, &mut session, "https://example.com").await;

        assert_eq!(outcome.result.status, TestStatus::Failed);
        assert_eq!(outcome.result.details["console_errors"].as_array().unwrap().len(), 6);
        assert_eq!(outcome.result.details["exceptions"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_info_messages_and_responses_are_ignored() {
        let mut session = ScriptedSession::new()
            .emit_on_navigate(console(ConsoleLevel::Info, "hello"))
            .emit_on_navigate(PageEvent::Response {
                url: "https://example.com/x".to_string(),
                status: 500,
            });

        let outcome = run_probe(&ConsoleErrorProbe, &mut session, "https://example.com").await;
        assert_eq!(outcome.result.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_exceptions_count_toward_banding() {
        let mut session = ScriptedSession::new()
            .emit_on_navigate(console(ConsoleLevel::Warning, "deprecated API"))
            .emit_on_navigate(PageEvent::PageError {
                message: "Uncaught TypeError: x is undefined".to_string(),
            });

        let outcome = run_probe(&ConsoleErrorProbe, &mut session, "https://example.com").await;

        assert_eq!(outcome.result.status, TestStatus::Warning);
        assert_eq!(outcome.result.details["console_errors"][0]["type"], "warning");
        assert_eq!(
            outcome.result.details["exceptions"][0],
            "Uncaught TypeError: x is undefined"
        );
        assert!(outcome.findings.is_empty());
    }
}
