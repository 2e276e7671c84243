//! Post-probe diagnostic sweep: a fresh navigation with every event stream
//! subscribed, followed by the extractor.

use tracing::{info, warn};

use crate::bugs::Finding;
use crate::extract;
use crate::session::{EventKind, PageSession, SessionError, WaitPolicy};

#[derive(Debug, Default)]
pub struct SweepReport {
    pub findings: Vec<Finding>,
    /// Extractor entries that could not be read.
    pub skipped_entries: usize,
    /// Events lost to a full subscription buffer.
    pub dropped_events: usize,
}

pub async fn run(session: &mut dyn PageSession, target: &str) -> Result<SweepReport, SessionError> {
    let events = session.subscribe(&[EventKind::Console, EventKind::PageError, EventKind::NetworkResponse]);
    session.navigate(target, WaitPolicy::NetworkIdle).await?;

    let extraction = extract::extract(session).await;
    if let Err(e) = session.collect_events().await {
        warn!(%target, "Could not collect late page events: {}", e);
    }

    let mut findings = extraction.findings;
    findings.extend(events.drain().into_iter().filter_map(Finding::from_event));

    let report = SweepReport {
        findings,
        skipped_entries: extraction.skipped,
        dropped_events: events.dropped(),
    };
    info!(
        %target,
        findings = report.findings.len(),
        skipped = report.skipped_entries,
        dropped = report.dropped_events,
        "Diagnostic sweep complete"
    );
    Ok(report)
}
