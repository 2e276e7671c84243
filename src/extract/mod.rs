//! Diagnostic extractor: independent DOM queries turned into raw findings.
//!
//! Extraction is permissive. Entries that come back malformed (an element
//! removed between query and inspection, a missing field) are skipped and
//! counted rather than aborting the sweep, and a query that throws only loses
//! its own findings.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bugs::finding::{HeadingIssue, LayoutIssue, ViolationKind};
use crate::bugs::Finding;
use crate::probes::json_array;
use crate::session::PageSession;

pub const IMAGES_SCRIPT: &str = r#"() => {
    return Array.from(document.querySelectorAll('img')).map(img => ({
        src: img.currentSrc || img.src,
        complete: img.complete,
        naturalWidth: img.naturalWidth,
        naturalHeight: img.naturalHeight
    }));
}"#;

pub const LAYOUT_SCRIPT: &str = r#"() => {
    const problems = [];
    document.querySelectorAll('*').forEach(el => {
        const rect = el.getBoundingClientRect();
        if ((rect.width === 0 || rect.height === 0) && el.children.length > 0
            && el.tagName !== 'SCRIPT' && el.tagName !== 'STYLE') {
            problems.push({type: 'zero_dimensions', tagName: el.tagName});
        }
        if ((rect.top < 0 || rect.left < 0) && el.clientHeight > 100 && el.clientWidth > 100) {
            problems.push({type: 'off_screen', tagName: el.tagName});
        }
    });
    return problems;
}"#;

pub const HEADINGS_SCRIPT: &str = r#"() => {
    const problems = [];
    if (!document.querySelector('h1')) {
        problems.push({type: 'no_h1'});
    }
    let lastLevel = 0;
    document.querySelectorAll('h1, h2, h3, h4, h5, h6').forEach(h => {
        const level = parseInt(h.tagName[1]);
        if (level - lastLevel > 1) {
            problems.push({type: 'heading_skip', from: lastLevel, to: level});
        }
        lastLevel = level;
    });
    return problems;
}"#;

pub const ACCESSIBILITY_SCRIPT: &str = r#"() => {
    const issues = [];
    document.querySelectorAll('img').forEach((img, index) => {
        if (!img.alt || img.alt.trim() === '') {
            issues.push({type: 'missing_alt_text', element: 'img', index});
        }
    });
    document.querySelectorAll('button').forEach((btn, index) => {
        if (!btn.textContent.trim() && !btn.getAttribute('aria-label')) {
            issues.push({type: 'missing_button_label', element: 'button', index});
        }
    });
    document.querySelectorAll('input[type="text"], input[type="email"], textarea').forEach((input, index) => {
        const label = input.id ? document.querySelector(`label[for="${input.id}"]`) : null;
        if (!label && !input.getAttribute('aria-label')) {
            issues.push({type: 'missing_form_label', element: input.tagName, index});
        }
    });
    document.querySelectorAll('a').forEach((link, index) => {
        if (!link.textContent.trim() && !link.getAttribute('aria-label')) {
            issues.push({type: 'missing_link_text', element: 'a', index});
        }
    });
    return issues;
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    Images,
    Layout,
    Headings,
    Accessibility,
}

impl Query {
    pub const ALL: [Query; 4] = [Query::Images, Query::Layout, Query::Headings, Query::Accessibility];

    pub fn script(&self) -> &'static str {
        match self {
            Query::Images => IMAGES_SCRIPT,
            Query::Layout => LAYOUT_SCRIPT,
            Query::Headings => HEADINGS_SCRIPT,
            Query::Accessibility => ACCESSIBILITY_SCRIPT,
        }
    }

    fn parse(&self, entry: &Value) -> Option<Option<Finding>> {
        match self {
            Query::Images => parse_image(entry),
            Query::Layout => parse_layout(entry).map(Some),
            Query::Headings => parse_heading(entry).map(Some),
            Query::Accessibility => parse_accessibility(entry).map(Some),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub findings: Vec<Finding>,
    /// Entries dropped because they could not be read.
    pub skipped: usize,
    /// Queries whose evaluation failed outright.
    pub failed_queries: Vec<Query>,
}

/// Broken when the load never completed or either natural dimension is zero.
/// `Some(None)` is a healthy image, `None` an unreadable entry.
fn parse_image(entry: &Value) -> Option<Option<Finding>> {
    let src = entry.get("src")?.as_str()?.to_string();
    let complete = entry.get("complete")?.as_bool()?;
    let width = entry.get("naturalWidth")?.as_f64()?;
    let height = entry.get("naturalHeight")?.as_f64()?;

    let broken = !complete || width == 0.0 || height == 0.0;
    Some(broken.then_some(Finding::BrokenImage { src }))
}

fn parse_layout(entry: &Value) -> Option<Finding> {
    let issue = match entry.get("type")?.as_str()? {
        "zero_dimensions" => LayoutIssue::ZeroDimensions,
        "off_screen" => LayoutIssue::OffScreen,
        _ => return None,
    };
    let tag = entry.get("tagName")?.as_str()?.to_string();
    Some(Finding::Layout { issue, tag })
}

fn parse_heading(entry: &Value) -> Option<Finding> {
    let issue = match entry.get("type")?.as_str()? {
        "no_h1" => HeadingIssue::NoH1,
        "heading_skip" => {
            let level = |key: &str| entry.get(key)?.as_u64().and_then(|v| u8::try_from(v).ok());
            HeadingIssue::Skip {
                from: level("from")?,
                to: level("to")?,
            }
        }
        _ => return None,
    };
    Some(Finding::Heading { issue })
}

/// Heading order is owned by the headings query, so a skip reported here is
/// treated as unreadable rather than filed twice.
fn parse_accessibility(entry: &Value) -> Option<Finding> {
    let violation = match ViolationKind::parse(entry.get("type")?.as_str()?)? {
        ViolationKind::HeadingLevelSkip => return None,
        kind => kind,
    };
    let element = entry.get("element")?.as_str()?.to_string();
    let index = usize::try_from(entry.get("index")?.as_u64()?).ok()?;
    Some(Finding::Accessibility {
        violation,
        element,
        index,
    })
}

/// Run every query against the currently loaded page.
pub async fn extract(session: &mut dyn PageSession) -> ExtractionReport {
    let mut report = ExtractionReport::default();

    for query in Query::ALL {
        let raw = match session.evaluate(query.script()).await {
            Ok(value) => json_array(value),
            Err(e) => {
                warn!(?query, "Extraction query failed: {}", e);
                report.failed_queries.push(query);
                continue;
            }
        };

        for entry in &raw {
            match query.parse(entry) {
                Some(Some(finding)) => report.findings.push(finding),
                Some(None) => {}
                None => {
                    debug!(?query, ?entry, "Skipping malformed entry");
                    report.skipped += 1;
                }
            }
        }
    }

    if report.skipped > 0 {
        warn!(
            skipped = report.skipped,
            "Some DOM entries could not be read; findings may be incomplete"
        );
    }
    report
}
