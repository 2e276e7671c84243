//! Finding → Bug mapping with the fixed severity table reports depend on.

use std::collections::BTreeMap;

use super::finding::{Finding, HeadingIssue, ViolationKind};
use super::{Bug, BugStatus, BugType, Severity};
use crate::session::ConsoleLevel;

/// Where a finding was observed.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub page_url: &'a str,
    pub browser: &'a str,
}

/// HTTP status → severity: 5xx critical, 404 high, other 4xx medium.
pub fn network_severity(status: u16) -> Severity {
    match status {
        500.. => Severity::Critical,
        404 => Severity::High,
        400..=499 => Severity::Medium,
        _ => Severity::Info,
    }
}

pub fn console_severity(level: ConsoleLevel) -> Severity {
    match level {
        ConsoleLevel::Error => Severity::High,
        ConsoleLevel::Warning => Severity::Low,
        ConsoleLevel::Info | ConsoleLevel::Debug => Severity::Info,
    }
}

pub fn severity_of(finding: &Finding) -> Severity {
    match finding {
        Finding::Network { status, .. } => network_severity(*status),
        Finding::Console { level, .. } => console_severity(*level),
        Finding::PageError { .. } => Severity::High,
        Finding::BrokenImage { .. } => Severity::Medium,
        Finding::Layout { .. } => Severity::Low,
        Finding::Heading { .. } => Severity::Low,
        Finding::Accessibility { .. } => Severity::Medium,
        Finding::FormIssue { .. } => Severity::Medium,
        Finding::BrokenLink(link) => link.status.map(network_severity).unwrap_or(Severity::Medium),
        Finding::SlowPage { .. } => Severity::Low,
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Turn one finding into a bug. Pure; the caller persists.
pub fn normalize(finding: &Finding, ctx: &PageContext<'_>) -> Bug {
    let mut browser_info = BTreeMap::new();
    browser_info.insert("browser".to_string(), ctx.browser.to_string());
    browser_info.insert("url".to_string(), ctx.page_url.to_string());

    let (title, bug_type, description, steps_to_reproduce, expected, actual) = match finding {
        Finding::BrokenImage { src } => (
            format!("Broken Image: {}", src),
            BugType::BrokenImage,
            "Image failed to load or has zero dimensions".to_string(),
            steps(&["Navigate to page", "Observe images"]),
            "All images should load and display properly".to_string(),
            format!("Image at {} did not load", src),
        ),
        Finding::Layout { issue, tag } => (
            format!("Layout Issue: {}", issue.as_str()),
            BugType::LayoutIssue,
            format!("Layout problem detected: {}", issue.as_str()),
            steps(&["Navigate to page", "Inspect layout"]),
            "All elements should be properly positioned".to_string(),
            format!("{} for {} element", issue.as_str(), tag),
        ),
        Finding::Heading { issue } => {
            let actual = match issue {
                HeadingIssue::NoH1 => "Page has no h1 heading".to_string(),
                HeadingIssue::Skip { from, to } => format!("Heading level jumps from h{} to h{}", from, to),
            };
            (
                format!("Heading Issue: {}", issue.as_str()),
                BugType::MissingHeading,
                format!("Heading structure issue: {}", issue.as_str()),
                steps(&["Navigate to page", "Check heading hierarchy"]),
                "Page should have proper heading hierarchy".to_string(),
                actual,
            )
        }
        Finding::Accessibility {
            violation,
            element,
            index,
        } => {
            let bug_type = match violation {
                ViolationKind::MissingAltText => BugType::MissingAltText,
                ViolationKind::HeadingLevelSkip => BugType::MissingHeading,
                ViolationKind::MissingButtonLabel
                | ViolationKind::MissingFormLabel
                | ViolationKind::MissingLinkText => BugType::MissingLabel,
            };
            (
                format!("Accessibility Issue: {}", violation.as_str()),
                bug_type,
                format!("WCAG violation detected: {}", violation.as_str()),
                steps(&["Navigate to page", "Use screen reader"]),
                "Page should be fully accessible".to_string(),
                format!(
                    "{} on <{}> element at index {}",
                    violation.as_str(),
                    element.to_lowercase(),
                    index
                ),
            )
        }
        Finding::FormIssue { form_index, issue } => (
            format!("Form Validation Issue: form #{}", form_index),
            BugType::FormValidationError,
            format!("Form structure problem: {}", issue),
            steps(&["Navigate to page", "Inspect form markup"]),
            "Forms should have a submit control and named required inputs".to_string(),
            issue.clone(),
        ),
        Finding::BrokenLink(link) => {
            let actual = match (&link.status, &link.error) {
                (Some(status), _) => format!("Link returned HTTP {}", status),
                (None, Some(error)) => format!("Link check failed: {}", error),
                (None, None) => "Link could not be verified".to_string(),
            };
            (
                format!("Broken Link: {}", link.url),
                BugType::BrokenLink,
                "Outbound link does not resolve to a working page".to_string(),
                steps(&["Navigate to page", "Follow the link"]),
                "Links should resolve with a 2xx or 3xx status".to_string(),
                actual,
            )
        }
        Finding::Console { level, text, location } => {
            if let Some(location) = location {
                browser_info.insert("location".to_string(), location.clone());
            }
            (
                format!("Console {}: {}", level.as_str().to_uppercase(), truncate(text, 50)),
                BugType::ConsoleError,
                format!("Console {} detected during page execution", level.as_str()),
                steps(&["Navigate to page", "Check browser console"]),
                "No console errors should appear".to_string(),
                text.clone(),
            )
        }
        Finding::PageError { message } => (
            format!("JavaScript Error: {}", truncate(message, 50)),
            BugType::JavascriptError,
            "Uncaught exception thrown while the page ran".to_string(),
            steps(&["Navigate to page", "Check browser console"]),
            "Page scripts should not throw".to_string(),
            message.clone(),
        ),
        Finding::Network { url, status } => {
            browser_info.insert("url".to_string(), url.clone());
            (
                format!("Network Error {}: {}", status, url),
                BugType::NetworkError,
                format!("Network request returned HTTP {}", status),
                steps(&["Navigate to page", "Check network tab"]),
                "Request should return 2xx status code".to_string(),
                format!("Request returned {} status code", status),
            )
        }
        Finding::SlowPage { load_time_ms } => (
            format!("Slow Page Load: {:.0} ms", load_time_ms),
            BugType::PerformanceIssue,
            "Page load exceeded the performance budget".to_string(),
            steps(&["Navigate to page", "Record navigation timing"]),
            "Page should finish loading within 5000 ms".to_string(),
            format!("Load event ended after {:.0} ms", load_time_ms),
        ),
    };

    Bug {
        title,
        severity: severity_of(finding),
        bug_type,
        description,
        page_url: ctx.page_url.to_string(),
        steps_to_reproduce,
        expected_behavior: expected,
        actual_behavior: actual,
        browser_info,
        screenshot_path: None,
        status: BugStatus::Open,
    }
}

pub fn normalize_all(findings: &[Finding], ctx: &PageContext<'_>) -> Vec<Bug> {
    findings.iter().map(|f| normalize(f, ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bugs::finding::LayoutIssue;
    use crate::links::BrokenLink;

    const CTX: PageContext<'static> = PageContext {
        page_url: "https://example.com/",
        browser: "chrome",
    };

    #[test]
    fn test_network_severity_table() {
        assert_eq!(network_severity(500), Severity::Critical);
        assert_eq!(network_severity(503), Severity::Critical);
        assert_eq!(network_severity(404), Severity::High);
        assert_eq!(network_severity(400), Severity::Medium);
        assert_eq!(network_severity(403), Severity::Medium);
        assert_eq!(network_severity(451), Severity::Medium);
    }

    #[test]
    fn test_console_severity_table() {
        assert_eq!(console_severity(ConsoleLevel::Error), Severity::High);
        assert_eq!(console_severity(ConsoleLevel::Warning), Severity::Low);
    }

    #[test]
    fn test_extractor_findings_severity() {
        let image = Finding::BrokenImage { src: "a.png".to_string() };
        let layout = Finding::Layout { issue: LayoutIssue::OffScreen, tag: "DIV".to_string() };
        let heading = Finding::Heading { issue: HeadingIssue::NoH1 };
        let a11y = Finding::Accessibility {
            violation: ViolationKind::MissingAltText,
            element: "img".to_string(),
            index: 2,
        };

        assert_eq!(normalize(&image, &CTX).severity, Severity::Medium);
        assert_eq!(normalize(&layout, &CTX).severity, Severity::Low);
        assert_eq!(normalize(&heading, &CTX).severity, Severity::Low);
        let bug = normalize(&a11y, &CTX);
        assert_eq!(bug.severity, Severity::Medium);
        assert_eq!(bug.bug_type, BugType::MissingAltText);
        assert_eq!(bug.actual_behavior, "missing_alt_text on <img> element at index 2");

        let link = Finding::Accessibility {
            violation: ViolationKind::MissingLinkText,
            element: "a".to_string(),
            index: 0,
        };
        assert_eq!(normalize(&link, &CTX).bug_type, BugType::MissingLabel);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let finding = Finding::Network {
            url: "https://example.com/api".to_string(),
            status: 500,
        };
        assert_eq!(normalize(&finding, &CTX), normalize(&finding, &CTX));
        let bug = normalize(&finding, &CTX);
        assert_eq!(bug.title, "Network Error 500: https://example.com/api");
        assert_eq!(bug.bug_type, BugType::NetworkError);
        assert_eq!(bug.status, BugStatus::Open);
        assert_eq!(bug.browser_info["url"], "https://example.com/api");
    }

    #[test]
    fn test_broken_link_severity_follows_status() {
        let not_found = Finding::BrokenLink(BrokenLink {
            url: "/gone".to_string(),
            status: Some(404),
            error: None,
        });
        let timed_out = Finding::BrokenLink(BrokenLink {
            url: "/slow".to_string(),
            status: None,
            error: Some("operation timed out".to_string()),
        });
        assert_eq!(normalize(&not_found, &CTX).severity, Severity::High);
        let bug = normalize(&timed_out, &CTX);
        assert_eq!(bug.severity, Severity::Medium);
        assert!(bug.actual_behavior.contains("timed out"));
    }

    #[test]
    fn test_console_title_is_truncated() {
        let finding = Finding::Console {
            level: ConsoleLevel::Error,
            text: "x".repeat(200),
            location: Some("https://example.com/app.js".to_string()),
        };
        let bug = normalize(&finding, &CTX);
        assert_eq!(bug.title, format!("Console ERROR: {}", "x".repeat(50)));
        assert_eq!(bug.actual_behavior.len(), 200);
        assert_eq!(bug.browser_info["location"], "https://example.com/app.js");
    }
}
