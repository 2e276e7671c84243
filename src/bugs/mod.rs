//! Normalized bug reports and their persistence.

pub mod finding;
pub mod normalize;
pub mod store;

pub use self::finding::Finding;
pub use self::normalize::{normalize, normalize_all, PageContext};
pub use self::store::BugStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity levels, ordered `Info < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Most severe first, the order reports list them in.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Severity::DESCENDING.iter().copied().find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugType {
    BrokenImage,
    BrokenLink,
    ConsoleError,
    NetworkError,
    MissingAltText,
    FormValidationError,
    PerformanceIssue,
    SecurityIssue,
    LayoutIssue,
    MissingHeading,
    MissingLabel,
    InsufficientContrast,
    JavascriptError,
}

impl BugType {
    pub const ALL: [BugType; 13] = [
        BugType::BrokenImage,
        BugType::BrokenLink,
        BugType::ConsoleError,
        BugType::NetworkError,
        BugType::MissingAltText,
        BugType::FormValidationError,
        BugType::PerformanceIssue,
        BugType::SecurityIssue,
        BugType::LayoutIssue,
        BugType::MissingHeading,
        BugType::MissingLabel,
        BugType::InsufficientContrast,
        BugType::JavascriptError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BugType::BrokenImage => "broken_image",
            BugType::BrokenLink => "broken_link",
            BugType::ConsoleError => "console_error",
            BugType::NetworkError => "network_error",
            BugType::MissingAltText => "missing_alt_text",
            BugType::FormValidationError => "form_validation_error",
            BugType::PerformanceIssue => "performance_issue",
            BugType::SecurityIssue => "security_issue",
            BugType::LayoutIssue => "layout_issue",
            BugType::MissingHeading => "missing_heading",
            BugType::MissingLabel => "missing_label",
            BugType::InsufficientContrast => "insufficient_contrast",
            BugType::JavascriptError => "javascript_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        BugType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// Lifecycle state. The core only ever creates `Open` bugs; the rest belong
/// to whoever triages them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl BugStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BugStatus::Open => "open",
            BugStatus::InProgress => "in_progress",
            BugStatus::Resolved => "resolved",
            BugStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => BugStatus::InProgress,
            "resolved" => BugStatus::Resolved,
            "closed" => BugStatus::Closed,
            _ => BugStatus::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bug {
    pub title: String,
    pub severity: Severity,
    pub bug_type: BugType,
    pub description: String,
    pub page_url: String,
    pub steps_to_reproduce: Vec<String>,
    pub expected_behavior: String,
    pub actual_behavior: String,
    pub browser_info: BTreeMap<String, String>,
    pub screenshot_path: Option<String>,
    pub status: BugStatus,
}

/// A bug as loaded back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BugRecord {
    pub id: i64,
    pub project_id: String,
    pub execution_id: String,
    #[serde(flatten)]
    pub bug: Bug,
    pub created_at: String,
}
