//! Raw, unclassified observations produced by probes, the extractor and the
//! link validator.

use serde::{Deserialize, Serialize};

use crate::links::BrokenLink;
use crate::session::{ConsoleLevel, PageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutIssue {
    /// Element with children rendered at zero width or height.
    ZeroDimensions,
    /// Large element pushed to negative top/left coordinates.
    OffScreen,
}

impl LayoutIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutIssue::ZeroDimensions => "zero_dimensions",
            LayoutIssue::OffScreen => "off_screen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum HeadingIssue {
    NoH1,
    Skip { from: u8, to: u8 },
}

impl HeadingIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeadingIssue::NoH1 => "no_h1",
            HeadingIssue::Skip { .. } => "heading_skip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingAltText,
    MissingButtonLabel,
    MissingFormLabel,
    MissingLinkText,
    HeadingLevelSkip,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MissingAltText => "missing_alt_text",
            ViolationKind::MissingButtonLabel => "missing_button_label",
            ViolationKind::MissingFormLabel => "missing_form_label",
            ViolationKind::MissingLinkText => "missing_link_text",
            ViolationKind::HeadingLevelSkip => "heading_level_skip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_alt_text" => Some(ViolationKind::MissingAltText),
            "missing_button_label" => Some(ViolationKind::MissingButtonLabel),
            "missing_form_label" => Some(ViolationKind::MissingFormLabel),
            "missing_link_text" => Some(ViolationKind::MissingLinkText),
            "heading_level_skip" => Some(ViolationKind::HeadingLevelSkip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    BrokenImage {
        src: String,
    },
    Layout {
        issue: LayoutIssue,
        tag: String,
    },
    Heading {
        issue: HeadingIssue,
    },
    Accessibility {
        violation: ViolationKind,
        element: String,
        /// Position among the page's elements of the same kind.
        index: usize,
    },
    FormIssue {
        form_index: usize,
        issue: String,
    },
    BrokenLink(BrokenLink),
    Console {
        level: ConsoleLevel,
        text: String,
        location: Option<String>,
    },
    PageError {
        message: String,
    },
    Network {
        url: String,
        status: u16,
    },
    SlowPage {
        load_time_ms: f64,
    },
}

impl Finding {
    /// Findings worth reporting from a captured page event: console errors and
    /// warnings, uncaught exceptions, and responses of 400 or above.
    pub fn from_event(event: PageEvent) -> Option<Finding> {
        match event {
            PageEvent::Console {
                level: level @ (ConsoleLevel::Error | ConsoleLevel::Warning),
                text,
                location,
            } => Some(Finding::Console {
                level,
                text,
                location,
            }),
            PageEvent::Console { .. } => None,
            PageEvent::Response { url, status } if status >= 400 => {
                Some(Finding::Network { url, status })
            }
            PageEvent::Response { .. } => None,
            PageEvent::PageError { message } => Some(Finding::PageError { message }),
        }
    }
}
