//! Page-automation capability used by probes and the diagnostic sweep.
//!
//! A [`PageSession`] is one browser tab: it navigates, evaluates scripts,
//! queries elements, and publishes console / network / page-error events to
//! explicit subscriptions. Sessions are not shareable; every method takes
//! `&mut self`, so two probes can never drive the same tab at once.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use thiserror::Error;

#[cfg(test)]
pub(crate) mod scripted;
pub mod webdriver;

/// Default number of events a single subscription retains.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("webdriver request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("session is closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How long `navigate` waits before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Return once the load event fired.
    #[default]
    Load,
    /// Additionally let late requests and scripts settle.
    NetworkIdle,
}

/// Opaque reference to a DOM element, valid until the next navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Console,
    NetworkResponse,
    PageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Error => "error",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Console {
        level: ConsoleLevel,
        text: String,
        location: Option<String>,
    },
    Response {
        url: String,
        status: u16,
    },
    PageError {
        message: String,
    },
}

impl PageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PageEvent::Console { .. } => EventKind::Console,
            PageEvent::Response { .. } => EventKind::NetworkResponse,
            PageEvent::PageError { .. } => EventKind::PageError,
        }
    }
}

#[derive(Debug)]
struct EventBuffer {
    kinds: Vec<EventKind>,
    events: Vec<PageEvent>,
    capacity: usize,
    dropped: usize,
}

/// Handle to a bounded event buffer fed by a session.
///
/// The session only holds a weak reference, so dropping the subscription
/// unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    buffer: Arc<Mutex<EventBuffer>>,
}

impl Subscription {
    /// Take every buffered event, oldest first.
    pub fn drain(&self) -> Vec<PageEvent> {
        std::mem::take(&mut self.buffer.lock().events)
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.buffer.lock().dropped
    }
}

/// Fan-out of page events to live subscriptions. Session implementations
/// embed one and call [`EventHub::publish`] as events arrive.
#[derive(Debug)]
pub struct EventHub {
    capacity: usize,
    subscribers: Vec<Weak<Mutex<EventBuffer>>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Subscription {
        let buffer = Arc::new(Mutex::new(EventBuffer {
            kinds: kinds.to_vec(),
            events: Vec::new(),
            capacity: self.capacity,
            dropped: 0,
        }));
        self.subscribers.push(Arc::downgrade(&buffer));
        Subscription { buffer }
    }

    pub fn publish(&mut self, event: PageEvent) {
        let kind = event.kind();
        self.subscribers.retain(|weak| weak.strong_count() > 0);
        for weak in &self.subscribers {
            let Some(buffer) = weak.upgrade() else { continue };
            let mut buffer = buffer.lock();
            if !buffer.kinds.contains(&kind) {
                continue;
            }
            if buffer.events.len() >= buffer.capacity {
                buffer.dropped += 1;
            } else {
                buffer.events.push(event.clone());
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscribers.iter().any(|weak| weak.strong_count() > 0)
    }
}

/// One live browser page.
#[async_trait::async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> Result<(), SessionError>;

    /// Evaluate a JavaScript function expression (`() => { ... }`) and return
    /// its JSON-serializable result.
    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError>;

    async fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError>;

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError>;

    fn subscribe(&mut self, kinds: &[EventKind]) -> Subscription;

    /// Deliver any events the backend has buffered to current subscriptions.
    async fn collect_events(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn current_url(&self) -> Option<&str>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Source of fresh page sessions.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(text: &str) -> PageEvent {
        PageEvent::Console {
            level: ConsoleLevel::Error,
            text: text.to_string(),
            location: None,
        }
    }

    #[test]
    fn test_subscription_filters_by_kind() {
        let mut hub = EventHub::new(10);
        let consoles = hub.subscribe(&[EventKind::Console]);
        let network = hub.subscribe(&[EventKind::NetworkResponse]);

        hub.publish(console("boom"));
        hub.publish(PageEvent::Response {
            url: "https://example.com/a.js".to_string(),
            status: 404,
        });

        assert_eq!(consoles.drain(), vec![console("boom")]);
        assert_eq!(network.drain().len(), 1);
        assert!(consoles.drain().is_empty());
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut hub = EventHub::new(2);
        let sub = hub.subscribe(&[EventKind::Console]);
        for i in 0..5 {
            hub.publish(console(&i.to_string()));
        }
        assert_eq!(sub.drain().len(), 2);
        assert_eq!(sub.dropped(), 3);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut hub = EventHub::new(2);
        let sub = hub.subscribe(&[EventKind::Console]);
        assert!(hub.has_subscribers());
        drop(sub);
        hub.publish(console("late"));
        assert!(!hub.has_subscribers());
    }
}
