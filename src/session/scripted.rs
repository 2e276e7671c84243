//! Canned page session for unit tests.

use super::{
    ElementHandle, EventHub, EventKind, PageEvent, PageSession, SessionError, SessionFactory,
    Subscription, WaitPolicy, DEFAULT_EVENT_CAPACITY,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Replays scripted evaluate/query/attribute answers and publishes queued
/// events on every navigation.
pub(crate) struct ScriptedSession {
    scripts: HashMap<String, Result<Value, String>>,
    selectors: HashMap<String, Vec<ElementHandle>>,
    attributes: HashMap<(ElementHandle, String), String>,
    navigation_events: Vec<PageEvent>,
    navigation_failure: Option<String>,
    navigations: Arc<Mutex<Vec<String>>>,
    hub: EventHub,
    current_url: Option<String>,
    closed: bool,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            selectors: HashMap::new(),
            attributes: HashMap::new(),
            navigation_events: Vec::new(),
            navigation_failure: None,
            navigations: Arc::new(Mutex::new(Vec::new())),
            hub: EventHub::new(DEFAULT_EVENT_CAPACITY),
            current_url: None,
            closed: false,
        }
    }

    pub(crate) fn with_script(mut self, script: &str, value: Value) -> Self {
        self.scripts.insert(script.to_string(), Ok(value));
        self
    }

    pub(crate) fn with_script_error(mut self, script: &str, reason: &str) -> Self {
        self.scripts.insert(script.to_string(), Err(reason.to_string()));
        self
    }

    pub(crate) fn with_elements(mut self, selector: &str, count: usize) -> Self {
        let handles = (0..count)
            .map(|i| ElementHandle(format!("{}#{}", selector, i)))
            .collect();
        self.selectors.insert(selector.to_string(), handles);
        self
    }

    /// Register elements for `selector`, each carrying `attr` (or not).
    pub(crate) fn with_attribute_values(
        mut self,
        selector: &str,
        attr: &str,
        values: &[Option<&str>],
    ) -> Self {
        let mut handles = Vec::new();
        for (i, value) in values.iter().enumerate() {
            let handle = ElementHandle(format!("{}#{}", selector, i));
            if let Some(v) = value {
                self.attributes
                    .insert((handle.clone(), attr.to_string()), v.to_string());
            }
            handles.push(handle);
        }
        self.selectors.insert(selector.to_string(), handles);
        self
    }

    pub(crate) fn emit_on_navigate(mut self, event: PageEvent) -> Self {
        self.navigation_events.push(event);
        self
    }

    pub(crate) fn failing_navigation(mut self, reason: &str) -> Self {
        self.navigation_failure = Some(reason.to_string());
        self
    }

    pub(crate) fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    pub(crate) fn navigation_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.navigations.clone()
    }
}

#[async_trait::async_trait]
impl PageSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _wait: WaitPolicy) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.navigations.lock().push(url.to_string());
        if let Some(reason) = &self.navigation_failure {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: reason.clone(),
            });
        }
        self.current_url = Some(url.to_string());
        for event in self.navigation_events.clone() {
            self.hub.publish(event);
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        match self.scripts.get(script) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(SessionError::Script(reason.clone())),
            None => Err(SessionError::Script("no scripted response".to_string())),
        }
    }

    async fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        Ok(self.selectors.get(selector).cloned().unwrap_or_default())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        Ok(self
            .attributes
            .get(&(element.clone(), name.to_string()))
            .cloned())
    }

    fn subscribe(&mut self, kinds: &[EventKind]) -> Subscription {
        self.hub.subscribe(kinds)
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        Ok(())
    }
}

type Builder = dyn Fn() -> ScriptedSession + Send + Sync;

/// Hands out a freshly built [`ScriptedSession`] per `open`.
pub(crate) struct ScriptedFactory {
    build: Option<Arc<Builder>>,
    opened: AtomicUsize,
}

impl ScriptedFactory {
    pub(crate) fn new(build: impl Fn() -> ScriptedSession + Send + Sync + 'static) -> Self {
        Self {
            build: Some(Arc::new(build)),
            opened: AtomicUsize::new(0),
        }
    }

    /// A factory whose `open` always fails, like an unreachable driver.
    pub(crate) fn unavailable() -> Self {
        Self {
            build: None,
            opened: AtomicUsize::new(0),
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        match &self.build {
            Some(build) => Ok(Box::new(build())),
            None => Err(SessionError::Protocol("driver unavailable".to_string())),
        }
    }
}
