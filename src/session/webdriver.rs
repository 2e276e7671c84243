//! W3C WebDriver page sessions (chromedriver-compatible).
//!
//! Console and page-error events come from the driver's `browser` log,
//! network responses from the Chrome `performance` log. Both are pulled after
//! every navigation and on [`PageSession::collect_events`].

use super::{
    ConsoleLevel, ElementHandle, EventHub, EventKind, PageEvent, PageSession, SessionError,
    SessionFactory, Subscription, WaitPolicy,
};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL of the driver, e.g. `http://localhost:9515`.
    pub endpoint: String,
    pub browser: String,
    pub headless: bool,
    /// Extra wait applied by [`WaitPolicy::NetworkIdle`].
    pub settle: Duration,
    pub event_capacity: usize,
}

pub struct WebDriverFactory {
    client: Client,
    config: WebDriverConfig,
}

impl WebDriverFactory {
    pub fn new(config: WebDriverConfig) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, config })
    }

    fn capabilities(&self) -> Value {
        let mut always = json!({
            "browserName": self.config.browser,
            "pageLoadStrategy": "normal",
            "goog:loggingPrefs": { "browser": "ALL", "performance": "ALL" },
        });
        if self.config.browser == "chrome" {
            let mut args = vec!["--disable-gpu", "--no-sandbox"];
            if self.config.headless {
                args.push("--headless=new");
            }
            always["goog:chromeOptions"] = json!({ "args": args });
        }
        json!({ "capabilities": { "alwaysMatch": always } })
    }
}

#[async_trait::async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let value = send(
            &self.client,
            Method::POST,
            &format!("{}/session", endpoint),
            Some(self.capabilities()),
        )
        .await?;

        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Protocol("new session response without sessionId".to_string()))?;

        info!(session = %id, browser = %self.config.browser, "WebDriver session opened");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", endpoint, id),
            settle: self.config.settle,
            hub: EventHub::new(self.config.event_capacity),
            current_url: None,
            closed: false,
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    base: String,
    settle: Duration,
    hub: EventHub,
    current_url: Option<String>,
    closed: bool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        send(&self.client, method, &format!("{}{}", self.base, path), body).await
    }

    async fn fetch_log(&self, log_type: &str) -> Result<Vec<Value>, SessionError> {
        let value = self
            .command(Method::POST, "/se/log", Some(json!({ "type": log_type })))
            .await?;
        Ok(match value {
            Value::Array(entries) => entries,
            _ => Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl PageSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> Result<(), SessionError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map_err(|e| match e {
                SessionError::Protocol(reason) => SessionError::Navigation {
                    url: url.to_string(),
                    reason,
                },
                other => other,
            })?;

        if wait == WaitPolicy::NetworkIdle {
            tokio::time::sleep(self.settle).await;
        }

        let landed = self.command(Method::GET, "/url", None).await?;
        self.current_url = Some(landed.as_str().unwrap_or(url).to_string());

        // Reading the logs also clears them driver-side, so events from this
        // page never leak into a later subscription.
        if let Err(e) = self.collect_events().await {
            debug!(url = %url, "browser log unavailable after navigation: {}", e);
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        let body = json!({ "script": format!("return ({})();", script), "args": [] });
        self.command(Method::POST, "/execute/sync", Some(body))
            .await
            .map_err(|e| match e {
                SessionError::Protocol(reason) => SessionError::Script(reason),
                other => other,
            })
    }

    async fn query(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;

        let handles = match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(|id| ElementHandle(id.to_string()))
                .collect(),
            _ => Vec::new(),
        };
        Ok(handles)
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{}", element.0, name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    fn subscribe(&mut self, kinds: &[EventKind]) -> Subscription {
        self.hub.subscribe(kinds)
    }

    async fn collect_events(&mut self) -> Result<(), SessionError> {
        let browser = self.fetch_log("browser").await?;
        let mut events = parse_browser_log(&browser);

        // Not every driver exposes the performance log; console capture still works without it.
        match self.fetch_log("performance").await {
            Ok(perf) => events.extend(parse_performance_log(&perf)),
            Err(e) => debug!("performance log unavailable: {}", e),
        }

        for event in events {
            self.hub.publish(event);
        }
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await;
        self.closed = true;
        if let Err(e) = &result {
            warn!(session = %self.base, "Failed to close WebDriver session: {}", e);
        }
        result.map(|_| ())
    }
}

/// Issue one wire-protocol command and unwrap its `value`.
async fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value, SessionError> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }

    let resp = req.send().await?;
    let status = resp.status();
    let payload: Value = resp.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(SessionError::Protocol(format!("{} ({}): {}", error, status.as_u16(), message)));
    }
    Ok(value)
}

/// Convert chromedriver `browser` log entries into page events.
pub fn parse_browser_log(entries: &[Value]) -> Vec<PageEvent> {
    entries
        .iter()
        .filter_map(|entry| {
            let level = entry.get("level")?.as_str()?;
            let message = entry.get("message")?.as_str()?.to_string();

            if level == "SEVERE" && message.contains("Uncaught") {
                return Some(PageEvent::PageError { message });
            }

            let level = match level {
                "SEVERE" => ConsoleLevel::Error,
                "WARNING" => ConsoleLevel::Warning,
                "INFO" => ConsoleLevel::Info,
                _ => ConsoleLevel::Debug,
            };
            // chromedriver prefixes messages with "<url> <line>:<col>"
            let location = message
                .split_whitespace()
                .next()
                .filter(|token| token.starts_with("http"))
                .map(str::to_string);

            Some(PageEvent::Console {
                level,
                text: message,
                location,
            })
        })
        .collect()
}

/// Extract `Network.responseReceived` entries from the Chrome performance log.
pub fn parse_performance_log(entries: &[Value]) -> Vec<PageEvent> {
    entries
        .iter()
        .filter_map(|entry| {
            let raw = entry.get("message")?.as_str()?;
            let inner: Value = serde_json::from_str(raw).ok()?;
            let message = inner.get("message")?;
            if message.get("method")?.as_str()? != "Network.responseReceived" {
                return None;
            }
            let response = message.get("params")?.get("response")?;
            let url = response.get("url")?.as_str()?.to_string();
            let status = response.get("status")?.as_f64()? as u16;
            Some(PageEvent::Response { url, status })
        })
        .collect()
}
