//! Concurrent outbound link validation.
//!
//! Hrefs are deduplicated on their raw text before resolution, so `/a` and
//! `./a` are checked twice but two identical `/a` anchors only once.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Per-request budget for a single link check.
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks in flight at once.
pub const DEFAULT_LINK_CONCURRENCY: usize = 8;

/// A link that answered with status >= 400 or could not be fetched at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    /// The raw href as written in the page.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    /// Unique hrefs that were actually requested.
    pub checked: usize,
    /// Hrefs ignored: empty, fragments, script pseudo-links, non-HTTP schemes, duplicates.
    pub skipped: usize,
    pub broken: Vec<BrokenLink>,
}

#[derive(Debug, Clone)]
pub struct LinkValidator {
    client: Client,
    timeout: Duration,
    concurrency: usize,
}

impl LinkValidator {
    pub fn new(timeout: Duration, concurrency: usize, max_redirects: usize) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(max_redirects))
            .user_agent(concat!("pageparamedic/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build link-check HTTP client")?;

        Ok(Self {
            client,
            timeout,
            concurrency: concurrency.max(1),
        })
    }

    /// Validate every href against `base_url`. Returns once every check has
    /// completed or hit its own timeout.
    pub async fn validate<I>(&self, base_url: &str, hrefs: I) -> Result<LinkReport>
    where
        I: IntoIterator<Item = String>,
    {
        let base = Url::parse(base_url).with_context(|| format!("invalid base URL '{}'", base_url))?;

        let hrefs: Vec<String> = hrefs.into_iter().collect();
        let total = hrefs.len();
        let unique = candidates(hrefs);

        let mut broken = Vec::new();
        let mut targets = Vec::new();
        for href in unique {
            match base.join(&href) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => targets.push((href, url)),
                Ok(url) => debug!(%href, scheme = url.scheme(), "Skipping non-HTTP link"),
                Err(e) => broken.push(BrokenLink {
                    url: href,
                    status: None,
                    error: Some(format!("unresolvable href: {}", e)),
                }),
            }
        }
        let checked = targets.len();
        let unresolvable = broken.len();

        let results: Vec<Option<BrokenLink>> = stream::iter(targets)
            .map(|(href, url)| self.check(href, url))
            .buffered(self.concurrency)
            .collect()
            .await;
        broken.extend(results.into_iter().flatten());

        let report = LinkReport {
            checked,
            skipped: total - checked - unresolvable,
            broken,
        };
        info!(base = %base_url, checked = report.checked, broken = report.broken.len(), "Link validation complete");
        Ok(report)
    }

    async fn check(&self, href: String, url: Url) -> Option<BrokenLink> {
        match self.client.head(url.clone()).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().as_u16() >= 400 => Some(BrokenLink {
                url: href,
                status: Some(resp.status().as_u16()),
                error: None,
            }),
            Ok(_) => None,
            Err(e) => Some(BrokenLink {
                url: href,
                status: None,
                error: Some(describe(&e, self.timeout)),
            }),
        }
    }
}

/// Drop hrefs that never need a request and collapse duplicates, keeping the
/// first occurrence order.
pub fn candidates<I>(hrefs: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    hrefs
        .into_iter()
        .filter(|href| {
            let trimmed = href.trim();
            !(trimmed.is_empty()
                || trimmed.starts_with('#')
                || trimmed.to_ascii_lowercase().starts_with("javascript:"))
        })
        .filter(|href| seen.insert(href.clone()))
        .collect()
}

fn describe(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        return format!("timed out after {} ms", timeout.as_millis());
    }
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::Redirect, routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_site(hits: Arc<AtomicUsize>) -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
            .route("/boom", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "late"
                }),
            )
            .route("/moved", get(|| async { Redirect::permanent("/ok") }))
            .route(
                "/counted",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn validator(timeout_ms: u64) -> LinkValidator {
        LinkValidator::new(Duration::from_millis(timeout_ms), 4, 10).unwrap()
    }

    fn hrefs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_filters_and_dedups() {
        let got = candidates(hrefs(&[
            "/a",
            "",
            "#top",
            "javascript:void(0)",
            "JavaScript:alert(1)",
            "/b",
            "/a",
            "https://other.example/",
        ]));
        assert_eq!(got, hrefs(&["/a", "/b", "https://other.example/"]));
    }

    #[tokio::test]
    async fn test_identical_hrefs_are_checked_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_site(hits.clone()).await;
        let base = format!("http://{}/", addr);

        let report = validator(2000)
            .validate(&base, hrefs(&["/counted", "/counted", "counted", "#x", "mailto:qa@example.com"]))
            .await
            .unwrap();

        // "/counted" and "counted" are different raw hrefs resolving to the same URL.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(report.checked, 2);
        assert_eq!(report.skipped, 3);
        assert!(report.broken.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_and_timeout_are_both_broken() {
        let addr = spawn_site(Arc::new(AtomicUsize::new(0))).await;
        let base = format!("http://{}/docs/index.html", addr);

        let report = validator(200)
            .validate(&base, hrefs(&["/missing", "/slow", "/ok", "/moved", "/boom"]))
            .await
            .unwrap();

        assert_eq!(report.checked, 5);
        assert_eq!(report.broken.len(), 3);

        let missing = report.broken.iter().find(|b| b.url == "/missing").unwrap();
        assert_eq!(missing.status, Some(404));
        assert!(missing.error.is_none());

        let slow = report.broken.iter().find(|b| b.url == "/slow").unwrap();
        assert!(slow.status.is_none());
        assert!(slow.error.as_deref().unwrap().contains("timed out"));

        let json = serde_json::to_value(&report.broken).unwrap();
        let missing_json = json.as_array().unwrap().iter().find(|v| v["url"] == "/missing").unwrap();
        assert!(missing_json.get("status").is_some());
        assert!(missing_json.get("error").is_none());
        let slow_json = json.as_array().unwrap().iter().find(|v| v["url"] == "/slow").unwrap();
        assert!(slow_json.get("error").is_some());
        assert!(slow_json.get("status").is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_broken() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = validator(1000)
            .validate("https://example.com/", vec![format!("http://{}/", addr)])
            .await
            .unwrap();
        assert_eq!(report.broken.len(), 1);
        assert!(report.broken[0].error.is_some());
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_an_error() {
        assert!(validator(100).validate("not a url", hrefs(&["/a"])).await.is_err());
    }
}
