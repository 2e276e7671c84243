//! TOML configuration for the PageParamedic daemon and CLI.
//!
//! Every section is optional; missing keys fall back to compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::links::{DEFAULT_LINK_CONCURRENCY, DEFAULT_LINK_TIMEOUT};
use crate::probes::TestType;
use crate::scheduler::{default_test_types, DEFAULT_GRACE_WINDOW_SECS, DEFAULT_POLL_INTERVAL};
use crate::session::webdriver::WebDriverConfig;
use crate::session::DEFAULT_EVENT_CAPACITY;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PAGEPARAMEDIC_CONFIG";

/// Picked up from the working directory when nothing else is given.
pub const LOCAL_CONFIG_FILE: &str = "pageparamedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` (the `--config` flag). A file named here must load.
    /// 2. The path in `PAGEPARAMEDIC_CONFIG`.
    /// 3. `./pageparamedic.toml`.
    /// 4. Compiled-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "{} set but file could not be loaded, trying fallback", CONFIG_ENV
                ),
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => warn!(
                    path = %local.display(),
                    error = %e,
                    "local config file exists but could not be loaded, using defaults"
                ),
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Parent directories are created on open.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/pageparamedic.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// Delay before a newly added schedule first becomes due.
    pub grace_window_secs: i64,
    /// Probe set used for every scheduled run.
    pub default_test_types: Vec<TestType>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            grace_window_secs: DEFAULT_GRACE_WINDOW_SECS,
            default_test_types: default_test_types(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_secs.max(0))
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Per-link request budget.
    pub timeout_ms: u64,
    pub concurrency: usize,
    pub max_redirects: usize,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_LINK_TIMEOUT.as_millis() as u64,
            concurrency: DEFAULT_LINK_CONCURRENCY,
            max_redirects: 10,
        }
    }
}

impl LinksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// WebDriver endpoint and browser options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    /// `chrome` or `firefox`. Also recorded in every bug's browser info.
    pub browser: String,
    pub headless: bool,
    /// Extra wait after load when a probe asks for network idle.
    pub settle_ms: u64,
    /// Events retained per subscription before new ones are dropped.
    pub event_capacity: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            settle_ms: 500,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BrowserConfig {
    pub fn webdriver(&self) -> WebDriverConfig {
        WebDriverConfig {
            endpoint: self.webdriver_url.clone(),
            browser: self.browser.clone(),
            headless: self.headless,
            settle: Duration::from_millis(self.settle_ms),
            event_capacity: self.event_capacity.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// API / reports / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// When set, JSON/HTML/Markdown reports are written here after every run.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.storage.path, "data/pageparamedic.db");
        assert_eq!(cfg.scheduler.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.scheduler.grace_window(), chrono::Duration::seconds(300));
        assert_eq!(
            cfg.scheduler.default_test_types,
            vec![
                TestType::Functional,
                TestType::Performance,
                TestType::Accessibility,
                TestType::BrokenLinks
            ]
        );
        assert_eq!(cfg.links.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.links.concurrency, 8);
        assert_eq!(cfg.browser.browser, "chrome");
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.event_capacity, 1000);
        assert!(cfg.reports.output_dir.is_none());
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[storage]
path = "/var/lib/pageparamedic/qa.db"

[scheduler]
poll_interval_secs = 15
grace_window_secs = 0
default_test_types = ["functional", "console_errors"]

[links]
timeout_ms = 1500
concurrency = 2
max_redirects = 3

[browser]
webdriver_url = "http://selenium:4444"
browser = "firefox"
headless = false
settle_ms = 0
event_capacity = 50

[api]
bind = "0.0.0.0:9000"

[reports]
output_dir = "out/reports"

[logging]
format = "json"
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.storage.path, "/var/lib/pageparamedic/qa.db");
        assert_eq!(cfg.scheduler.poll_interval_secs, 15);
        assert_eq!(cfg.scheduler.grace_window(), chrono::Duration::zero());
        assert_eq!(
            cfg.scheduler.default_test_types,
            vec![TestType::Functional, TestType::ConsoleErrors]
        );
        assert_eq!(cfg.links.timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.links.max_redirects, 3);

        let wd = cfg.browser.webdriver();
        assert_eq!(wd.endpoint, "http://selenium:4444");
        assert_eq!(wd.browser, "firefox");
        assert!(!wd.headless);
        assert_eq!(wd.event_capacity, 50);

        assert_eq!(cfg.api.bind, "0.0.0.0:9000");
        assert_eq!(cfg.reports.output_dir, Some(PathBuf::from("out/reports")));
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("[links]\nconcurrency = 16\n").unwrap();
        assert_eq!(cfg.links.concurrency, 16);
        assert_eq!(cfg.links.timeout_ms, 5000);
        assert_eq!(cfg.api.bind, "127.0.0.1:8080");
        assert_eq!(cfg.scheduler.default_test_types.len(), 4);
    }

    #[test]
    fn test_unknown_test_type_is_rejected() {
        let err = toml::from_str::<AppConfig>("[scheduler]\ndefault_test_types = [\"visual\"]\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_explicit_path_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load_or_default(Some(&missing)).is_err());

        let path = dir.path().join("pp.toml");
        std::fs::write(&path, "[storage]\npath = \"x.db\"\n").unwrap();
        let cfg = AppConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.storage.path, "x.db");
    }
}
