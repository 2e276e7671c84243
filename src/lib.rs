//! PageParamedic -- scheduled end-to-end quality checks for web sites.
//!
//! This crate provides the core library for page probes, link validation,
//! bug normalization, run coordination, cron scheduling and reporting.

pub mod api;
pub mod bugs;
pub mod config;
pub mod coordinator;
pub mod extract;
pub mod links;
pub mod probes;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod storage;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::coordinator::RunCoordinator;
use crate::links::LinkValidator;
use crate::probes::ProbeRegistry;
use crate::session::webdriver::WebDriverFactory;
use crate::storage::Pool;

/// Wire the run coordinator from configuration: link validator, probe
/// registry and a WebDriver session factory.
pub fn build_coordinator(config: &AppConfig, pool: Pool) -> Result<RunCoordinator> {
    let validator = LinkValidator::new(
        config.links.timeout(),
        config.links.concurrency,
        config.links.max_redirects,
    )?;
    let registry = Arc::new(ProbeRegistry::standard(validator));
    let sessions = Arc::new(
        WebDriverFactory::new(config.browser.webdriver()).context("Failed to set up WebDriver client")?,
    );

    Ok(RunCoordinator::new(pool, registry, sessions, &config.browser.browser)
        .with_report_dir(config.reports.output_dir.clone()))
}

/// Start the PageParamedic daemon: API server and scheduler.
pub async fn serve(config: &AppConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = &config.storage.path;
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(db_path)?;

    // 2. Initialize Scheduler
    let scheduler = scheduler::Scheduler::new(pool.clone()).with_grace_window(config.scheduler.grace_window());
    let loaded = scheduler.reload()?;
    tracing::info!(schedules = loaded, "Schedules loaded");

    // 3. Start Scheduler Engine (background task)
    let coordinator = Arc::new(build_coordinator(config, pool.clone())?);
    let engine = scheduler::SchedulerEngine::new(
        scheduler.clone(),
        coordinator,
        config.scheduler.default_test_types.clone(),
    )
    .with_poll_interval(config.scheduler.poll_interval());
    tokio::spawn(async move {
        scheduler::run_scheduler_loop(engine).await;
    });

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;
    let app = api::router(api::state::AppState::new(pool, scheduler));

    tracing::info!(%addr, "PageParamedic listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
