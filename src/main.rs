use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pageparamedic::config::{AppConfig, LogFormat};
use pageparamedic::probes::{TestStatus, TestType};
use pageparamedic::report::{self, ReportData, ReportFormat};
use pageparamedic::scheduler::Scheduler;
use pageparamedic::storage::{self, Project};

#[derive(Parser)]
#[command(
    name = "pageparamedic",
    about = "Scheduled end-to-end quality checks for web sites",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $PAGEPARAMEDIC_CONFIG, then ./pageparamedic.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler)
    Serve {
        /// Bind address, overriding `[api] bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a test suite against a project right now
    Run {
        /// Project id
        #[arg(long)]
        project: String,

        /// Target URL (default: the project's base URL). Registers the project if unknown.
        #[arg(long)]
        url: Option<String>,

        /// Comma-separated test types
        #[arg(long, value_delimiter = ',')]
        tests: Vec<TestType>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage projects (sites under test)
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage scheduled runs
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Render the report for a past execution
    Report {
        /// Execution id
        #[arg(long)]
        execution: String,

        /// json, html or markdown
        #[arg(long, default_value = "json")]
        format: ReportFormat,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register or update a project
    Add {
        #[arg(long)]
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        /// Base URL scheduled runs are pointed at
        #[arg(long)]
        url: String,
    },

    /// List all projects
    List,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List schedules
    List {
        /// Only this project's schedules
        #[arg(long)]
        project: Option<String>,
    },

    /// Add a new schedule
    Add {
        #[arg(long)]
        project: String,

        /// Schedule name
        #[arg(long)]
        name: String,

        /// Cron expression (5-field)
        #[arg(long)]
        cron: String,
    },

    /// Disable a schedule by id
    Disable {
        #[arg(long)]
        id: String,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASS",
        TestStatus::Failed => "FAIL",
        TestStatus::Warning => "WARN",
        TestStatus::Skipped => "SKIP",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    init_tracing(config.logging.format);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting PageParamedic daemon");
            pageparamedic::serve(&config).await?;
        }
        Commands::Run {
            project,
            url,
            tests,
            json,
        } => {
            let pool = storage::open_pool(&config.storage.path)?;
            let base_url = match (url, storage::get_project(&pool, &project)?) {
                (Some(url), Some(_)) => url,
                (Some(url), None) => {
                    storage::upsert_project(
                        &pool,
                        &Project {
                            id: project.clone(),
                            name: project.clone(),
                            base_url: url.clone(),
                        },
                    )?;
                    url
                }
                (None, Some(p)) => p.base_url,
                (None, None) => bail!("unknown project '{}'; pass --url or run `project add` first", project),
            };
            let tests = if tests.is_empty() {
                TestType::default_suite()
            } else {
                tests
            };

            tracing::info!(%project, %base_url, "Running test suite");
            let coordinator = pageparamedic::build_coordinator(&config, pool)?;
            let outcome = coordinator.run_suite(&project, &base_url, &tests).await?;
            let exec = &outcome.execution;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.execution)?);
            } else {
                println!("\nPageParamedic Test Run {}", exec.id);
                println!("Target: {}", exec.target_url);
                println!("{:<16} | {:<6} | {:>8} | Message", "Test", "Status", "Time");
                println!("{:-<16}-|-{:-<6}-|-{:->8}-|-{:-<40}", "", "", "", "");
                for r in &outcome.results {
                    println!(
                        "{:<16} | {:<6} | {:>6}ms | {}",
                        r.test_type,
                        status_label(r.status),
                        r.duration_ms,
                        r.message
                    );
                    if let Some(err) = &r.error {
                        println!("{:<16} | {:<6} | {:>8} |   -> {}", "", "", "", err);
                    }
                }
                println!(
                    "\nTotal: {}  Passed: {}  Warnings: {}  Failed: {}  Bugs: {}",
                    exec.total_tests,
                    exec.passed,
                    exec.warnings,
                    exec.failed,
                    outcome.bugs.len()
                );
                println!();
            }
        }
        Commands::Project { action } => {
            let pool = storage::open_pool(&config.storage.path)?;
            match action {
                ProjectAction::Add { id, name, url } => {
                    url::Url::parse(&url).with_context(|| format!("invalid URL '{}'", url))?;
                    let project = Project {
                        name: name.unwrap_or_else(|| id.clone()),
                        id,
                        base_url: url,
                    };
                    storage::upsert_project(&pool, &project)?;
                    println!("Project '{}' saved ({}).", project.id, project.base_url);
                }
                ProjectAction::List => {
                    let list = storage::list_projects(&pool)?;
                    if list.is_empty() {
                        println!("No projects found.");
                    } else {
                        println!("{:<20} | {:<20} | Base URL", "Id", "Name");
                        println!("{:-<20}-|-{:-<20}-|-{:-<30}", "", "", "");
                        for p in list {
                            println!("{:<20} | {:<20} | {}", p.id, p.name, p.base_url);
                        }
                    }
                }
            }
        }
        Commands::Schedule { action } => {
            let pool = storage::open_pool(&config.storage.path)?;
            let scheduler = Scheduler::new(pool.clone()).with_grace_window(config.scheduler.grace_window());

            match action {
                ScheduleAction::List { project } => {
                    let list = scheduler.list(project.as_deref())?;
                    if list.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!(
                            "{:<36} | {:<20} | {:<15} | {:<12} | {:<7} | Next run",
                            "Id", "Name", "Cron", "Project", "Enabled"
                        );
                        println!("{:-<36}-|-{:-<20}-|-{:-<15}-|-{:-<12}-|-{:-<7}-|-{:-<20}", "", "", "", "", "", "");
                        for t in list {
                            let next = t
                                .next_run
                                .map(|n| n.format("%Y-%m-%d %H:%M UTC").to_string())
                                .unwrap_or_else(|| "-".to_string());
                            println!(
                                "{:<36} | {:<20} | {:<15} | {:<12} | {:<7} | {}",
                                t.id, t.name, t.cron_expr, t.project_id, t.enabled, next
                            );
                        }
                    }
                }
                ScheduleAction::Add { project, name, cron } => {
                    if storage::get_project(&pool, &project)?.is_none() {
                        bail!("unknown project '{}'; run `project add` first", project);
                    }
                    let task = scheduler.add_schedule(&project, &name, &cron)?;
                    println!("Schedule '{}' added ({}).", name, task.id);
                }
                ScheduleAction::Disable { id } => {
                    scheduler.disable(&id)?;
                    println!("Schedule '{}' disabled.", id);
                }
                ScheduleAction::DryRun { hours } => {
                    let preview = scheduler.preview_next_runs(hours, chrono::Utc::now())?;
                    if preview.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for run in preview {
                            println!(
                                "{} : {} ({})",
                                run.at.format("%Y-%m-%d %H:%M UTC"),
                                run.name,
                                run.project_id
                            );
                        }
                    }
                }
            }
        }
        Commands::Report {
            execution,
            format,
            output,
        } => {
            let pool = storage::open_pool(&config.storage.path)?;
            let data = ReportData::load(&pool, &execution)?;
            let body = report::generate(&data, format, chrono::Utc::now())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, body)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}", path.display());
                }
                None => println!("{}", body),
            }
        }
    }

    Ok(())
}
