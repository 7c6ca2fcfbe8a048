use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

use scrape_orchestrator::{
    context_from_config, create_job_span, generate_correlation_id, init_telemetry, JobError, JobKind, JobView,
    LifecycleState, LogRefresh, Notice, NoticeLevel, OrchestratorConfig, ShutdownCoordinator, WorkOrderJobs,
};

#[derive(Parser)]
#[command(name = "scrape-orchestrator")]
#[command(about = "Launch and follow long-running work order and dispenser scrapes")]
#[command(long_about = "Starts backend scrape jobs, follows their progress by polling, and resumes \
                       jobs that were still running when a previous invocation exited. Only one \
                       scrape runs per user at a time.")]
struct Cli {
    /// User whose jobs are started and followed
    #[arg(long, global = true, value_name = "OWNER_ID")]
    user: Option<String>,

    /// Configuration file (defaults to scrape-orchestrator.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the work order list and follow the scrape
    WorkOrders {
        /// Re-scrape even when the backend considers the data current
        #[arg(long)]
        force: bool,
    },
    /// Refresh dispensers for many work orders (all eligible ones unless --ids is given)
    Dispensers {
        /// Comma-separated work order ids to scope the batch to
        #[arg(long, value_delimiter = ',', value_name = "ID,...")]
        ids: Option<Vec<String>>,
        #[arg(long)]
        force: bool,
    },
    /// Refresh dispensers for one work order
    Dispenser {
        /// Work order id
        work_order_id: String,
        #[arg(long)]
        force: bool,
    },
    /// Resume following any job still running from an earlier invocation
    Resume,
    /// List stored session markers with their age
    Markers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    OrchestratorConfig::load_env_file()?;
    let config = OrchestratorConfig::load_from(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    let user = cli
        .user
        .ok_or_else(|| anyhow::anyhow!("--user <OWNER_ID> is required"))?;

    match cli.command {
        Commands::WorkOrders { force } => tokio::runtime::Runtime::new()?.block_on(async {
            let jobs = build_jobs(&config, &user)?;
            jobs.scrape_work_orders(force).await.map_err(rejected)?;
            finish(follow(&jobs, JobKind::WorkOrderScrape).await?)
        }),
        Commands::Dispensers { ids, force } => tokio::runtime::Runtime::new()?.block_on(async {
            let mut jobs = build_jobs(&config, &user)?;
            match ids {
                Some(ids) => {
                    jobs.selection_mut().select_all(ids);
                    println!("📋 Dispatching dispenser scrape for {} work orders", jobs.selection().len());
                    jobs.dispatch_selection(force).await.map_err(rejected)?;
                }
                None => {
                    jobs.scrape_all_dispensers(force).await.map_err(rejected)?;
                }
            }
            finish(follow(&jobs, JobKind::BatchDispenserScrape).await?)
        }),
        Commands::Dispenser { work_order_id, force } => tokio::runtime::Runtime::new()?.block_on(async {
            let jobs = build_jobs(&config, &user)?;
            jobs.scrape_dispensers_for(&work_order_id, force)
                .await
                .map_err(rejected)?;
            finish(follow(&jobs, JobKind::SingleDispenserScrape).await?)
        }),
        Commands::Resume => tokio::runtime::Runtime::new()?.block_on(async {
            let jobs = build_jobs(&config, &user)?;
            let resumed = jobs.mount();
            if resumed.is_empty() {
                println!("Nothing in progress for {user}");
                return Ok(());
            }
            let mut last = None;
            for kind in resumed {
                println!("🔄 Resuming {}", kind.label().to_lowercase());
                last = follow(&jobs, kind).await?.or(last);
            }
            finish(last)
        }),
        Commands::Markers => markers_command(&config, &user),
    }
}

fn build_jobs(config: &OrchestratorConfig, user: &str) -> Result<WorkOrderJobs> {
    let context = context_from_config(config, Arc::new(LogRefresh))?;
    Ok(WorkOrderJobs::new(user, context))
}

/// Shows a rejected start as a warning; nothing was started
fn rejected(error: JobError) -> anyhow::Error {
    println!("{}", render_notice(&Notice::warning(error.to_string())));
    if let JobError::AnotherJobActive { active, .. } = &error {
        println!("   Use `resume` to follow the {} still running.", active.label().to_lowercase());
    }
    anyhow::anyhow!("Scrape not started")
}

fn finish(outcome: Option<LifecycleState>) -> Result<()> {
    match outcome {
        Some(LifecycleState::Failed) => anyhow::bail!("Scrape failed"),
        _ => Ok(()),
    }
}

/// Prints view changes until the job is back to Idle with nothing on display.
/// Returns the terminal state observed, if any. Ctrl-C stops observing and
/// leaves the backend job running.
async fn follow(jobs: &WorkOrderJobs, kind: JobKind) -> Result<Option<LifecycleState>> {
    let Some(mut rx) = jobs.subscribe(kind) else {
        anyhow::bail!("No {kind} job is tracked");
    };
    let correlation_id = generate_correlation_id();
    let span = create_job_span("follow", jobs.owner_id(), Some(kind), Some(&correlation_id));

    async move {
        let mut last_line = String::new();
        let mut last_notice: Option<Notice> = None;
        let mut outcome = None;

        loop {
            let view = rx.borrow_and_update().clone();
            if view.state.is_terminal() {
                outcome = Some(view.state);
            }

            let line = render(&view);
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
            if view.notice != last_notice {
                if let Some(notice) = &view.notice {
                    println!("{}", render_notice(notice));
                }
                last_notice = view.notice.clone();
            }
            if view.state == LifecycleState::Idle && view.notice.is_none() {
                break;
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                signal = ShutdownCoordinator::wait_for_signal() => {
                    signal?;
                    ShutdownCoordinator::default().shutdown(jobs).await?;
                    println!("⏸️  Stopped following; the scrape keeps running. Use `resume` to pick it up again.");
                    return Ok(None);
                }
            }
        }
        Ok(outcome)
    }
    .instrument(span)
    .await
}

fn render(view: &JobView) -> String {
    let mut line = format!("[{}] {}", view.kind.label(), view.state);
    if let Some(snapshot) = &view.snapshot {
        line.push_str(&format!(" {:>5.1}%", snapshot.percentage));
        if !snapshot.phase.is_empty() {
            line.push_str(&format!(" {}", snapshot.phase));
        }
        if !snapshot.message.is_empty() {
            line.push_str(&format!(" - {}", snapshot.message));
        }
        let totals = snapshot.totals;
        if totals.total > 0 {
            line.push_str(&format!(
                " ({}/{} processed, {} failed)",
                totals.processed, totals.total, totals.failed
            ));
        }
    }
    line
}

fn render_notice(notice: &Notice) -> String {
    let icon = match notice.level {
        NoticeLevel::Success => "✅",
        NoticeLevel::Error => "❌",
        NoticeLevel::Info => "ℹ️ ",
        NoticeLevel::Warning => "⚠️ ",
    };
    format!("{icon} {}", notice.message)
}

fn markers_command(config: &OrchestratorConfig, user: &str) -> Result<()> {
    let context = context_from_config(config, Arc::new(LogRefresh))?;
    let markers = context.markers.list(user);
    if markers.is_empty() {
        println!("No session markers for {user}");
        return Ok(());
    }

    let now = Utc::now();
    for marker in markers {
        let stale = if context.markers.is_stale(&marker, now) { " (stale)" } else { "" };
        let scope = match (&marker.extra.target_id, &marker.extra.selected_ids) {
            (Some(target), _) => format!(" work order {target}"),
            (None, Some(ids)) => format!(" {} work orders", ids.len()),
            (None, None) => String::new(),
        };
        println!(
            "{:<18} started {} ({}s ago){}{}",
            marker.kind.slug(),
            marker.started_at.to_rfc3339(),
            marker.age(now).num_seconds(),
            scope,
            stale
        );
    }
    Ok(())
}
