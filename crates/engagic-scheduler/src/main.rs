// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use engagic_db::{CityLookup, Database};
use engagic_scheduler::{SchedulerState, WorkerOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for a fatal startup error (§6).
const EXIT_STARTUP_ERROR: i32 = 1;

/// Municipal meeting agenda ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "engagic-scheduler", version, about = "Civic agenda sync scheduler and processing worker")]
struct Cli {
    /// Path to the config file (default search order applies otherwise).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one sync sweep and drain the queue, then exit, instead of
    /// looping forever.
    #[arg(long)]
    once: bool,

    /// Sync a single city by its banana id and exit.
    #[arg(long, value_name = "BANANA")]
    sync_city: Option<String>,

    /// Run the Pipeline Analyzer against one already-queued meeting's
    /// source url and print the summary, then exit.
    #[arg(long, value_name = "URL")]
    process_meeting: Option<String>,

    /// Print queue and sync status as JSON and exit.
    #[arg(long)]
    status: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).init();

    if let Err(err) = run(cli).await {
        tracing::error!(error = format!("{err:#}"), "fatal startup error");
        std::process::exit(EXIT_STARTUP_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = engagic_config::load_config(cli.config.as_deref()).context("loading configuration")?;
    for warning in engagic_config::validate_config(&config).context("validating configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let db = Database::open(&config.db_path()).context("opening unified database")?;

    // No concrete LLM/OCR backend ships in this workspace (§4.2, §4.3); a
    // deployment wires one in by constructing `SchedulerState` directly
    // instead of going through this binary's `main`. Absent that, the
    // daemon still runs and degrades gracefully (§4.8, §7).
    let state = SchedulerState::new(config, db, None, None).context("building scheduler state")?;

    if let Some(banana) = cli.sync_city {
        return sync_one_city(&state, &banana).await;
    }

    if let Some(url) = cli.process_meeting {
        return process_one_meeting(&state, &url).await;
    }

    if cli.status {
        return print_status(&state);
    }

    if cli.once {
        return run_once(&state).await;
    }

    run_daemon(state).await
}

async fn run_once(state: &SchedulerState) -> Result<()> {
    let sync_stats = engagic_scheduler::run_sync_sweep(state).await.context("sync sweep")?;
    tracing::info!(?sync_stats, "one-shot sync sweep complete");
    let enqueued = engagic_scheduler::run_straggler_sweep(state).await.context("straggler sweep")?;
    tracing::info!(enqueued, "one-shot straggler sweep complete");
    loop {
        match engagic_scheduler::process_next_queue_entry(state).await? {
            WorkerOutcome::Idle => break,
            WorkerOutcome::Completed { id } => tracing::info!(id, "queue entry completed"),
            WorkerOutcome::Failed { id, reason } => tracing::warn!(id, reason, "queue entry failed"),
        }
    }
    Ok(())
}

async fn run_daemon(state: SchedulerState) -> Result<()> {
    let state = Arc::new(state);

    let sync_state = Arc::clone(&state);
    let sync_handle = tokio::spawn(async move { engagic_scheduler::run_sync_loop(&sync_state).await });

    let processing_state = Arc::clone(&state);
    let processing_handle = tokio::spawn(async move { engagic_scheduler::run_processing_loop(&processing_state).await });

    let worker_state = Arc::clone(&state);
    let worker_handle = tokio::spawn(async move { engagic_scheduler::run_queue_worker_loop(&worker_state).await });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    state.stop();

    let _ = tokio::join!(sync_handle, processing_handle, worker_handle);
    Ok(())
}

async fn sync_one_city(state: &SchedulerState, banana: &str) -> Result<()> {
    let city = state
        .db
        .get_city(CityLookup::Banana(banana))
        .context("looking up city")?
        .with_context(|| format!("unknown city: {banana}"))?;
    let (found, stored, skipped) = engagic_scheduler::sync_city_with_retry(state, &city).await.context("syncing city")?;
    println!(
        "{}",
        serde_json::json!({ "banana": banana, "meetings_found": found, "meetings_stored": stored, "meetings_skipped": skipped })
    );
    Ok(())
}

/// Run the Pipeline Analyzer (or item-batch summarizer) against whatever is
/// already queued under `source_url`, bypassing the claim/retry machinery
/// that the long-running worker loop uses.
async fn process_one_meeting(state: &SchedulerState, source_url: &str) -> Result<()> {
    let entry = state
        .db
        .find_queue_entry_by_source_url(source_url)
        .context("looking up queue entry")?
        .with_context(|| format!("no queue entry for source url: {source_url}"))?;

    let meeting = state
        .db
        .get_meeting(&entry.meeting_id)
        .context("looking up meeting")?
        .with_context(|| format!("queue entry references a missing meeting: {}", entry.meeting_id))?;

    if source_url.starts_with("items://") {
        let items = state.db.get_agenda_items(&meeting.id).context("loading agenda items")?;
        println!("{}", serde_json::json!({ "meeting_id": meeting.id, "agenda_item_count": items.len() }));
        return Ok(());
    }

    let packet_url = meeting.packet_url.as_ref().context("meeting has no packet url")?;
    let summarizer =
        engagic_llm::Summarizer::new(state.llm.as_ref(), &state.prompts, &state.taxonomy, Some(&state.unknown_log));
    let outcome = engagic_pipeline::analyze_meeting(&state.client, state.ocr.as_ref(), &summarizer, &state.db, &meeting.id, packet_url)
        .await
        .context("running pipeline analyzer")?;

    println!("{}", serde_json::json!({ "success": outcome.success, "method": outcome.method, "summary": outcome.summary }));
    Ok(())
}

fn print_status(state: &SchedulerState) -> Result<()> {
    let queue = engagic_scheduler::queue_snapshot(state).context("reading queue stats")?;
    let failed_cities: Vec<String> = state.failed_cities.lock().expect("failed_cities lock poisoned").iter().cloned().collect();
    println!(
        "{}",
        serde_json::json!({
            "queue": {
                "pending": queue.pending,
                "processing": queue.processing,
                "failed": queue.failed,
                "dead_lettered": queue.dead_lettered,
            },
            "can_summarize": state.config.can_summarize(),
            "failed_cities": failed_cities,
        })
    );
    Ok(())
}
