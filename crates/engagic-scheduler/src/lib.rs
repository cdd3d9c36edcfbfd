// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background sync scheduler and processing queue worker (§4.8, §4.9).
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Two long-lived loops share one [`SchedulerState`]: the sync loop
//! discovers meetings vendor group by vendor group, and the queue worker
//! drains whatever the sync loop (or a straggler sweep) enqueued. Both are
//! plain `async fn`s rather than spawned actors, since the binary decides
//! how to run them (concurrently, or once for `--once`/CLI one-shots).

use chrono::Utc;
use engagic_adapters::{AdapterConfig, build_adapter};
use engagic_config::EngagicConfig;
use engagic_core::{City, CityStatus, RawMeetingRecord, Vendor};
use engagic_db::{CityFilter, Database};
use engagic_error::EngagicError;
use engagic_llm::{LlmClient, PromptLibrary, Summarizer, UnavailableLlm};
use engagic_pdf::{OcrEngine, UnavailableOcr};
use engagic_queue::{Prioritized, VendorScoped, group_by_vendor};
use engagic_retry::RetryConfig;
use engagic_telemetry::{MetricsCollector, PipelineMetrics, QueueSnapshot};
use engagic_topics::{Taxonomy, UnknownTopicsLog};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const RECENT_ACTIVITY_HIGH: i64 = 8;
const RECENT_ACTIVITY_MID: i64 = 4;
const RECENT_ACTIVITY_LOW: i64 = 1;
const DUE_HOURS_HIGH: i64 = 12;
const DUE_HOURS_MID: i64 = 24;
const DUE_HOURS_LOW: i64 = 168;
const NEVER_SYNCED_SCORE: i64 = 1_000_000;
const INTER_VENDOR_SLEEP_MIN: Duration = Duration::from_secs(30);
const INTER_VENDOR_SLEEP_JITTER: Duration = Duration::from_secs(10);
const STRAGGLER_BATCH_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Sync priority / due policy (§4.8)
// ---------------------------------------------------------------------------

/// Sync-priority score: more recently-active cities, and cities that have
/// gone longer without a sync, rank higher. Never-synced cities always win.
pub fn sync_priority_score(recent_meeting_count: i64, hours_since_last_sync: Option<i64>) -> i64 {
    let Some(hours) = hours_since_last_sync else {
        return NEVER_SYNCED_SCORE;
    };
    recent_meeting_count * 10 + (hours / 24).min(10)
}

/// How many hours must elapse between syncs for a city at this activity
/// level (§4.8 due policy).
pub fn due_policy_hours(recent_meeting_count: i64) -> i64 {
    if recent_meeting_count >= RECENT_ACTIVITY_HIGH {
        DUE_HOURS_HIGH
    } else if recent_meeting_count >= RECENT_ACTIVITY_MID {
        DUE_HOURS_MID
    } else if recent_meeting_count >= RECENT_ACTIVITY_LOW {
        DUE_HOURS_LOW
    } else {
        DUE_HOURS_LOW
    }
}

/// `true` if a city with this activity/last-sync pair should be synced now.
pub fn is_due(recent_meeting_count: i64, hours_since_last_sync: Option<i64>) -> bool {
    match hours_since_last_sync {
        None => true,
        Some(hours) => hours >= due_policy_hours(recent_meeting_count),
    }
}

// ---------------------------------------------------------------------------
// Sync target: a city wrapped with its computed priority, for group_by_vendor
// ---------------------------------------------------------------------------

struct SyncTarget {
    city: City,
    recent_meeting_count: i64,
    hours_since_last_sync: Option<i64>,
}

impl Prioritized for SyncTarget {
    fn queue_id(&self) -> &str {
        &self.city.banana
    }

    fn priority(&self) -> i64 {
        sync_priority_score(self.recent_meeting_count, self.hours_since_last_sync)
    }
}

impl VendorScoped for SyncTarget {
    fn vendor(&self) -> &str {
        self.city.vendor.as_str()
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// Everything the sync loop and queue worker need, shared across tasks.
pub struct SchedulerState {
    /// Unified database.
    pub db: Arc<Database>,
    /// HTTP client shared by every vendor adapter.
    pub client: reqwest::Client,
    /// Runtime configuration (§6).
    pub config: EngagicConfig,
    /// Adapter-specific knobs (Granicus cache path, Legistar token/window).
    pub adapter_config: AdapterConfig,
    /// Canonical topic taxonomy.
    pub taxonomy: Taxonomy,
    /// LLM prompt templates.
    pub prompts: PromptLibrary,
    /// Summarization backend; [`UnavailableLlm`] when no API key is configured.
    pub llm: Box<dyn LlmClient>,
    /// OCR fallback backend; [`UnavailableOcr`] when none is configured.
    pub ocr: Box<dyn OcrEngine>,
    /// Append-only log of topics the taxonomy didn't recognize.
    pub unknown_log: UnknownTopicsLog,
    /// Recorded run metrics for both loops.
    pub metrics: MetricsCollector,
    /// Cities whose most recent sync attempt failed outright, cleared at
    /// the start of each sweep (§4.8 failure tracking).
    pub failed_cities: Mutex<HashSet<String>>,
    /// Cooperative shutdown flag, checked at city/record boundaries.
    pub running: AtomicBool,
}

impl SchedulerState {
    /// Build scheduler state from a loaded configuration. `llm` and `ocr`
    /// default to the "unavailable" backends when not provided by the
    /// caller; the daemon degrades gracefully rather than failing startup
    /// (§4.8, §7).
    pub fn new(
        config: EngagicConfig,
        db: Database,
        llm: Option<Box<dyn LlmClient>>,
        ocr: Option<Box<dyn OcrEngine>>,
    ) -> Result<Self, EngagicError> {
        let taxonomy = Taxonomy::load(std::path::Path::new(&config.taxonomy_path))?;
        let prompts = PromptLibrary::load(std::path::Path::new(&config.prompts_path))?;
        let unknown_log = UnknownTopicsLog::new(config.unknown_topics_log_path());
        let adapter_config = AdapterConfig {
            granicus_view_ids_path: config.granicus_view_ids_path(),
            ..AdapterConfig::default()
        };

        Ok(Self {
            db: Arc::new(db),
            client: reqwest::Client::new(),
            config,
            adapter_config,
            taxonomy,
            prompts,
            llm: llm.unwrap_or_else(|| Box::new(UnavailableLlm)),
            ocr: ocr.unwrap_or_else(|| Box::new(UnavailableOcr)),
            unknown_log,
            metrics: MetricsCollector::new(),
            failed_cities: Mutex::new(HashSet::new()),
            running: AtomicBool::new(true),
        })
    }

    /// Signal both loops to stop at their next boundary check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn should_continue(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Sync loop (§4.8)
// ---------------------------------------------------------------------------

/// Result of one full sync sweep across every active city.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSweepStats {
    /// Cities actually synced this sweep.
    pub cities_synced: u32,
    /// Cities skipped because they were not yet due.
    pub cities_skipped_not_due: u32,
    /// Cities rejected because their vendor isn't in the supported set.
    pub cities_rejected_unsupported_vendor: u32,
    /// Meetings discovered (before per-record validation) this sweep.
    pub meetings_found: u64,
    /// Meetings accepted by `store_meeting_from_sync`.
    pub meetings_stored: u64,
    /// Meetings skipped by `store_meeting_from_sync` (bad id, validation, shape).
    pub meetings_skipped: u64,
}

/// Run one complete sync sweep (§4.8 sync loop, steps 1-4). Honors
/// cooperative shutdown at city and vendor-group boundaries.
pub async fn run_sync_sweep(state: &SchedulerState) -> Result<SyncSweepStats, EngagicError> {
    let start = std::time::Instant::now();
    let mut stats = SyncSweepStats::default();

    {
        let mut failed = state.failed_cities.lock().expect("failed_cities lock poisoned");
        failed.clear();
    }

    let cities = state.db.get_cities(CityFilter {
        status: Some(CityStatus::Active),
        ..Default::default()
    })?;

    let mut targets = Vec::with_capacity(cities.len());
    for city in cities {
        if Vendor::parse(city.vendor.as_str()).is_none() {
            stats.cities_rejected_unsupported_vendor += 1;
            continue;
        }
        let activity = state.db.city_sync_activity(&city.banana)?;
        targets.push(SyncTarget {
            city,
            recent_meeting_count: activity.recent_meeting_count,
            hours_since_last_sync: activity.hours_since_last_sync,
        });
    }

    let grouped = group_by_vendor(targets);
    let vendor_count = grouped.len();

    for (vendor_index, (vendor_name, mut group)) in grouped.into_iter().enumerate() {
        if !state.should_continue() {
            info!("sync sweep stopping early: shutdown requested");
            break;
        }

        group.sort_by_key(|t| std::cmp::Reverse(t.priority()));
        let vendor = Vendor::parse(&vendor_name);

        for target in &group {
            if !state.should_continue() {
                break;
            }

            if !is_due(target.recent_meeting_count, target.hours_since_last_sync) {
                stats.cities_skipped_not_due += 1;
                debug!(city = %target.city.banana, "sync: not due yet");
                continue;
            }

            if let Some(vendor) = vendor {
                sleep_with_jitter(Duration::from_secs(vendor.min_sync_interval_secs()), Duration::from_secs(1)).await;
            }

            match sync_city_with_retry(state, &target.city).await {
                Ok((found, stored, skipped)) => {
                    stats.cities_synced += 1;
                    stats.meetings_found += found;
                    stats.meetings_stored += stored;
                    stats.meetings_skipped += skipped;
                }
                Err(err) => {
                    warn!(city = %target.city.banana, vendor = %vendor_name, error = %err, "sync: city failed after retries");
                    let mut failed = state.failed_cities.lock().expect("failed_cities lock poisoned");
                    failed.insert(target.city.banana.clone());
                }
            }
        }

        if vendor_index + 1 < vendor_count && state.should_continue() {
            sleep_with_jitter(INTER_VENDOR_SLEEP_MIN, INTER_VENDOR_SLEEP_JITTER).await;
        }
    }

    state.metrics.record(PipelineMetrics {
        run_kind: "sync".to_string(),
        target: "sweep".to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        meetings_found: stats.meetings_found,
        meetings_processed: 0,
        cache_hits: 0,
        cache_misses: 0,
        ocr_pages: 0,
        llm_tokens_in: 0,
        llm_tokens_out: 0,
        errors_count: stats.cities_rejected_unsupported_vendor as u64,
    });

    Ok(stats)
}

/// `_sync_city_with_retry` (§4.8): fetch this city's meetings under
/// [`RetryConfig::scheduler_city_retry`], then call `store_meeting_from_sync`
/// per record. Returns `(meetings_found, meetings_stored, meetings_skipped)`.
pub async fn sync_city_with_retry(state: &SchedulerState, city: &City) -> Result<(u64, u64, u64), EngagicError> {
    let adapter = build_adapter(city, state.client.clone(), &state.adapter_config);
    let retry_config = RetryConfig::scheduler_city_retry();

    let outcome = engagic_retry::retry_async(
        &retry_config,
        || adapter.fetch_meetings(),
        |_: &EngagicError| true,
    )
    .await
    .map_err(|e| match e {
        engagic_retry::RetryError::Operation(err) => err,
        engagic_retry::RetryError::TimedOut { duration } => {
            EngagicError::new(engagic_error::ErrorCode::AdapterTransportFailed, format!("sync retry loop timed out after {duration:?}"))
        }
    })?;

    let records: Vec<RawMeetingRecord> = outcome.value;
    let found = records.len() as u64;
    let mut stored = 0u64;
    let mut skipped = 0u64;

    for record in records {
        let (meeting, sync_stats) = state.db.store_meeting_from_sync(record, city)?;
        if meeting.is_some() {
            stored += 1;
        }
        skipped += sync_stats.meetings_skipped as u64;
    }

    Ok((found, stored, skipped))
}

async fn sleep_with_jitter(base: Duration, jitter: Duration) {
    let extra_ms = if jitter.is_zero() {
        0
    } else {
        rand::Rng::gen_range(&mut rand::thread_rng(), 0..=jitter.as_millis() as u64)
    };
    tokio::time::sleep(base + Duration::from_millis(extra_ms)).await;
}

// ---------------------------------------------------------------------------
// Processing loop (§4.8 stragglers) + queue worker (§4.9)
// ---------------------------------------------------------------------------

/// Scan for meetings with a packet but no queue entry and enqueue them
/// (§4.8 processing loop: catches rows a sync write's per-record enqueue
/// missed).
pub async fn run_straggler_sweep(state: &SchedulerState) -> Result<u64, EngagicError> {
    if !state.config.can_summarize() {
        info!("processing loop: no LLM key configured, skipping straggler sweep (read-only mode)");
        return Ok(0);
    }

    let stragglers = state.db.get_unprocessed_meetings(STRAGGLER_BATCH_LIMIT)?;
    let mut enqueued = 0u64;
    for meeting in stragglers {
        if !state.should_continue() {
            break;
        }
        let Some(packet_url) = &meeting.packet_url else { continue };
        let days_since = meeting.date.map(|d| (Utc::now() - d).num_days()).unwrap_or(0);
        let priority = engagic_core::meeting_enqueue_priority(days_since);
        let source_url = packet_url.cache_key();
        state.db.enqueue_for_processing(&source_url, &meeting.id, &meeting.city_banana, priority, None)?;
        enqueued += 1;
    }
    Ok(enqueued)
}

/// Outcome of draining one queue entry (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// The queue was empty; nothing to do.
    Idle,
    /// An entry was claimed and completed (possibly with partial item failures).
    Completed {
        /// The claimed entry's id.
        id: i64,
    },
    /// An entry was claimed and marked failed (or dead-lettered).
    Failed {
        /// The claimed entry's id.
        id: i64,
        /// Failure reason recorded on the row.
        reason: String,
    },
}

/// Pull exactly one entry off the queue and process it to completion
/// (§4.9 pull -> process -> mark). Returns [`WorkerOutcome::Idle`] when
/// there is nothing pending.
pub async fn process_next_queue_entry(state: &SchedulerState) -> Result<WorkerOutcome, EngagicError> {
    let Some(entry) = state.db.get_next_for_processing(None)? else {
        return Ok(WorkerOutcome::Idle);
    };

    let start = std::time::Instant::now();
    let result = if entry.source_url.starts_with("items://") {
        process_item_batch_entry(state, &entry).await
    } else {
        process_monolithic_entry(state, &entry).await
    };

    let outcome = match result {
        Ok(()) => {
            state.db.mark_processing_complete(entry.id)?;
            WorkerOutcome::Completed { id: entry.id }
        }
        Err(err) => {
            let message = err.to_string();
            state.db.mark_processing_failed(entry.id, &message, true)?;
            warn!(queue_id = entry.id, error = %message, "queue worker: entry failed");
            WorkerOutcome::Failed { id: entry.id, reason: message }
        }
    };

    state.metrics.record(PipelineMetrics {
        run_kind: "process".to_string(),
        target: entry.city_banana.clone(),
        duration_ms: start.elapsed().as_millis() as u64,
        meetings_found: 0,
        meetings_processed: matches!(outcome, WorkerOutcome::Completed { .. }) as u64,
        cache_hits: 0,
        cache_misses: 0,
        ocr_pages: 0,
        llm_tokens_in: 0,
        llm_tokens_out: 0,
        errors_count: matches!(outcome, WorkerOutcome::Failed { .. }) as u64,
    });

    Ok(outcome)
}

async fn process_monolithic_entry(state: &SchedulerState, entry: &engagic_core::QueueEntry) -> Result<(), EngagicError> {
    let meeting = state
        .db
        .get_meeting(&entry.meeting_id)?
        .ok_or_else(|| EngagicError::new(engagic_error::ErrorCode::DbIntegrityViolation, "queue entry references a missing meeting"))?;
    let packet_url = meeting
        .packet_url
        .as_ref()
        .ok_or_else(|| EngagicError::new(engagic_error::ErrorCode::DbIntegrityViolation, "monolithic queue entry has no packet"))?;

    let summarizer = Summarizer::new(state.llm.as_ref(), &state.prompts, &state.taxonomy, Some(&state.unknown_log));
    engagic_pipeline::analyze_meeting(&state.client, state.ocr.as_ref(), &summarizer, &state.db, &meeting.id, packet_url).await?;
    Ok(())
}

async fn process_item_batch_entry(state: &SchedulerState, entry: &engagic_core::QueueEntry) -> Result<(), EngagicError> {
    let items = state.db.get_agenda_items(&entry.meeting_id)?;
    if items.is_empty() {
        return Ok(());
    }

    let mut requests = Vec::with_capacity(items.len());
    for item in &items {
        if item.summary.is_some() {
            continue;
        }
        let mut text = String::new();
        for attachment in &item.attachments {
            if let Ok(extraction) = engagic_pdf::extract_from_url(&state.client, &attachment.url, state.ocr.as_ref()).await {
                if extraction.success {
                    text.push_str(&extraction.text);
                    text.push('\n');
                }
            }
        }
        requests.push(engagic_llm::ItemRequest { id: item.id.clone(), title: item.title.clone(), text });
    }

    if requests.is_empty() {
        return Ok(());
    }

    let summarizer = Summarizer::new(state.llm.as_ref(), &state.prompts, &state.taxonomy, Some(&state.unknown_log));

    // Persist after every chunk, not just once at the end: a chunk can take
    // up to the full poll window plus the inter-chunk sleep, and a crash
    // between chunks must not lose already-completed item summaries (§4.3,
    // §4.9).
    let mut updated: Vec<engagic_core::AgendaItem> = items;
    let mut any_succeeded = false;
    let mut persist_error: Option<EngagicError> = None;

    summarizer
        .summarize_items(&requests, |chunk_results| {
            if persist_error.is_some() {
                return;
            }
            for (item_id, result) in chunk_results {
                if let engagic_core::BatchResult::Succeeded { content } = result {
                    any_succeeded = true;
                    if let Some(item) = updated.iter_mut().find(|i| i.id == *item_id) {
                        item.summary = Some(content.to_markdown());
                        item.topics = content.topics.clone();
                    }
                }
            }
            if let Err(err) = state.db.store_agenda_items(&entry.meeting_id, &updated) {
                persist_error = Some(err);
            }
        })
        .await;

    if let Some(err) = persist_error {
        return Err(err);
    }

    if !any_succeeded {
        return Err(EngagicError::new(engagic_error::ErrorCode::LlmRequestFailed, "every item in the batch failed"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Long-lived loops
// ---------------------------------------------------------------------------

/// Run the sync loop forever, sweeping every `sync_interval_hours` (§4.8).
pub async fn run_sync_loop(state: &SchedulerState) {
    loop {
        if !state.should_continue() {
            return;
        }
        match run_sync_sweep(state).await {
            Ok(stats) => info!(?stats, "sync sweep complete"),
            Err(err) => warn!(error = %err, "sync sweep failed"),
        }
        if !sleep_or_stop(state, Duration::from_secs(state.config.sync_interval_hours * 3600)).await {
            return;
        }
    }
}

/// Run the straggler-scanning processing loop forever, sweeping every
/// `processing_interval_hours` (§4.8). A no-op loop (still sleeps, never
/// enqueues) when the summarizer cannot be constructed.
pub async fn run_processing_loop(state: &SchedulerState) {
    loop {
        if !state.should_continue() {
            return;
        }
        match run_straggler_sweep(state).await {
            Ok(n) if n > 0 => info!(enqueued = n, "processing loop: stragglers enqueued"),
            Ok(_) => debug!("processing loop: no stragglers"),
            Err(err) => warn!(error = %err, "processing loop failed"),
        }
        if !sleep_or_stop(state, Duration::from_secs(state.config.processing_interval_hours * 3600)).await {
            return;
        }
    }
}

/// Drain the processing queue continuously, sleeping briefly whenever it is
/// empty rather than busy-looping (§4.9).
pub async fn run_queue_worker_loop(state: &SchedulerState) {
    loop {
        if !state.should_continue() {
            return;
        }
        match process_next_queue_entry(state).await {
            Ok(WorkerOutcome::Idle) => {
                if !sleep_or_stop(state, Duration::from_secs(5)).await {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "queue worker: unexpected error pulling next entry");
                if !sleep_or_stop(state, Duration::from_secs(5)).await {
                    return;
                }
            }
        }
    }
}

/// Emit a [`QueueSnapshot`] for the current queue state.
pub fn queue_snapshot(state: &SchedulerState) -> Result<QueueSnapshot, EngagicError> {
    let report = state.db.get_queue_stats()?;
    Ok(QueueSnapshot {
        pending: report.pending.max(0) as u64,
        processing: report.processing.max(0) as u64,
        failed: report.failed.max(0) as u64,
        dead_lettered: report.dead_letter.max(0) as u64,
        oldest_pending_age_secs: None,
    })
}

/// Sleep for `duration`, checking the shutdown flag in short increments so a
/// long sleep (e.g. 7 days) doesn't block shutdown. Returns `false` if the
/// caller should stop looping.
async fn sleep_or_stop(state: &SchedulerState, duration: Duration) -> bool {
    const TICK: Duration = Duration::from_secs(5);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !state.should_continue() {
            return false;
        }
        let step = remaining.min(TICK);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    state.should_continue()
}
