// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry for the sync scheduler and processing queue worker.
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Run-level metrics ([`PipelineMetrics`]) are recorded into a
//! [`MetricsCollector`] and rolled up into a [`MetricsSummary`]; point-in-time
//! gauges ([`QueueSnapshot`]) report current queue depth and staleness
//! without needing history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// ---------------------------------------------------------------------------
// PipelineMetrics
// ---------------------------------------------------------------------------

/// Metrics captured for a single sync sweep or processing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineMetrics {
    /// `"sync"` or `"process"`.
    pub run_kind: String,
    /// Vendor name (sync) or city banana (process) the run concerned.
    pub target: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Meetings discovered during a sync sweep.
    pub meetings_found: u64,
    /// Meetings fully processed (summarized) during a processing run.
    pub meetings_processed: u64,
    /// Cache hits avoided re-extracting/re-summarizing a packet.
    pub cache_hits: u64,
    /// Cache misses that required full extraction.
    pub cache_misses: u64,
    /// Pages that required OCR fallback.
    pub ocr_pages: u64,
    /// LLM input tokens consumed.
    pub llm_tokens_in: u64,
    /// LLM output tokens produced.
    pub llm_tokens_out: u64,
    /// Errors encountered during the run.
    pub errors_count: u64,
}

// ---------------------------------------------------------------------------
// MetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across multiple recorded runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of runs recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total meetings processed across all runs.
    pub total_meetings_processed: u64,
    /// Total OCR pages processed across all runs.
    pub total_ocr_pages: u64,
    /// Cache hit rate (`hits / (hits + misses)`), 0.0 if no lookups occurred.
    pub cache_hit_rate: f64,
    /// Error rate (errors / total runs).
    pub error_rate: f64,
    /// Per-run-kind counts (deterministic ordering).
    pub run_kind_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            total_meetings_processed: 0,
            total_ocr_pages: 0,
            cache_hit_rate: 0.0,
            error_rate: 0.0,
            run_kind_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe collector for pipeline run metrics.
///
/// Wrap in an `Arc` to share across the scheduler's sync and processing
/// loops (the inner storage is already behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<PipelineMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a completed run's metrics.
    pub fn record(&self, metrics: PipelineMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Return all recorded run metrics.
    pub fn runs(&self) -> Vec<PipelineMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of runs recorded so far.
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.len()
    }

    /// Whether the collector has no recorded runs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded runs.
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let total_meetings_processed: u64 = data.iter().map(|r| r.meetings_processed).sum();
        let total_ocr_pages: u64 = data.iter().map(|r| r.ocr_pages).sum();

        let total_hits: u64 = data.iter().map(|r| r.cache_hits).sum();
        let total_misses: u64 = data.iter().map(|r| r.cache_misses).sum();
        let cache_hit_rate = if total_hits + total_misses == 0 {
            0.0
        } else {
            total_hits as f64 / (total_hits + total_misses) as f64
        };

        let errors: u64 = data.iter().map(|r| r.errors_count).sum();
        let error_rate = errors as f64 / count as f64;

        let mut run_kind_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *run_kind_counts.entry(r.run_kind.clone()).or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            total_meetings_processed,
            total_ocr_pages,
            cache_hit_rate,
            error_rate,
            run_kind_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.clear();
    }
}

// ---------------------------------------------------------------------------
// QueueSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the processing queue, independent of run history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    /// Entries with status `pending`.
    pub pending: u64,
    /// Entries with status `processing`.
    pub processing: u64,
    /// Entries with status `failed` (not yet dead-lettered).
    pub failed: u64,
    /// Entries with status `dead_letter`.
    pub dead_lettered: u64,
    /// Age in seconds of the oldest still-pending entry, if any.
    pub oldest_pending_age_secs: Option<u64>,
}

impl QueueSnapshot {
    /// Emit this snapshot as a structured `tracing` event.
    pub fn emit(&self) {
        info!(
            pending = self.pending,
            processing = self.processing,
            failed = self.failed,
            dead_lettered = self.dead_lettered,
            oldest_pending_age_secs = ?self.oldest_pending_age_secs,
            "queue_snapshot"
        );
    }
}

// ---------------------------------------------------------------------------
// TelemetrySpan
// ---------------------------------------------------------------------------

/// A structured span for tracing integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(
            span_name = %self.name,
            attributes = ?self.attributes,
            "telemetry_span"
        );
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting collected metrics.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON to a string.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn sample_metrics(kind: &str, duration: u64, errors: u64) -> PipelineMetrics {
        PipelineMetrics {
            run_kind: kind.to_string(),
            target: "granicus".to_string(),
            duration_ms: duration,
            meetings_found: 5,
            meetings_processed: 3,
            cache_hits: 2,
            cache_misses: 1,
            ocr_pages: 0,
            llm_tokens_in: 100,
            llm_tokens_out: 200,
            errors_count: errors,
        }
    }

    #[test]
    fn collector_new_is_empty() {
        let c = MetricsCollector::new();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn collector_record_and_len() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 100, 0));
        assert_eq!(c.len(), 1);
        assert!(!c.is_empty());
    }

    #[test]
    fn collector_runs_returns_all() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 10, 0));
        c.record(sample_metrics("process", 20, 0));
        let runs = c.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_kind, "sync");
        assert_eq!(runs[1].run_kind, "process");
    }

    #[test]
    fn collector_clear() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 50, 0));
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn empty_collector_summary() {
        let c = MetricsCollector::new();
        let s = c.summary();
        assert_eq!(s.count, 0);
        assert_eq!(s.cache_hit_rate, 0.0);
        assert_eq!(s.error_rate, 0.0);
        assert!(s.run_kind_counts.is_empty());
    }

    #[test]
    fn single_run_summary_matches() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 42, 0));
        let s = c.summary();
        assert_eq!(s.count, 1);
        assert_eq!(s.mean_duration_ms, 42.0);
        assert_eq!(s.total_meetings_processed, 3);
        assert!((s.cache_hit_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(s.error_rate, 0.0);
        assert_eq!(s.run_kind_counts["sync"], 1);
    }

    #[test]
    fn summary_mean_duration() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 100, 0));
        c.record(sample_metrics("sync", 200, 0));
        c.record(sample_metrics("sync", 300, 0));
        let s = c.summary();
        assert!((s.mean_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_p50_odd_count() {
        let c = MetricsCollector::new();
        for d in [10, 20, 30, 40, 50] {
            c.record(sample_metrics("sync", d, 0));
        }
        let s = c.summary();
        assert!((s.p50_duration_ms - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_error_rate() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("process", 10, 1));
        c.record(sample_metrics("process", 20, 0));
        c.record(sample_metrics("process", 30, 2));
        let s = c.summary();
        assert!((s.error_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_run_kind_counts() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 10, 0));
        c.record(sample_metrics("process", 20, 0));
        c.record(sample_metrics("sync", 30, 0));
        let s = c.summary();
        assert_eq!(s.run_kind_counts["sync"], 2);
        assert_eq!(s.run_kind_counts["process"], 1);
    }

    #[test]
    fn summary_ocr_pages_accumulate() {
        let c = MetricsCollector::new();
        let mut m1 = sample_metrics("process", 10, 0);
        m1.ocr_pages = 4;
        let mut m2 = sample_metrics("process", 10, 0);
        m2.ocr_pages = 6;
        c.record(m1);
        c.record(m2);
        let s = c.summary();
        assert_eq!(s.total_ocr_pages, 10);
    }

    #[test]
    fn cache_hit_rate_all_misses() {
        let c = MetricsCollector::new();
        let mut m = sample_metrics("process", 10, 0);
        m.cache_hits = 0;
        m.cache_misses = 5;
        c.record(m);
        let s = c.summary();
        assert_eq!(s.cache_hit_rate, 0.0);
    }

    #[test]
    fn pipeline_metrics_serde_roundtrip() {
        let m = sample_metrics("sync", 999, 2);
        let json = serde_json::to_string(&m).unwrap();
        let m2: PipelineMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn queue_snapshot_default_is_zero() {
        let s = QueueSnapshot::default();
        assert_eq!(s.pending, 0);
        assert!(s.oldest_pending_age_secs.is_none());
    }

    #[test]
    fn queue_snapshot_serde_roundtrip() {
        let s = QueueSnapshot {
            pending: 3,
            processing: 1,
            failed: 0,
            dead_lettered: 2,
            oldest_pending_age_secs: Some(120),
        };
        let json = serde_json::to_string(&s).unwrap();
        let s2: QueueSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(s, s2);
    }

    #[test]
    fn concurrent_recording() {
        let c = MetricsCollector::new();
        let mut handles = vec![];
        for i in 0..10 {
            let cc = c.clone();
            handles.push(thread::spawn(move || {
                cc.record(sample_metrics("sync", i * 10, 0));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 10);
    }

    #[test]
    fn telemetry_span_attributes() {
        let span = TelemetrySpan::new("sync_sweep")
            .with_attribute("vendor", "granicus")
            .with_attribute("cities", "12");
        assert_eq!(span.name, "sync_sweep");
        assert_eq!(span.attributes.len(), 2);
        assert_eq!(span.attributes["vendor"], "granicus");
    }

    #[test]
    fn json_exporter_valid_output() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("sync", 100, 0));
        let s = c.summary();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["count"], 1);
    }

    #[test]
    fn percentile_empty() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn percentile_single() {
        assert_eq!(percentile(&[42], 99.0), 42.0);
    }
}
