// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline Analyzer (§4.7): the glue between PDF extraction, the LLM
//! summarizer, and the unified database for a single meeting's packet.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use engagic_core::{PacketUrl, ParticipationInfo};
use engagic_db::Database;
use engagic_error::{EngagicError, ErrorCode};
use engagic_llm::Summarizer;
use engagic_pdf::OcrEngine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Participation-info extraction (§4.7a)
// ---------------------------------------------------------------------------

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").unwrap());
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}").unwrap());
static VIDEO_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[\w.-]*zoom\.us/\S+|https?://teams\.microsoft\.com/\S+").unwrap());
static DIAL_IN_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)dial-in|call-in|conference line").unwrap());

/// Scan extracted agenda text for contact/join info (§4.7a). Returns `None`
/// when nothing is found, so callers can distinguish "no participation
/// info present" from "found but empty".
pub fn parse_participation_info(text: &str) -> Option<ParticipationInfo> {
    let email = EMAIL.find(text).map(|m| m.as_str().to_string());
    let phone = PHONE.find(text).map(|m| m.as_str().to_string());
    let zoom_url = VIDEO_URL.find(text).map(|m| m.as_str().to_string());
    let dial_in = find_dial_in(text);

    let info = ParticipationInfo { email, phone, zoom_url, dial_in };
    if info.is_empty() { None } else { Some(info) }
}

/// Find a phone-shaped token on the same line as a dial-in label, or the
/// next line if the label's own line has none.
fn find_dial_in(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (index, line) in lines.iter().enumerate() {
        if !DIAL_IN_LABEL.is_match(line) {
            continue;
        }
        if let Some(m) = PHONE.find(line) {
            return Some(m.as_str().to_string());
        }
        if let Some(next) = lines.get(index + 1) {
            if let Some(m) = PHONE.find(next) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Packet extraction (handles PacketUrl::Multi by concatenating)
// ---------------------------------------------------------------------------

struct CombinedExtraction {
    text: String,
    method: String,
    success: bool,
}

async fn extract_packet(
    client: &reqwest::Client,
    packet_url: &PacketUrl,
    ocr: &dyn OcrEngine,
) -> Result<CombinedExtraction, EngagicError> {
    let mut combined = String::new();
    let mut used_ocr = false;
    let mut all_succeeded = true;

    for url in packet_url.urls() {
        let result = engagic_pdf::extract_from_url(client, url, ocr).await?;
        if !result.success {
            all_succeeded = false;
            continue;
        }
        if result.method == "primary+ocr" {
            used_ocr = true;
        }
        combined.push_str(&result.text);
        combined.push('\n');
    }

    Ok(CombinedExtraction {
        text: combined,
        method: if used_ocr { "primary+ocr".to_string() } else { "primary".to_string() },
        success: all_succeeded && !combined.trim().is_empty(),
    })
}

// ---------------------------------------------------------------------------
// Analysis outcome
// ---------------------------------------------------------------------------

/// Result of running the Pipeline Analyzer over a single meeting's packet.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// `true` if a summary was produced (or already cached).
    pub success: bool,
    /// The meeting's markdown summary.
    pub summary: String,
    /// Wall-clock seconds the run (or the original cached run) took.
    pub processing_time: f64,
    /// Which tier produced the summary.
    pub method: String,
    /// `true` if this was served from the cache without re-extracting or
    /// re-summarizing.
    pub cached: bool,
}

/// Run the Pipeline Analyzer for one meeting (§4.7 steps 1-6).
///
/// On a cache hit, returns immediately without touching the extractor or
/// summarizer. On a miss, extracts the packet, validates the text quality,
/// parses participation info, summarizes, and writes the summary,
/// participation, and cache row back in one transaction.
pub async fn analyze_meeting(
    client: &reqwest::Client,
    ocr: &dyn OcrEngine,
    summarizer: &Summarizer<'_>,
    db: &Database,
    meeting_id: &str,
    packet_url: &PacketUrl,
) -> Result<AnalysisOutcome, EngagicError> {
    if let Some(cached) = db.get_cached_summary(packet_url)? {
        if let Some(summary) = cached.summary {
            tracing::debug!(meeting_id, "pipeline: cache hit");
            return Ok(AnalysisOutcome {
                success: true,
                summary,
                processing_time: cached.processing_time,
                method: cached.processing_method,
                cached: true,
            });
        }
    }

    let start = Instant::now();
    let extraction = extract_packet(client, packet_url, ocr).await?;
    if !extraction.success {
        return Err(EngagicError::new(ErrorCode::ExtractionLowQuality, "packet text failed quality validation")
            .with_context("meeting_id", meeting_id.to_string()));
    }

    let participation = parse_participation_info(&extraction.text);
    let summary = summarizer.summarize_meeting(&extraction.text).await?;
    let processing_time = start.elapsed().as_secs_f64();

    db.complete_processing(
        meeting_id,
        packet_url,
        &extraction.text,
        &summary,
        &extraction.method,
        processing_time,
        participation,
    )?;

    Ok(AnalysisOutcome { success: true, summary, processing_time, method: extraction.method, cached: false })
}
