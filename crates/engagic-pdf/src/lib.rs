// SPDX-License-Identifier: MIT OR Apache-2.0
//! PDF packet download, text extraction, and extraction-quality validation (§4.2).
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! A primary text-extraction pass runs over every page; pages whose yield
//! is too thin to be real body text fall through to an OCR backend behind
//! the [`OcrEngine`] trait, so a raster-to-text engine can be wired in
//! without this crate depending on one directly.

use async_trait::async_trait;
use engagic_error::{EngagicError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Hard cap on downloaded PDF size; larger bodies fail closed.
pub const MAX_PDF_SIZE_BYTES: u64 = 100 * 1024 * 1024;
/// Wall-clock budget for a single packet download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Pages beyond this in a single document abort extraction rather than OCR unbounded.
pub const MAX_PAGES: usize = 1000;
/// A page's embedded text below this length (after trimming) triggers OCR.
pub const OCR_THRESHOLD_CHARS: usize = 100;
/// Raster DPI used when a page falls through to OCR.
pub const OCR_DPI: u32 = 300;

/// Terms whose presence in extracted text indicates a plausible civic
/// agenda rather than garbled extraction (§4.2).
pub const CIVIC_VOCABULARY: &[&str] = &[
    "council", "city", "meeting", "agenda", "item", "public", "comment", "session", "board", "commission",
    "appointment", "ordinance", "resolution", "budget", "planning", "zoning", "development", "traffic", "safety",
    "park", "library", "police", "fire", "emergency", "infrastructure", "project", "contract", "approval", "review",
    "hearing", "vote", "motion", "approve", "deny", "discussion", "report", "presentation", "staff", "department",
    "mayor", "member", "chair", "chairman", "chairwoman", "minutes", "action", "adopt", "the", "and", "or", "but",
    "in", "on", "at", "to", "for", "of", "with", "by",
];

// ---------------------------------------------------------------------------
// OCR backend abstraction
// ---------------------------------------------------------------------------

/// A raster-to-text engine invoked when a page's embedded text is too thin
/// to trust. No implementation ships in this crate; callers wire one in.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text on `page_index` (0-based) of `pdf_bytes`, rendered at `dpi`.
    async fn recognize_page(&self, pdf_bytes: &[u8], page_index: usize, dpi: u32) -> Result<String, EngagicError>;
}

/// Default backend for deployments with no OCR engine configured: every
/// page with thin embedded text is reported, not silently dropped.
pub struct UnavailableOcr;

#[async_trait]
impl OcrEngine for UnavailableOcr {
    async fn recognize_page(&self, _pdf_bytes: &[u8], page_index: usize, _dpi: u32) -> Result<String, EngagicError> {
        Err(EngagicError::new(ErrorCode::ExtractionParseFailed, "no OCR backend configured")
            .with_context("page_index", page_index))
    }
}

// ---------------------------------------------------------------------------
// Extraction result
// ---------------------------------------------------------------------------

/// A discovered hyperlink inside the PDF. Not populated by the primary
/// extractor today; reserved for a future link-aware backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfLink {
    /// 0-based page index the link appears on.
    pub page: usize,
    /// Target URL.
    pub url: String,
}

/// Outcome of [`extract_from_bytes`] / [`extract_from_url`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// `true` if text was produced and passed [`validate_text`].
    pub success: bool,
    /// Extracted, normalized text.
    pub text: String,
    /// `"primary"` or `"primary+ocr"`.
    pub method: String,
    /// Number of pages in the document.
    pub page_count: usize,
    /// Wall-clock seconds spent extracting.
    pub extraction_time: f64,
    /// Hyperlinks discovered, when requested.
    pub links: Option<Vec<PdfLink>>,
    /// Number of pages that required OCR fallback.
    pub ocr_pages: u32,
    /// Failure reason, set only when `success` is `false`.
    pub error: Option<String>,
}

impl ExtractionResult {
    fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            text: String::new(),
            method: "primary".to_string(),
            page_count: 0,
            extraction_time: elapsed.as_secs_f64(),
            links: None,
            ocr_pages: 0,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Download `url`, enforcing [`DOWNLOAD_TIMEOUT`] and [`MAX_PDF_SIZE_BYTES`].
///
/// Fails closed on a declared `Content-Length` over the cap, and aborts the
/// stream the moment the running byte total crosses it, rather than buffering
/// an oversized body first.
pub async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, EngagicError> {
    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|e| EngagicError::new(ErrorCode::ExtractionDownloadFailed, "packet download failed").with_source(e))?;

    if let Some(len) = response.content_length() {
        if len > MAX_PDF_SIZE_BYTES {
            return Err(EngagicError::new(ErrorCode::ExtractionDownloadFailed, "declared content-length exceeds cap")
                .with_context("content_length", len)
                .with_context("cap", MAX_PDF_SIZE_BYTES));
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    use tokio_stream::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| EngagicError::new(ErrorCode::ExtractionDownloadFailed, "packet download stream failed").with_source(e))?;
        body.extend_from_slice(&chunk);
        if body.len() as u64 > MAX_PDF_SIZE_BYTES {
            return Err(EngagicError::new(ErrorCode::ExtractionDownloadFailed, "packet body exceeded size cap")
                .with_context("cap", MAX_PDF_SIZE_BYTES));
        }
    }

    Ok(body)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Download `url` and extract its text (§4.2).
pub async fn extract_from_url(
    client: &reqwest::Client,
    url: &str,
    ocr: &dyn OcrEngine,
) -> Result<ExtractionResult, EngagicError> {
    let bytes = download(client, url).await?;
    extract_from_bytes(&bytes, ocr).await
}

/// Extract text from an in-memory PDF (§4.2).
///
/// Runs the primary text layer over every page; any page whose trimmed text
/// is shorter than [`OCR_THRESHOLD_CHARS`] is re-rendered through `ocr`.
/// Documents longer than [`MAX_PAGES`] abort rather than OCR unbounded.
pub async fn extract_from_bytes(bytes: &[u8], ocr: &dyn OcrEngine) -> Result<ExtractionResult, EngagicError> {
    let start = Instant::now();

    let pages = match pdf_extract::extract_text_by_pages(bytes) {
        Ok(pages) => pages,
        Err(e) => {
            return Ok(ExtractionResult::failure(format!("failed to parse PDF: {e}"), start.elapsed()));
        }
    };

    if pages.len() > MAX_PAGES {
        return Ok(ExtractionResult::failure("page limit exceeded", start.elapsed()));
    }

    let mut combined = String::new();
    let mut ocr_pages = 0u32;
    let mut used_ocr = false;

    for (index, page_text) in pages.iter().enumerate() {
        let trimmed = page_text.trim();
        let resolved = if trimmed.len() < OCR_THRESHOLD_CHARS {
            match ocr.recognize_page(bytes, index, OCR_DPI).await {
                Ok(text) => {
                    ocr_pages += 1;
                    used_ocr = true;
                    text
                }
                Err(_) => trimmed.to_string(),
            }
        } else {
            trimmed.to_string()
        };
        combined.push_str(&format!("--- PAGE {} ---\n", index + 1));
        combined.push_str(&resolved);
        combined.push('\n');
    }

    let text = normalize_text(&combined);
    let success = validate_text(&text);

    Ok(ExtractionResult {
        success,
        error: if success { None } else { Some("extracted text failed quality validation".to_string()) },
        text,
        method: if used_ocr { "primary+ocr".to_string() } else { "primary".to_string() },
        page_count: pages.len(),
        extraction_time: start.elapsed().as_secs_f64(),
        links: None,
        ocr_pages,
    })
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Collapse excess whitespace and fix common OCR artifacts (§4.2).
pub fn normalize_text(text: &str) -> String {
    let fixed: String = text.chars().map(|c| if c == '\u{201a}' { ',' } else { c }).collect();
    let fixed = fix_pipe_artifacts(&fixed);

    let mut collapsed_newlines = String::with_capacity(fixed.len());
    let mut newline_run = 0;
    for c in fixed.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                collapsed_newlines.push(c);
            }
        } else {
            newline_run = 0;
            collapsed_newlines.push(c);
        }
    }

    let mut collapsed_spaces = String::with_capacity(collapsed_newlines.len());
    let mut space_run = 0;
    for c in collapsed_newlines.chars() {
        if c == ' ' {
            space_run += 1;
            if space_run <= 1 {
                collapsed_spaces.push(c);
            }
        } else {
            space_run = 0;
            collapsed_spaces.push(c);
        }
    }

    collapsed_spaces
}

/// Replace isolated `|` characters between letters with `I`, a frequent
/// OCR misread of a capital I in serif civic-document fonts.
fn fix_pipe_artifacts(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '|' {
            let prev_alpha = i > 0 && chars[i - 1].is_alphabetic();
            let next_alpha = i + 1 < chars.len() && chars[i + 1].is_alphabetic();
            out.push(if prev_alpha || next_alpha { 'I' } else { c });
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Quality validation
// ---------------------------------------------------------------------------

/// Reject extracted text that looks garbled rather than like a civic document (§4.2).
pub fn validate_text(text: &str) -> bool {
    if text.len() < 100 {
        return false;
    }

    let total_chars = text.chars().count();
    let alpha_chars = text.chars().filter(|c| c.is_alphabetic()).count();
    if total_chars == 0 || (alpha_chars as f64 / total_chars as f64) < 0.30 {
        return false;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 20 {
        return false;
    }

    let first_hundred: Vec<&str> = words.iter().take(100).copied().collect();
    let civic_hits = first_hundred
        .iter()
        .filter(|w| {
            let lowered = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            CIVIC_VOCABULARY.contains(&lowered.as_str())
        })
        .count();
    if civic_hits < 5 {
        return false;
    }

    let single_char_count = first_hundred.iter().filter(|w| w.chars().count() == 1).count();
    if single_char_count > 20 {
        return false;
    }

    true
}
