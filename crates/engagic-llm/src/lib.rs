// SPDX-License-Identifier: MIT OR Apache-2.0
//! Meeting and agenda-item summarization over an external chat-completion
//! API (§4.3), plus the meeting-level cleanup pass (§4.3a).
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Routing (model tier, prompt variant, thinking budget) is pure and
//! testable without a live API; the actual request/response exchange is
//! behind [`LlmClient`] so this crate never depends on a provider SDK
//! directly, mirroring `engagic-pdf`'s [`OcrEngine`](engagic_pdf) split
//! between algorithm and backend.

use engagic_core::BatchResult;
use engagic_error::{EngagicError, ErrorCode};
use engagic_topics::{Taxonomy, UnknownTopicsLog};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Model / prompt / thinking-budget routing (§4.3)
// ---------------------------------------------------------------------------

/// The "lite" model used when a document is small enough (§4.3).
pub const LITE_MODEL: &str = "gemini-2.5-flash";
/// The "flagship" model used for larger documents or forced item variants.
pub const FLAGSHIP_MODEL: &str = "gemini-2.5-pro";

const MODEL_SIZE_CHAR_CAP: usize = 200_000;
const MODEL_SIZE_PAGE_CAP: usize = 50;
const MEETING_SHORT_PAGE_CAP: usize = 30;
const ITEM_LARGE_PAGE_THRESHOLD: usize = 100;
const THINKING_DISABLED_PAGE_CAP: usize = 10;
const THINKING_DISABLED_CHAR_CAP: usize = 30_000;
const THINKING_MODERATE_PAGE_CAP: usize = 50;
const THINKING_MODERATE_CHAR_CAP: usize = 150_000;
const THINKING_MODERATE_BUDGET: i64 = 2048;
const THINKING_DYNAMIC_BUDGET: i64 = -1;

/// Which model a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// The smaller, cheaper model.
    Lite,
    /// The larger model used for big or complex documents.
    Flagship,
}

impl ModelTier {
    /// The provider model identifier for this tier.
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::Lite => LITE_MODEL,
            Self::Flagship => FLAGSHIP_MODEL,
        }
    }
}

/// Estimate a page count from a character count: `max(1, chars/2000)` (§4.3).
pub fn estimated_pages(chars: usize) -> usize {
    (chars / 2000).max(1)
}

/// Choose a model tier by document size (§4.3 meeting/item size rule).
pub fn choose_model_tier(chars: usize, pages: usize) -> ModelTier {
    if chars < MODEL_SIZE_CHAR_CAP && pages <= MODEL_SIZE_PAGE_CAP {
        ModelTier::Lite
    } else {
        ModelTier::Flagship
    }
}

/// Choose the meeting-level prompt variant: `"short_agenda"` (≤30 pages) or
/// `"comprehensive"` (otherwise).
pub fn choose_meeting_prompt_variant(pages: usize) -> &'static str {
    if pages <= MEETING_SHORT_PAGE_CAP {
        "short_agenda"
    } else {
        "comprehensive"
    }
}

/// Choose the item-level prompt variant and tier. Documents at or beyond
/// [`ITEM_LARGE_PAGE_THRESHOLD`] always use `"large"` and the flagship model;
/// otherwise `"standard"` with size-based tier selection.
pub fn choose_item_prompt_variant(chars: usize, pages: usize) -> (&'static str, ModelTier) {
    if pages >= ITEM_LARGE_PAGE_THRESHOLD {
        ("large", ModelTier::Flagship)
    } else {
        ("standard", choose_model_tier(chars, pages))
    }
}

/// Choose a thinking-budget value for a request, or `None` to omit the
/// parameter and let the provider apply its own default (§4.3 tier 2,
/// flagship branch).
pub fn choose_thinking_budget(chars: usize, pages: usize, tier: ModelTier) -> Option<i64> {
    if pages <= THINKING_DISABLED_PAGE_CAP && chars <= THINKING_DISABLED_CHAR_CAP {
        Some(0)
    } else if pages <= THINKING_MODERATE_PAGE_CAP && chars <= THINKING_MODERATE_CHAR_CAP {
        match tier {
            ModelTier::Lite => Some(THINKING_MODERATE_BUDGET),
            ModelTier::Flagship => None,
        }
    } else {
        Some(THINKING_DYNAMIC_BUDGET)
    }
}

// ---------------------------------------------------------------------------
// Prompt library (§6 "Prompt JSON file")
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PromptFile {
    meeting: MeetingPrompts,
    item: ItemPrompts,
}

#[derive(Debug, Deserialize)]
struct MeetingPrompts {
    short_agenda: MeetingTemplate,
    comprehensive: MeetingTemplate,
}

#[derive(Debug, Deserialize)]
struct MeetingTemplate {
    template: String,
}

#[derive(Debug, Deserialize)]
struct ItemPrompts {
    standard: PromptTemplate,
    large: PromptTemplate,
}

/// One item-level prompt variant: its template plus the JSON schema the
/// model's response must satisfy.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    /// Template string with `{title}`/`{text}` placeholders.
    pub template: String,
    /// JSON schema the model is constrained to respond with, if the
    /// provider supports structured output.
    #[serde(default)]
    pub response_schema: Option<serde_json::Value>,
}

/// Loaded prompt templates for meeting- and item-level summarization.
pub struct PromptLibrary {
    file: PromptFile,
}

impl PromptLibrary {
    /// Load a prompt library from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, EngagicError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngagicError::new(ErrorCode::ConfigInvalid, format!("failed to read prompts file: {}", path.display()))
                .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parse a prompt library from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, EngagicError> {
        let file: PromptFile = serde_json::from_str(json)
            .map_err(|e| EngagicError::new(ErrorCode::ConfigInvalid, "invalid prompts JSON").with_source(e))?;
        Ok(Self { file })
    }

    /// The meeting-level template for `variant` (`"short_agenda"` or
    /// `"comprehensive"`; anything else falls back to `"short_agenda"`).
    pub fn meeting_template(&self, variant: &str) -> &str {
        match variant {
            "comprehensive" => &self.file.meeting.comprehensive.template,
            _ => &self.file.meeting.short_agenda.template,
        }
    }

    /// The item-level template for `variant` (`"standard"` or `"large"`;
    /// anything else falls back to `"standard"`).
    pub fn item_template(&self, variant: &str) -> &PromptTemplate {
        match variant {
            "large" => &self.file.item.large,
            _ => &self.file.item.standard,
        }
    }
}

// ---------------------------------------------------------------------------
// Client abstraction
// ---------------------------------------------------------------------------

/// A single-call completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Provider model identifier.
    pub model: String,
    /// Fully-rendered prompt text.
    pub prompt: String,
    /// JSON response schema, for providers that support structured output.
    pub response_schema: Option<serde_json::Value>,
    /// Thinking-budget parameter, or `None` to omit it (§4.3).
    pub thinking_budget: Option<i64>,
}

/// One request's outcome inside a terminal batch job.
#[derive(Debug, Clone)]
pub struct RawBatchItem {
    /// Raw response text, if the request itself succeeded.
    pub content: Option<String>,
    /// `true` if the provider reported a `MAX_TOKENS` finish reason — the
    /// response is truncated JSON and unrecoverable (§4.3).
    pub truncated: bool,
    /// Provider-reported error, if `content` is absent.
    pub error: Option<String>,
}

/// A batch job's terminal disposition.
#[derive(Debug, Clone)]
pub enum BatchTerminalState {
    /// The job completed; each request's outcome is reported individually.
    Succeeded(Vec<RawBatchItem>),
    /// The job as a whole failed.
    Failed,
    /// The job was cancelled.
    Cancelled,
    /// The job expired before reaching a terminal state.
    Expired,
}

/// Current status of a submitted batch job.
#[derive(Debug, Clone)]
pub enum BatchJobStatus {
    /// Still in progress.
    Running,
    /// Reached one of the terminal states (§4.3: SUCCEEDED, FAILED,
    /// CANCELLED, EXPIRED).
    Terminal(BatchTerminalState),
}

/// The external summarization backend. No implementation ships in this
/// crate; callers wire one in against their provider of choice.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a single completion request and return the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, EngagicError>;

    /// Submit a batch of requests as one job, returning a job id to poll.
    async fn submit_batch(&self, model: &str, requests: &[CompletionRequest]) -> Result<String, EngagicError>;

    /// Poll a batch job's current status.
    async fn poll_batch(&self, job_id: &str) -> Result<BatchJobStatus, EngagicError>;
}

/// Default backend for deployments with no LLM key configured: every call
/// is reported, not silently skipped (§7, §4.8 graceful degradation).
pub struct UnavailableLlm;

#[async_trait::async_trait]
impl LlmClient for UnavailableLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, EngagicError> {
        Err(EngagicError::new(ErrorCode::LlmRequestFailed, "no LLM client configured"))
    }

    async fn submit_batch(&self, _model: &str, _requests: &[CompletionRequest]) -> Result<String, EngagicError> {
        Err(EngagicError::new(ErrorCode::LlmRequestFailed, "no LLM client configured"))
    }

    async fn poll_batch(&self, _job_id: &str) -> Result<BatchJobStatus, EngagicError> {
        Err(EngagicError::new(ErrorCode::LlmRequestFailed, "no LLM client configured"))
    }
}

// ---------------------------------------------------------------------------
// Item-level response shape
// ---------------------------------------------------------------------------

/// A parsed, taxonomy-validated item summary (§4.3 response parsing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    /// The model's reasoning trace, as returned.
    pub thinking: String,
    /// Markdown summary body.
    pub summary_markdown: String,
    /// Markdown citizen-impact section.
    pub citizen_impact_markdown: String,
    /// Canonical topics assigned (never empty — see [`parse_item_response`]).
    pub topics: Vec<String>,
    /// Model-reported confidence, as returned.
    pub confidence: f64,
}

impl ItemSummary {
    /// Assemble the four-section markdown document (§4.3).
    pub fn to_markdown(&self) -> String {
        format!(
            "## Thinking\n{}\n\n## Summary\n{}\n\n## Citizen Impact\n{}\n\n## Confidence\n{}\n",
            self.thinking, self.summary_markdown, self.citizen_impact_markdown, self.confidence
        )
    }
}

/// Parse and validate a raw item-response JSON string (§4.3).
///
/// Missing required keys reject the response outright. `topics` entries not
/// in the canonical taxonomy are dropped and logged to `unknown_log`; if
/// every topic is invalid (or none were given), the result substitutes
/// `["other"]`.
pub fn parse_item_response(
    raw: &str,
    taxonomy: &Taxonomy,
    unknown_log: Option<&UnknownTopicsLog>,
) -> Result<ItemSummary, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value.as_object().ok_or("response is not a JSON object")?;

    let thinking = obj
        .get("thinking")
        .and_then(|v| v.as_str())
        .ok_or("missing required key: thinking")?
        .to_string();
    let summary_markdown = obj
        .get("summary_markdown")
        .and_then(|v| v.as_str())
        .ok_or("missing required key: summary_markdown")?
        .to_string();
    let citizen_impact_markdown = obj
        .get("citizen_impact_markdown")
        .and_then(|v| v.as_str())
        .ok_or("missing required key: citizen_impact_markdown")?
        .to_string();
    let confidence = obj
        .get("confidence")
        .and_then(|v| v.as_f64())
        .ok_or("missing required key: confidence")?;
    let raw_topics = obj.get("topics").and_then(|v| v.as_array()).ok_or("missing required key: topics")?;

    let mut topics = Vec::new();
    let mut invalid = Vec::new();
    for t in raw_topics {
        if let Some(s) = t.as_str() {
            if taxonomy.is_canonical(s) {
                topics.push(s.to_string());
            } else {
                invalid.push(s.to_string());
            }
        }
    }
    if !invalid.is_empty() {
        if let Some(log) = unknown_log {
            let _ = log.append(&invalid);
        }
    }
    if topics.is_empty() {
        topics.push("other".to_string());
    }

    Ok(ItemSummary {
        thinking,
        summary_markdown,
        citizen_impact_markdown,
        topics,
        confidence,
    })
}

// ---------------------------------------------------------------------------
// Meeting-level cleanup (§4.3a)
// ---------------------------------------------------------------------------

static DOCUMENT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^=== DOCUMENT \d+ ===[ \t]*\n?").unwrap());
static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^--- SECTION \d+ SUMMARY ---[ \t]*\n?").unwrap());
static PREAMBLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*here's a (concise )?summary of the[^:\n]*:\s*").unwrap());

/// Strip the original's `_clean_summary` artifacts from a meeting-level
/// summary: document/section markers, a chatty preamble, and excess blank
/// lines (§4.3a). Item-level output is already structured JSON and does not
/// go through this pass.
pub fn clean_meeting_summary(raw: &str) -> String {
    let text = DOCUMENT_MARKER.replace_all(raw, "");
    let text = SECTION_MARKER.replace_all(&text, "");
    let text = PREAMBLE.replace(&text, "");
    collapse_blank_lines(text.trim())
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(c);
            }
        } else {
            newline_run = 0;
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

const BATCH_CHUNK_SIZE: usize = 15;
const INTER_CHUNK_SLEEP: Duration = Duration::from_secs(90);
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const POLL_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

/// One agenda item queued for summarization.
#[derive(Debug, Clone)]
pub struct ItemRequest {
    /// Stable item id, carried through so results can be matched back up.
    pub id: String,
    /// Item title, substituted into the `{title}` placeholder.
    pub title: String,
    /// Combined attachment text, substituted into the `{text}` placeholder.
    pub text: String,
}

/// Orchestrates meeting- and item-level summarization against an
/// [`LlmClient`], applying the routing rules and response validation above.
pub struct Summarizer<'a> {
    client: &'a dyn LlmClient,
    prompts: &'a PromptLibrary,
    taxonomy: &'a Taxonomy,
    unknown_log: Option<&'a UnknownTopicsLog>,
    retry_config: engagic_retry::RetryConfig,
}

impl<'a> Summarizer<'a> {
    /// Build a summarizer over the given backend, prompt library, and
    /// taxonomy. `unknown_log` is optional; pass `None` to skip logging
    /// invalid topics encountered during response validation. Batch chunks
    /// retry quota errors per [`engagic_retry::RetryConfig::llm_quota_backoff`].
    pub fn new(
        client: &'a dyn LlmClient,
        prompts: &'a PromptLibrary,
        taxonomy: &'a Taxonomy,
        unknown_log: Option<&'a UnknownTopicsLog>,
    ) -> Self {
        Self {
            client,
            prompts,
            taxonomy,
            unknown_log,
            retry_config: engagic_retry::RetryConfig::llm_quota_backoff(),
        }
    }

    /// Summarize a whole agenda's text as a single completion call (§4.3,
    /// §4.3a).
    pub async fn summarize_meeting(&self, text: &str) -> Result<String, EngagicError> {
        let chars = text.chars().count();
        let pages = estimated_pages(chars);
        let tier = choose_model_tier(chars, pages);
        let variant = choose_meeting_prompt_variant(pages);
        let prompt = self.prompts.meeting_template(variant).replace("{text}", text);
        let request = CompletionRequest {
            model: tier.model_name().to_string(),
            prompt,
            response_schema: None,
            thinking_budget: choose_thinking_budget(chars, pages, tier),
        };
        let raw = self.client.complete(&request).await?;
        Ok(clean_meeting_summary(&raw))
    }

    fn build_item_request(&self, item: &ItemRequest) -> CompletionRequest {
        let chars = item.text.chars().count();
        let pages = estimated_pages(chars);
        let (variant, tier) = choose_item_prompt_variant(chars, pages);
        let template = self.prompts.item_template(variant);
        let prompt = template.template.replace("{title}", &item.title).replace("{text}", &item.text);
        CompletionRequest {
            model: tier.model_name().to_string(),
            prompt,
            response_schema: template.response_schema.clone(),
            thinking_budget: choose_thinking_budget(chars, pages, tier),
        }
    }

    /// Summarize a set of agenda items in batch (§4.3), chunking into groups
    /// of [`BATCH_CHUNK_SIZE`], sleeping [`INTER_CHUNK_SLEEP`] between
    /// chunks, and backing off per [`engagic_retry::RetryConfig::llm_quota_backoff`]
    /// when a chunk hits a quota error.
    ///
    /// `on_chunk` is invoked with each chunk's results as soon as that chunk
    /// finishes, before the next chunk is submitted, so the caller can
    /// persist incrementally (§4.3, §4.9, §9) — a chunk can take up to
    /// [`POLL_MAX_WAIT`] of polling plus [`INTER_CHUNK_SLEEP`], and a crash
    /// mid-sweep should not lose already-completed chunks. The full result
    /// set is also returned, in the same order as `items`, paired with each
    /// item's id, for callers that only need the aggregate.
    pub async fn summarize_items<F>(&self, items: &[ItemRequest], mut on_chunk: F) -> Vec<(String, BatchResult<ItemSummary>)>
    where
        F: FnMut(&[(String, BatchResult<ItemSummary>)]),
    {
        let mut results = Vec::with_capacity(items.len());
        let chunks: Vec<&[ItemRequest]> = items.chunks(BATCH_CHUNK_SIZE).collect();
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let chunk_results = self.run_chunk(chunk).await;
            on_chunk(&chunk_results);
            results.extend(chunk_results);
            if index + 1 < total {
                tokio::time::sleep(INTER_CHUNK_SLEEP).await;
            }
        }
        results
    }

    async fn run_chunk(&self, chunk: &[ItemRequest]) -> Vec<(String, BatchResult<ItemSummary>)> {
        let requests: Vec<CompletionRequest> = chunk.iter().map(|item| self.build_item_request(item)).collect();

        let outcome = engagic_retry::retry_async(
            &self.retry_config,
            || self.submit_and_poll(&requests),
            |e: &EngagicError| e.code == ErrorCode::LlmQuotaExceeded,
        )
        .await;

        match outcome {
            Ok(result) => {
                debug!(chunk_size = chunk.len(), attempts = result.metadata.total_attempts, "batch chunk succeeded");
                chunk
                    .iter()
                    .zip(result.value)
                    .map(|(item, raw)| (item.id.clone(), self.parse_raw(raw)))
                    .collect()
            }
            Err(error) => {
                warn!(chunk_size = chunk.len(), %error, "batch chunk failed after retries exhausted");
                chunk
                    .iter()
                    .map(|item| {
                        (
                            item.id.clone(),
                            BatchResult::Failed {
                                error: "batch chunk failed after retries exhausted".to_string(),
                            },
                        )
                    })
                    .collect()
            }
        }
    }

    async fn submit_and_poll(&self, requests: &[CompletionRequest]) -> Result<Vec<RawBatchItem>, EngagicError> {
        let model = requests.first().map(|r| r.model.as_str()).unwrap_or(LITE_MODEL);
        let job_id = self.client.submit_batch(model, requests).await?;
        let start = Instant::now();

        loop {
            match self.client.poll_batch(&job_id).await? {
                BatchJobStatus::Running => {
                    if start.elapsed() >= POLL_MAX_WAIT {
                        return Err(EngagicError::new(ErrorCode::LlmBatchTimeout, "batch job did not reach a terminal state")
                            .with_context("job_id", job_id.clone()));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                BatchJobStatus::Terminal(BatchTerminalState::Succeeded(items)) => return Ok(items),
                BatchJobStatus::Terminal(BatchTerminalState::Failed) => {
                    return Err(EngagicError::new(ErrorCode::LlmRequestFailed, "batch job reported FAILED")
                        .with_context("job_id", job_id));
                }
                BatchJobStatus::Terminal(BatchTerminalState::Cancelled) => {
                    return Err(EngagicError::new(ErrorCode::LlmRequestFailed, "batch job was cancelled")
                        .with_context("job_id", job_id));
                }
                BatchJobStatus::Terminal(BatchTerminalState::Expired) => {
                    return Err(EngagicError::new(ErrorCode::LlmBatchTimeout, "batch job expired").with_context("job_id", job_id));
                }
            }
        }
    }

    fn parse_raw(&self, raw: RawBatchItem) -> BatchResult<ItemSummary> {
        if raw.truncated {
            return BatchResult::Failed {
                error: "truncated response (MAX_TOKENS)".to_string(),
            };
        }
        let Some(content) = raw.content else {
            return BatchResult::Failed {
                error: raw.error.unwrap_or_else(|| "empty response".to_string()),
            };
        };
        match parse_item_response(&content, self.taxonomy, self.unknown_log) {
            Ok(summary) => BatchResult::Succeeded { content: summary },
            Err(error) => BatchResult::Failed { error },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_prompts_json() -> &'static str {
        r#"{
            "meeting": {
                "short_agenda": {"template": "Summarize: {text}"},
                "comprehensive": {"template": "Thoroughly summarize: {text}"}
            },
            "item": {
                "standard": {"template": "Item {title}: {text}", "response_schema": {"type": "object"}},
                "large": {"template": "Large item {title}: {text}"}
            }
        }"#
    }

    fn sample_taxonomy_json() -> &'static str {
        r#"{
            "taxonomy": {
                "housing": {"canonical": "housing", "display_name": "Housing", "synonyms": ["affordable housing"]}
            },
            "prompt_examples": ["housing"]
        }"#
    }

    #[test]
    fn estimated_pages_floors_at_one() {
        assert_eq!(estimated_pages(0), 1);
        assert_eq!(estimated_pages(500), 1);
        assert_eq!(estimated_pages(4000), 2);
    }

    #[test]
    fn small_document_routes_to_lite_model() {
        let tier = choose_model_tier(1000, 1);
        assert_eq!(tier, ModelTier::Lite);
    }

    #[test]
    fn huge_document_routes_to_flagship_model() {
        let tier = choose_model_tier(500_000, 250);
        assert_eq!(tier, ModelTier::Flagship);
    }

    #[test]
    fn meeting_prompt_variant_boundary() {
        assert_eq!(choose_meeting_prompt_variant(30), "short_agenda");
        assert_eq!(choose_meeting_prompt_variant(31), "comprehensive");
    }

    #[test]
    fn item_prompt_forces_large_and_flagship_past_threshold() {
        let (variant, tier) = choose_item_prompt_variant(10_000, 100);
        assert_eq!(variant, "large");
        assert_eq!(tier, ModelTier::Flagship);
    }

    #[test]
    fn item_prompt_standard_below_threshold() {
        let (variant, _) = choose_item_prompt_variant(1_000, 5);
        assert_eq!(variant, "standard");
    }

    #[test]
    fn thinking_budget_disabled_for_small_docs() {
        assert_eq!(choose_thinking_budget(1_000, 1, ModelTier::Lite), Some(0));
    }

    #[test]
    fn thinking_budget_moderate_for_lite_midsize_docs() {
        assert_eq!(choose_thinking_budget(100_000, 40, ModelTier::Lite), Some(2048));
    }

    #[test]
    fn thinking_budget_omitted_for_flagship_midsize_docs() {
        assert_eq!(choose_thinking_budget(100_000, 40, ModelTier::Flagship), None);
    }

    #[test]
    fn thinking_budget_dynamic_for_huge_docs() {
        assert_eq!(choose_thinking_budget(1_000_000, 500, ModelTier::Flagship), Some(-1));
    }

    #[test]
    fn prompt_library_loads_and_selects_variants() {
        let lib = PromptLibrary::from_json(sample_prompts_json()).unwrap();
        assert_eq!(lib.meeting_template("short_agenda"), "Summarize: {text}");
        assert_eq!(lib.meeting_template("comprehensive"), "Thoroughly summarize: {text}");
        assert_eq!(lib.meeting_template("unknown"), "Summarize: {text}");
        assert_eq!(lib.item_template("large").template, "Large item {title}: {text}");
        assert!(lib.item_template("standard").response_schema.is_some());
    }

    #[test]
    fn clean_meeting_summary_strips_markers_and_preamble() {
        let raw = "Here's a concise summary of the agenda:\n=== DOCUMENT 1 ===\n--- SECTION 2 SUMMARY ---\nActual content here.\n\n\n\nMore content.";
        let cleaned = clean_meeting_summary(raw);
        assert!(!cleaned.contains("DOCUMENT"));
        assert!(!cleaned.contains("SECTION"));
        assert!(!cleaned.to_lowercase().contains("here's a"));
        assert!(cleaned.contains("Actual content here."));
        assert!(!cleaned.contains("\n\n\n"));
    }

    #[test]
    fn parse_item_response_accepts_well_formed_json() {
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let raw = r#"{"thinking":"t","summary_markdown":"s","citizen_impact_markdown":"c","topics":["housing"],"confidence":0.9}"#;
        let parsed = parse_item_response(raw, &taxonomy, None).unwrap();
        assert_eq!(parsed.topics, vec!["housing"]);
        assert_eq!(parsed.confidence, 0.9);
    }

    #[test]
    fn parse_item_response_rejects_missing_key() {
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let raw = r#"{"thinking":"t","summary_markdown":"s","topics":["housing"],"confidence":0.9}"#;
        let err = parse_item_response(raw, &taxonomy, None).unwrap_err();
        assert!(err.contains("citizen_impact_markdown"));
    }

    #[test]
    fn parse_item_response_substitutes_other_when_all_topics_invalid() {
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let raw = r#"{"thinking":"t","summary_markdown":"s","citizen_impact_markdown":"c","topics":["quantum cryptography"],"confidence":0.5}"#;
        let parsed = parse_item_response(raw, &taxonomy, None).unwrap();
        assert_eq!(parsed.topics, vec!["other"]);
    }

    #[test]
    fn parse_item_response_drops_invalid_topics_but_keeps_valid_ones() {
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let raw = r#"{"thinking":"t","summary_markdown":"s","citizen_impact_markdown":"c","topics":["housing","nonsense"],"confidence":0.5}"#;
        let parsed = parse_item_response(raw, &taxonomy, None).unwrap();
        assert_eq!(parsed.topics, vec!["housing"]);
    }

    #[test]
    fn item_summary_assembles_four_sections_in_order() {
        let summary = ItemSummary {
            thinking: "T".to_string(),
            summary_markdown: "S".to_string(),
            citizen_impact_markdown: "C".to_string(),
            topics: vec!["housing".to_string()],
            confidence: 0.8,
        };
        let md = summary.to_markdown();
        let thinking_pos = md.find("## Thinking").unwrap();
        let summary_pos = md.find("## Summary").unwrap();
        let impact_pos = md.find("## Citizen Impact").unwrap();
        let confidence_pos = md.find("## Confidence").unwrap();
        assert!(thinking_pos < summary_pos && summary_pos < impact_pos && impact_pos < confidence_pos);
    }

    #[tokio::test]
    async fn unavailable_llm_reports_error() {
        let client = UnavailableLlm;
        let request = CompletionRequest {
            model: LITE_MODEL.to_string(),
            prompt: "x".to_string(),
            response_schema: None,
            thinking_budget: None,
        };
        let err = client.complete(&request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmRequestFailed);
    }

    struct StubClient {
        response: String,
    }

    #[async_trait::async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, EngagicError> {
            Ok(self.response.clone())
        }
        async fn submit_batch(&self, _model: &str, _requests: &[CompletionRequest]) -> Result<String, EngagicError> {
            Ok("job-1".to_string())
        }
        async fn poll_batch(&self, _job_id: &str) -> Result<BatchJobStatus, EngagicError> {
            Ok(BatchJobStatus::Terminal(BatchTerminalState::Succeeded(vec![RawBatchItem {
                content: Some(self.response.clone()),
                truncated: false,
                error: None,
            }])))
        }
    }

    #[tokio::test]
    async fn summarize_meeting_cleans_output() {
        let prompts = PromptLibrary::from_json(sample_prompts_json()).unwrap();
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let client = StubClient {
            response: "=== DOCUMENT 1 ===\nHere's a summary of the meeting: council met.".to_string(),
        };
        let summarizer = Summarizer::new(&client, &prompts, &taxonomy, None);
        let result = summarizer.summarize_meeting("agenda text").await.unwrap();
        assert!(!result.contains("DOCUMENT"));
        assert!(result.contains("council met."));
    }

    #[tokio::test]
    async fn summarize_items_single_chunk_succeeds() {
        let prompts = PromptLibrary::from_json(sample_prompts_json()).unwrap();
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let client = StubClient {
            response: r#"{"thinking":"t","summary_markdown":"s","citizen_impact_markdown":"c","topics":["housing"],"confidence":0.7}"#
                .to_string(),
        };
        let summarizer = Summarizer::new(&client, &prompts, &taxonomy, None);
        let items = vec![ItemRequest {
            id: "item-1".to_string(),
            title: "Zoning change".to_string(),
            text: "discussion of zoning".to_string(),
        }];
        let mut chunk_calls = 0;
        let results = summarizer
            .summarize_items(&items, |chunk| {
                chunk_calls += 1;
                assert_eq!(chunk.len(), 1);
            })
            .await;
        assert_eq!(chunk_calls, 1, "on_chunk must fire once per completed chunk, not only at the end");
        assert_eq!(results.len(), 1);
        let (id, result) = &results[0];
        assert_eq!(id, "item-1");
        assert!(result.is_success());
        if let BatchResult::Succeeded { content } = result {
            assert_eq!(content.topics, vec!["housing"]);
        }
    }

    struct FailingClient {
        submit_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, EngagicError> {
            unreachable!("not exercised by batch tests")
        }
        async fn submit_batch(&self, _model: &str, _requests: &[CompletionRequest]) -> Result<String, EngagicError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Err(EngagicError::new(ErrorCode::LlmQuotaExceeded, "RESOURCE_EXHAUSTED"))
        }
        async fn poll_batch(&self, _job_id: &str) -> Result<BatchJobStatus, EngagicError> {
            unreachable!("submit never succeeds in this test")
        }
    }

    #[tokio::test]
    async fn summarize_items_marks_chunk_failed_after_quota_retries_exhausted() {
        let prompts = PromptLibrary::from_json(sample_prompts_json()).unwrap();
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let client = FailingClient {
            submit_calls: AtomicUsize::new(0),
        };
        // Same shape as `RetryConfig::llm_quota_backoff` (3 retries) but with
        // millisecond delays so the test doesn't spend minutes sleeping.
        let fast_retry = engagic_retry::RetryConfig {
            max_retries: 3,
            schedule: vec![Duration::from_millis(1), Duration::from_millis(1), Duration::from_millis(1)],
            overall_timeout: Duration::from_secs(5),
            jitter_abs: None,
        };
        let summarizer = Summarizer {
            client: &client,
            prompts: &prompts,
            taxonomy: &taxonomy,
            unknown_log: None,
            retry_config: fast_retry,
        };
        let items = vec![ItemRequest {
            id: "item-1".to_string(),
            title: "Title".to_string(),
            text: "text".to_string(),
        }];
        let results = summarizer.summarize_items(&items, |_chunk| {}).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].1.is_success());
        assert_eq!(client.submit_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn parse_item_response_logs_invalid_topics() {
        let taxonomy = Taxonomy::from_json(sample_taxonomy_json()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("unknown_topics.log");
        let log = UnknownTopicsLog::new(&log_path);
        let raw = r#"{"thinking":"t","summary_markdown":"s","citizen_impact_markdown":"c","topics":["housing","mystery_topic"],"confidence":0.5}"#;
        let parsed = parse_item_response(raw, &taxonomy, Some(&log)).unwrap();
        assert_eq!(parsed.topics, vec!["housing"]);
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("mystery_topic"));
    }
}
