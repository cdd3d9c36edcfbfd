// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared domain types for the civic-agenda ingestion pipeline.
//!
//! This crate holds the tagged types that cross component boundaries —
//! [`City`], [`Meeting`], [`AgendaItem`], [`QueueEntry`], [`CacheEntry`] — and
//! a handful of pure domain functions (`generate_banana`, packet-URL cache
//! keying) that every other crate in the workspace builds on. Nothing here
//! performs I/O; persistence lives in `engagic-db`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// banana
// ---------------------------------------------------------------------------

/// Derives the canonical city identifier ("banana") from a name and state.
///
/// `banana = lowercase(alphanumeric(name)) + UPPER(state)`. Deterministic and
/// a pure function of the normalized inputs, so it is safe to recompute
/// anywhere rather than only trusting a stored value.
///
/// ```
/// use engagic_core::generate_banana;
/// assert_eq!(generate_banana("Palo Alto", "ca"), "paloaltoCA");
/// assert_eq!(generate_banana("St. Louis", "MO"), "stlouisMO");
/// ```
pub fn generate_banana(name: &str, state: &str) -> String {
    let alnum: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{alnum}{}", state.to_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Vendor
// ---------------------------------------------------------------------------

/// A supported civic-tech meeting-management platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    /// PrimeGov (JSON/OData API).
    PrimeGov,
    /// Granicus (HTML scrape, stable numeric view id).
    Granicus,
    /// Legistar (JSON/OData API).
    Legistar,
    /// CivicClerk (JSON/OData API).
    CivicClerk,
    /// NovusAgenda (HTML scrape, no view id).
    NovusAgenda,
    /// CivicPlus (homepage scrape with vendor delegation).
    CivicPlus,
    /// CivicWeb.
    CivicWeb,
    /// IQM2.
    Iqm2,
    /// Municode Meetings.
    Municode,
    /// eScribe.
    EScribe,
}

impl Vendor {
    /// All vendors currently supported by this workspace's adapter registry.
    pub const ALL: &'static [Vendor] = &[
        Vendor::PrimeGov,
        Vendor::Granicus,
        Vendor::Legistar,
        Vendor::CivicClerk,
        Vendor::NovusAgenda,
        Vendor::CivicPlus,
        Vendor::CivicWeb,
        Vendor::Iqm2,
        Vendor::Municode,
        Vendor::EScribe,
    ];

    /// The slug used in `as_str`/parsing, matching config and CLI input.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimeGov => "primegov",
            Self::Granicus => "granicus",
            Self::Legistar => "legistar",
            Self::CivicClerk => "civicclerk",
            Self::NovusAgenda => "novusagenda",
            Self::CivicPlus => "civicplus",
            Self::CivicWeb => "civicweb",
            Self::Iqm2 => "iqm2",
            Self::Municode => "municode",
            Self::EScribe => "escribe",
        }
    }

    /// Parses a vendor slug (case-insensitive). Returns `None` for an
    /// unsupported vendor string rather than erroring, since callers (the
    /// scheduler) need to count-and-skip unsupported cities, not abort.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str().eq_ignore_ascii_case(s))
    }

    /// Minimum politeness interval between requests to this vendor (§4.8).
    pub fn min_sync_interval_secs(&self) -> u64 {
        match self {
            Self::PrimeGov | Self::CivicClerk | Self::Legistar => 3,
            Self::Granicus | Self::CivicPlus | Self::NovusAgenda => 4,
            Self::CivicWeb | Self::Iqm2 | Self::Municode | Self::EScribe => 5,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// City
// ---------------------------------------------------------------------------

/// Whether a city is currently eligible for background sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CityStatus {
    /// Eligible for sync.
    Active,
    /// Excluded from sync sweeps.
    Inactive,
}

impl CityStatus {
    /// Stable lowercase string form, used as the on-disk column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Parses a status string (case-insensitive). Unknown input is treated
    /// as `Inactive` rather than erroring, since a corrupt status column
    /// should exclude a city from sync rather than fail the whole scan.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("active") {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

/// A zipcode associated with a city. Exactly one per city should be marked
/// primary (the one returned by zipcode lookups when several cities share a
/// zipcode is resolved by the caller, not by this type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Zipcode {
    /// The zipcode digits.
    pub code: String,
    /// Whether this is the city's primary zipcode.
    pub is_primary: bool,
}

/// A municipal government tracked by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct City {
    /// Canonical identifier, see [`generate_banana`].
    pub banana: String,
    /// Display name, e.g. "Palo Alto".
    pub name: String,
    /// Two-letter state code.
    pub state: String,
    /// Platform this city's agendas are published through.
    pub vendor: Vendor,
    /// Vendor-specific slug (subdomain, client name, OData path segment).
    pub vendor_slug: String,
    /// County name, if known.
    pub county: Option<String>,
    /// Sync eligibility.
    pub status: CityStatus,
    /// Zipcodes covering this city.
    pub zipcodes: Vec<Zipcode>,
    /// Creation timestamp (set once).
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp (bumped on every field change).
    pub updated_at: DateTime<Utc>,
}

impl City {
    /// Normalizes a name for case/space-insensitive name+state matching:
    /// lowercase, whitespace stripped.
    pub fn normalize_name(name: &str) -> String {
        name.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(|c| c.to_lowercase())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PacketUrl
// ---------------------------------------------------------------------------

/// A meeting's packet reference: a single PDF, or a list of them.
///
/// The original system represented this as "a string or a list of strings";
/// §9 calls for a proper sum type here instead of stringly-typed duck typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PacketUrl {
    /// A single packet PDF.
    Single(String),
    /// Multiple packet PDFs (e.g. a Granicus `AgendaViewer.php` page with
    /// several embedded documents).
    Multi(Vec<String>),
}

impl PacketUrl {
    /// Deterministic cache key: for [`PacketUrl::Single`], the URL itself;
    /// for [`PacketUrl::Multi`], a JSON array serialized in insertion order
    /// (§9: "normalize the list form ... insertion order, documented").
    pub fn cache_key(&self) -> String {
        match self {
            Self::Single(u) => u.clone(),
            Self::Multi(urls) => serde_json::to_string(urls).unwrap_or_default(),
        }
    }

    /// All URLs this packet reference points to, in declared order.
    pub fn urls(&self) -> Vec<&str> {
        match self {
            Self::Single(u) => vec![u.as_str()],
            Self::Multi(urls) => urls.iter().map(String::as_str).collect(),
        }
    }

    /// `true` if this holds more than one URL.
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

// ---------------------------------------------------------------------------
// Meeting
// ---------------------------------------------------------------------------

/// A non-normal meeting disposition detected from the title (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Meeting was cancelled.
    Cancelled,
    /// Meeting was postponed.
    Postponed,
    /// Meeting agenda was revised/amended/updated after initial publication.
    Revised,
    /// Meeting was rescheduled to a new date.
    Rescheduled,
}

impl MeetingStatus {
    /// Stable lowercase string form, used as the on-disk column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Postponed => "postponed",
            Self::Revised => "revised",
            Self::Rescheduled => "rescheduled",
        }
    }

    /// Parses a status string (case-insensitive); unrecognized input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cancelled" => Some(Self::Cancelled),
            "postponed" => Some(Self::Postponed),
            "revised" => Some(Self::Revised),
            "rescheduled" => Some(Self::Rescheduled),
            _ => None,
        }
    }
}

/// Where a meeting sits in the enrichment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Not yet queued or not yet picked up.
    #[default]
    Pending,
    /// A worker currently holds this meeting's processing job.
    Processing,
    /// Summary produced successfully.
    Completed,
    /// Processing attempted and failed (may still be retried via the queue).
    Failed,
}

impl ProcessingStatus {
    /// Stable lowercase string form, used as the on-disk column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status string (case-insensitive), defaulting to `Pending`
    /// for unrecognized input.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Contact/dial-in metadata extracted from agenda text (§4.7a).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParticipationInfo {
    /// First email address found in the text.
    pub email: Option<String>,
    /// First phone number found in the text.
    pub phone: Option<String>,
    /// First Zoom or Microsoft Teams meeting URL found.
    pub zoom_url: Option<String>,
    /// A dial-in number found near a "dial-in"/"call-in"/"conference line" label.
    pub dial_in: Option<String>,
}

impl ParticipationInfo {
    /// `true` if every field is empty — used to decide whether to attach
    /// `None` instead of an empty struct (§4.7a).
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none() && self.zoom_url.is_none() && self.dial_in.is_none()
    }
}

/// One meeting on a city's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Meeting {
    /// Vendor-provided id, or a content hash when the vendor has none.
    pub id: String,
    /// Owning city.
    pub city_banana: String,
    /// Meeting title.
    pub title: String,
    /// Scheduled date/time, if parseable.
    pub date: Option<DateTime<Utc>>,
    /// Structured agenda webpage, distinct from the packet PDF.
    pub agenda_url: Option<String>,
    /// Packet PDF(s), if published.
    pub packet_url: Option<PacketUrl>,
    /// Markdown summary, once produced.
    pub summary: Option<String>,
    /// Contact/dial-in info extracted from the packet.
    pub participation: Option<ParticipationInfo>,
    /// Non-normal disposition, if the title indicated one.
    pub status: Option<MeetingStatus>,
    /// Canonical topics assigned to this meeting.
    pub topics: Vec<String>,
    /// Pipeline processing state.
    pub processing_status: ProcessingStatus,
    /// Which tier produced the current summary (e.g. `"primary"`, `"primary+ocr"`, `"cached"`).
    pub processing_method: Option<String>,
    /// Wall-clock seconds the last processing run took.
    pub processing_time: Option<f64>,
    /// Creation timestamp (set once).
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp (bumped on every upsert that changes a field).
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// `true` if this meeting has enough content to be useful to a reader
    /// (§3 invariant): a summary, a packet to eventually process, or items.
    pub fn is_useful(&self, has_items: bool) -> bool {
        self.summary.is_some() || self.packet_url.is_some() || has_items
    }
}

// ---------------------------------------------------------------------------
// AgendaItem
// ---------------------------------------------------------------------------

/// A file attached to an agenda item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Attachment {
    /// Display name of the attachment.
    pub name: String,
    /// URL to fetch it from.
    pub url: String,
    /// MIME-ish type tag (e.g. `"pdf"`).
    #[serde(rename = "type")]
    pub attachment_type: String,
}

/// One row on a meeting's agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgendaItem {
    /// Stable id: `"{meeting_id}_{vendor_item_id}"`.
    pub id: String,
    /// Owning meeting.
    pub meeting_id: String,
    /// Item title.
    pub title: String,
    /// Ordering within the agenda (ascending).
    pub sequence: i64,
    /// Attached documents.
    pub attachments: Vec<Attachment>,
    /// Markdown summary, once produced.
    pub summary: Option<String>,
    /// Canonical topics assigned to this item.
    pub topics: Vec<String>,
}

impl AgendaItem {
    /// Builds the stable item id from a meeting id and vendor item id.
    pub fn make_id(meeting_id: &str, vendor_item_id: &str) -> String {
        format!("{meeting_id}_{vendor_item_id}")
    }
}

// ---------------------------------------------------------------------------
// Raw adapter output
// ---------------------------------------------------------------------------

/// One raw item as yielded inline in a [`RawMeetingRecord`]'s `items` list
/// (§4.1 public contract), before it is persisted as an [`AgendaItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawAgendaItem {
    /// Vendor-native item identifier.
    pub item_id: String,
    /// Item title.
    pub title: String,
    /// Ordering within the agenda.
    pub sequence: i64,
    /// Attached documents.
    pub attachments: Vec<Attachment>,
}

/// A normalized meeting record as yielded by a vendor adapter's
/// `fetch_meetings` stream (§4.1 public contract). This is the tagged
/// replacement for the original's heterogeneous per-vendor dict shape (§9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawMeetingRecord {
    /// Vendor-provided meeting identifier.
    pub meeting_id: String,
    /// Meeting title, as published.
    pub title: String,
    /// Scheduled start, if the adapter could parse one.
    pub start: Option<DateTime<Utc>>,
    /// Packet PDF(s), if published.
    pub packet_url: Option<PacketUrl>,
    /// Structured agenda webpage, if distinct from the packet.
    pub agenda_url: Option<String>,
    /// Inline agenda items, when the vendor exposes them during sync
    /// (e.g. an OData API that returns items alongside the event).
    pub items: Option<Vec<RawAgendaItem>>,
    /// Non-normal disposition detected from the title.
    pub meeting_status: Option<MeetingStatus>,
    /// Free-text meeting location, if published.
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`QueueEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker and currently running.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully; may be retried.
    Failed,
    /// Retries exhausted; requires manual intervention.
    DeadLetter,
}

impl QueueStatus {
    /// Statuses from which a re-enqueue (same `source_url`) is accepted and
    /// resets the row to `pending` (§4.5 re-enqueue law).
    pub fn accepts_reenqueue(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::DeadLetter)
    }

    /// Stable lowercase string form, used as the on-disk column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Parses a status string (case-insensitive); unrecognized input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

/// A unit of deferred work: "process this packet/agenda/item-batch."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueEntry {
    /// Row id (assigned by the store).
    pub id: i64,
    /// Unique key: a packet URL, an agenda URL, or `"items://<meeting_id>"`.
    pub source_url: String,
    /// Meeting this entry processes.
    pub meeting_id: String,
    /// Owning city.
    pub city_banana: String,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// Scheduling priority; higher runs first.
    pub priority: i64,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Most recent failure message, if any.
    pub error_message: Option<String>,
    /// Opaque worker-defined metadata (e.g. partial batch stats).
    pub processing_metadata: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed this entry.
    pub started_at: Option<DateTime<Utc>>,
    /// When this entry reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Number of failed attempts after which a queue entry dead-letters.
pub const DEAD_LETTER_THRESHOLD: u32 = 3;

/// Scheduling priority for a newly-discovered meeting: upcoming meetings
/// first, floored at zero (§4.5 enqueue decision, step 5).
pub fn meeting_enqueue_priority(days_since_meeting: i64) -> i64 {
    (100 - days_since_meeting).max(0)
}

/// `items://<meeting_id>` synthetic source URL used for item-batch queue
/// entries (§4.5, §9 open question: resolved as item-batch only).
pub fn items_source_url(meeting_id: &str) -> String {
    format!("items://{meeting_id}")
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// A processed-packet cache row, keyed by [`PacketUrl::cache_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    /// Cache key (see [`PacketUrl::cache_key`]).
    pub packet_url: String,
    /// SHA-256 hex digest of the extracted text.
    pub content_hash: String,
    /// Which tier produced the summary.
    pub processing_method: String,
    /// Wall-clock seconds the original processing run took.
    pub processing_time: f64,
    /// Number of times this entry has been served from cache.
    pub cache_hit_count: u64,
    /// When this entry was first written.
    pub created_at: DateTime<Utc>,
    /// When this entry was last served.
    pub last_accessed: DateTime<Utc>,
}

/// Computes the content hash stored alongside a cache entry (§2b, §3).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// ValidationResult / BatchResult
// ---------------------------------------------------------------------------

/// Outcome of checking a candidate URL against a vendor's domain allow-list
/// (§4.6). A tagged replacement for the original's boolean-plus-log-message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ValidationResult {
    /// Host matched the vendor's allow-list (or the URL was absent/null).
    Store,
    /// Relative, malformed, or from an unknown vendor: stored but flagged.
    Warn,
    /// Host matched no allow-list entry for the configured vendor: reject.
    Reject,
}

impl ValidationResult {
    /// `true` if the candidate may be persisted (`Store` or `Warn`).
    pub fn is_storable(&self) -> bool {
        !matches!(self, Self::Reject)
    }
}

/// Outcome of one request inside an LLM batch chunk (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchResult<T> {
    /// The request succeeded and produced `content`.
    Succeeded {
        /// The parsed response payload.
        content: T,
    },
    /// The request failed; `error` is a human-readable reason.
    Failed {
        /// Failure reason.
        error: String,
    },
}

impl<T> BatchResult<T> {
    /// `true` if this result is [`BatchResult::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Sync stats
// ---------------------------------------------------------------------------

/// Why a record was skipped during `store_meeting_from_sync` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The vendor record had no usable meeting id.
    MissingId,
    /// The packet URL failed vendor-domain validation (§4.6).
    UrlValidation,
    /// The vendor record could not be parsed into a [`Meeting`].
    ShapeMismatch,
}

/// Per-call statistics returned alongside a `store_meeting_from_sync` result,
/// so the caller can count skips without the orchestrator raising (§4.5).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncStats {
    /// Number of records skipped during this call (0 or 1 for a single call;
    /// callers accumulate across a sweep).
    pub meetings_skipped: u32,
    /// Reason the record was skipped, if any.
    pub skip_reason: Option<SkipReason>,
    /// Title of the skipped record, for operator logs.
    pub skipped_title: Option<String>,
}

impl SyncStats {
    /// Builds a stats value for a single skip.
    pub fn skip(reason: SkipReason, title: impl Into<String>) -> Self {
        Self {
            meetings_skipped: 1,
            skip_reason: Some(reason),
            skipped_title: Some(title.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banana_is_deterministic_and_strips_punctuation() {
        assert_eq!(generate_banana("Palo Alto", "CA"), "paloaltoCA");
        assert_eq!(generate_banana("St. Louis", "mo"), "stlouisMO");
        assert_eq!(generate_banana("Winston-Salem", "NC"), "winstonsalemNC");
    }

    #[test]
    fn banana_is_case_insensitive_on_state() {
        assert_eq!(generate_banana("Reno", "nv"), generate_banana("Reno", "NV"));
    }

    #[test]
    fn vendor_roundtrips_through_str() {
        for v in Vendor::ALL {
            assert_eq!(Vendor::parse(v.as_str()), Some(*v));
            assert_eq!(Vendor::parse(&v.as_str().to_uppercase()), Some(*v));
        }
    }

    #[test]
    fn vendor_parse_rejects_unknown() {
        assert_eq!(Vendor::parse("not-a-vendor"), None);
    }

    #[test]
    fn packet_url_cache_key_single_is_identity() {
        let p = PacketUrl::Single("https://x.example/a.pdf".into());
        assert_eq!(p.cache_key(), "https://x.example/a.pdf");
    }

    #[test]
    fn packet_url_cache_key_multi_preserves_order() {
        let p = PacketUrl::Multi(vec!["b.pdf".into(), "a.pdf".into()]);
        assert_eq!(p.cache_key(), r#"["b.pdf","a.pdf"]"#);
    }

    #[test]
    fn queue_reenqueue_acceptance_matches_law() {
        assert!(QueueStatus::Completed.accepts_reenqueue());
        assert!(QueueStatus::Failed.accepts_reenqueue());
        assert!(QueueStatus::DeadLetter.accepts_reenqueue());
        assert!(!QueueStatus::Pending.accepts_reenqueue());
        assert!(!QueueStatus::Processing.accepts_reenqueue());
    }

    #[test]
    fn meeting_enqueue_priority_floors_at_zero() {
        assert_eq!(meeting_enqueue_priority(0), 100);
        assert_eq!(meeting_enqueue_priority(50), 50);
        assert_eq!(meeting_enqueue_priority(200), 0);
        assert_eq!(meeting_enqueue_priority(-5), 100);
    }

    #[test]
    fn content_hash_is_stable() {
        let h1 = content_hash("hello world");
        let h2 = content_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, content_hash("hello world!"));
    }

    #[test]
    fn participation_info_empty_detection() {
        assert!(ParticipationInfo::default().is_empty());
        let mut p = ParticipationInfo::default();
        p.email = Some("a@b.com".into());
        assert!(!p.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn banana_never_panics(name in ".{0,40}", state in ".{0,5}") {
            let _ = generate_banana(&name, &state);
        }
    }
}
