// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the civic-agenda pipeline.
//!
//! Every error carries an [`ErrorCode`] (a machine-readable, stable string
//! tag), a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`EngagicError::new`] to
//! construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Vendor adapter errors (transport, shape mismatch).
    Adapter,
    /// PDF download/extraction errors.
    Extraction,
    /// LLM summarizer errors (API, parsing, quota).
    Llm,
    /// Database errors (integrity, connection).
    Db,
    /// Processing queue errors.
    Queue,
    /// Rate limiter errors.
    RateLimit,
    /// Packet URL / vendor validation errors.
    Validation,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Adapter => "adapter",
            Self::Extraction => "extraction",
            Self::Llm => "llm",
            Self::Db => "db",
            Self::Queue => "queue",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Adapter --
    /// HTTP request failed after exhausting retries.
    AdapterTransportFailed,
    /// A vendor record could not be parsed into the normalized shape.
    AdapterShapeMismatch,
    /// A required view/session identifier could not be discovered.
    AdapterDiscoveryFailed,

    // -- Extraction --
    /// PDF download exceeded the size cap or timed out.
    ExtractionDownloadFailed,
    /// The PDF could not be opened or parsed.
    ExtractionParseFailed,
    /// Extracted text failed the quality validator.
    ExtractionLowQuality,

    // -- Llm --
    /// The summarizer API call failed or returned no content.
    LlmRequestFailed,
    /// The model's JSON response failed to parse or validate.
    LlmResponseInvalid,
    /// The provider reported a quota/rate-limit error.
    LlmQuotaExceeded,
    /// A batch job did not reach a terminal state before its deadline.
    LlmBatchTimeout,

    // -- Db --
    /// A foreign key or uniqueness constraint was violated.
    DbIntegrityViolation,
    /// The underlying connection failed.
    DbConnectionFailed,

    // -- Queue --
    /// An operation on a row whose state forbids it (e.g. re-enqueue a running job).
    QueueStateConflict,
    /// The entry's retries were exhausted and it moved to dead-letter.
    QueueDeadLettered,

    // -- RateLimit --
    /// The client has exceeded its request budget for the current window.
    RateLimitExceeded,

    // -- Validation --
    /// The packet URL host does not match any allow-listed domain for the vendor.
    ValidationDomainMismatch,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,
    /// A required secret (e.g. LLM API key) is missing.
    ConfigMissingSecret,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AdapterTransportFailed | Self::AdapterShapeMismatch | Self::AdapterDiscoveryFailed => {
                ErrorCategory::Adapter
            }

            Self::ExtractionDownloadFailed | Self::ExtractionParseFailed | Self::ExtractionLowQuality => {
                ErrorCategory::Extraction
            }

            Self::LlmRequestFailed
            | Self::LlmResponseInvalid
            | Self::LlmQuotaExceeded
            | Self::LlmBatchTimeout => ErrorCategory::Llm,

            Self::DbIntegrityViolation | Self::DbConnectionFailed => ErrorCategory::Db,

            Self::QueueStateConflict | Self::QueueDeadLettered => ErrorCategory::Queue,

            Self::RateLimitExceeded => ErrorCategory::RateLimit,

            Self::ValidationDomainMismatch => ErrorCategory::Validation,

            Self::ConfigInvalid | Self::ConfigMissingSecret => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"ADAPTER_TRANSPORT_FAILED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdapterTransportFailed => "ADAPTER_TRANSPORT_FAILED",
            Self::AdapterShapeMismatch => "ADAPTER_SHAPE_MISMATCH",
            Self::AdapterDiscoveryFailed => "ADAPTER_DISCOVERY_FAILED",
            Self::ExtractionDownloadFailed => "EXTRACTION_DOWNLOAD_FAILED",
            Self::ExtractionParseFailed => "EXTRACTION_PARSE_FAILED",
            Self::ExtractionLowQuality => "EXTRACTION_LOW_QUALITY",
            Self::LlmRequestFailed => "LLM_REQUEST_FAILED",
            Self::LlmResponseInvalid => "LLM_RESPONSE_INVALID",
            Self::LlmQuotaExceeded => "LLM_QUOTA_EXCEEDED",
            Self::LlmBatchTimeout => "LLM_BATCH_TIMEOUT",
            Self::DbIntegrityViolation => "DB_INTEGRITY_VIOLATION",
            Self::DbConnectionFailed => "DB_CONNECTION_FAILED",
            Self::QueueStateConflict => "QUEUE_STATE_CONFLICT",
            Self::QueueDeadLettered => "QUEUE_DEAD_LETTERED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ValidationDomainMismatch => "VALIDATION_DOMAIN_MISMATCH",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigMissingSecret => "CONFIG_MISSING_SECRET",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EngagicError
// ---------------------------------------------------------------------------

/// Unified pipeline error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use engagic_error::{EngagicError, ErrorCode};
///
/// let err = EngagicError::new(ErrorCode::LlmQuotaExceeded, "chunk 3 hit RESOURCE_EXHAUSTED")
///     .with_context("chunk", 3)
///     .with_context("attempt", 1);
/// ```
pub struct EngagicError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl EngagicError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for EngagicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EngagicError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for EngagicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for EngagicError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`EngagicError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagicErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&EngagicError> for EngagicErrorDto {
    fn from(err: &EngagicError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<EngagicErrorDto> for EngagicError {
    fn from(dto: EngagicErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::AdapterTransportFailed,
        ErrorCode::AdapterShapeMismatch,
        ErrorCode::AdapterDiscoveryFailed,
        ErrorCode::ExtractionDownloadFailed,
        ErrorCode::ExtractionParseFailed,
        ErrorCode::ExtractionLowQuality,
        ErrorCode::LlmRequestFailed,
        ErrorCode::LlmResponseInvalid,
        ErrorCode::LlmQuotaExceeded,
        ErrorCode::LlmBatchTimeout,
        ErrorCode::DbIntegrityViolation,
        ErrorCode::DbConnectionFailed,
        ErrorCode::QueueStateConflict,
        ErrorCode::QueueDeadLettered,
        ErrorCode::RateLimitExceeded,
        ErrorCode::ValidationDomainMismatch,
        ErrorCode::ConfigInvalid,
        ErrorCode::ConfigMissingSecret,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = EngagicError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = EngagicError::new(ErrorCode::AdapterTransportFailed, "timed out");
        assert_eq!(err.to_string(), "[ADAPTER_TRANSPORT_FAILED] timed out");
    }

    #[test]
    fn display_with_context() {
        let err = EngagicError::new(ErrorCode::LlmQuotaExceeded, "rate limited")
            .with_context("chunk", 3);
        let s = err.to_string();
        assert!(s.starts_with("[LLM_QUOTA_EXCEEDED] rate limited"));
        assert!(s.contains("chunk"));
        assert!(s.contains('3'));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = EngagicError::new(ErrorCode::ConfigInvalid, "bad config").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn every_code_has_a_category() {
        for code in ALL_CODES {
            let _ = code.category();
        }
    }

    #[test]
    fn code_round_trips_through_json() {
        for code in ALL_CODES {
            let s = serde_json::to_string(code).unwrap();
            let back: ErrorCode = serde_json::from_str(&s).unwrap();
            assert_eq!(*code, back);
        }
    }

    #[test]
    fn dto_round_trip_drops_source_but_keeps_message() {
        let src = io::Error::new(io::ErrorKind::Other, "socket reset");
        let err = EngagicError::new(ErrorCode::AdapterTransportFailed, "failed")
            .with_source(src)
            .with_context("vendor", "granicus");
        let dto = EngagicErrorDto::from(&err);
        assert_eq!(dto.source_message.as_deref(), Some("socket reset"));
        let restored: EngagicError = dto.into();
        assert!(restored.source.is_none());
        assert_eq!(restored.context.get("vendor").unwrap(), "granicus");
    }
}
