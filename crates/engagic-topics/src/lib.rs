// SPDX-License-Identifier: MIT OR Apache-2.0
//! Topic taxonomy loading and deterministic normalization (§4.4).
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Raw topic strings produced by vendors or an LLM response get mapped onto
//! a fixed canonical taxonomy. Direct (exact) matches are O(1); everything
//! else falls through to word-boundary substring matching in the taxonomy's
//! declared order, so results stay deterministic across runs even though
//! the underlying map has no natural ordering of its own.

use chrono::Utc;
use engagic_error::{EngagicError, ErrorCode};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Taxonomy file schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    taxonomy: IndexMap<String, TopicEntryRaw>,
    #[serde(default)]
    #[allow(dead_code)]
    prompt_examples: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TopicEntryRaw {
    canonical: String,
    display_name: String,
    #[serde(default)]
    synonyms: Vec<String>,
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// A loaded, ready-to-query topic taxonomy.
pub struct Taxonomy {
    /// Exact lowercase-trimmed match → canonical. Includes each canonical
    /// mapped to itself.
    direct: IndexMap<String, String>,
    /// Word-boundary substring patterns in declared order, first match wins.
    patterns: Vec<(Regex, String)>,
    /// Canonical name → display name.
    display_names: IndexMap<String, String>,
}

impl Taxonomy {
    /// Load a taxonomy from a JSON file at `path` (§6 "Topic taxonomy JSON").
    pub fn load(path: &Path) -> Result<Self, EngagicError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngagicError::new(ErrorCode::ConfigInvalid, format!("failed to read taxonomy file: {}", path.display()))
                .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parse a taxonomy from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, EngagicError> {
        let file: TaxonomyFile = serde_json::from_str(json)
            .map_err(|e| EngagicError::new(ErrorCode::ConfigInvalid, "invalid taxonomy JSON").with_source(e))?;

        let mut direct = IndexMap::new();
        let mut patterns = Vec::new();
        let mut display_names = IndexMap::new();

        for entry in file.taxonomy.into_values() {
            let canonical = entry.canonical;
            display_names.insert(canonical.clone(), entry.display_name);
            direct.insert(canonical.to_lowercase(), canonical.clone());

            for synonym in entry.synonyms {
                let syn_lc = synonym.to_lowercase();
                direct.entry(syn_lc.clone()).or_insert_with(|| canonical.clone());
                let pattern = format!(r"\b{}\b", regex::escape(syn_lc.trim()));
                let regex = Regex::new(&pattern).map_err(|e| {
                    EngagicError::new(ErrorCode::ConfigInvalid, format!("invalid synonym pattern: {synonym}"))
                        .with_source(e)
                })?;
                patterns.push((regex, canonical.clone()));
            }
        }

        Ok(Self {
            direct,
            patterns,
            display_names,
        })
    }

    /// `true` if `candidate` is a member of the canonical taxonomy.
    pub fn is_canonical(&self, candidate: &str) -> bool {
        self.display_names.contains_key(candidate)
    }

    /// Display name for a canonical topic, if known.
    pub fn display_name(&self, canonical: &str) -> Option<&str> {
        self.display_names.get(canonical).map(String::as_str)
    }

    /// Normalize a list of raw topic strings (§4.4).
    ///
    /// Returns the sorted, deduplicated list of canonical topics matched,
    /// plus the raw inputs that matched nothing (for the caller to log via
    /// [`UnknownTopicsLog`]). Unlike the LLM response-validation layer
    /// (§4.3), unmatched inputs are *not* bucketed to `"other"` here.
    pub fn normalize(&self, inputs: &[String]) -> NormalizeResult {
        let mut matched: BTreeSet<String> = BTreeSet::new();
        let mut unknown: Vec<String> = Vec::new();

        for raw in inputs {
            let lowered = raw.trim().to_lowercase();
            if lowered.is_empty() {
                continue;
            }

            if let Some(canonical) = self.direct.get(&lowered) {
                matched.insert(canonical.clone());
                continue;
            }

            let mut found = false;
            for (pattern, canonical) in &self.patterns {
                if pattern.is_match(&lowered) {
                    matched.insert(canonical.clone());
                    found = true;
                    break;
                }
            }

            if !found {
                unknown.push(raw.clone());
            }
        }

        NormalizeResult {
            topics: matched.into_iter().collect(),
            unknown,
        }
    }
}

/// Result of a [`Taxonomy::normalize`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeResult {
    /// Sorted, deduplicated canonical topics.
    pub topics: Vec<String>,
    /// Raw inputs that matched nothing in the taxonomy.
    pub unknown: Vec<String>,
}

// ---------------------------------------------------------------------------
// Unknown-topics log
// ---------------------------------------------------------------------------

/// Append-only sink for topics the taxonomy could not map (§6).
pub struct UnknownTopicsLog {
    path: PathBuf,
}

impl UnknownTopicsLog {
    /// Point the log at `path`; the file is created on first [`append`](Self::append).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append each unknown topic as a `timestamp \t topic` line.
    pub fn append(&self, topics: &[String]) -> Result<(), EngagicError> {
        if topics.is_empty() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                EngagicError::new(ErrorCode::Internal, format!("failed to open unknown-topics log: {}", self.path.display()))
                    .with_source(e)
            })?;
        for topic in topics {
            writeln!(file, "{}\t{}", Utc::now().to_rfc3339(), topic).map_err(|e| {
                EngagicError::new(ErrorCode::Internal, "failed to write unknown-topics log entry").with_source(e)
            })?;
        }
        Ok(())
    }
}
