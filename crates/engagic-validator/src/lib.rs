// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-vendor domain allow-list validation for packet/agenda URLs (§4.6).
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The only defense against cross-vendor slug confusion and malicious hosts
//! appearing in a meeting packet: before a URL is stored, its host must
//! belong to the configured vendor's allow-list.

use engagic_core::{ValidationResult, Vendor};

/// Expected-host allow-list for a vendor, with `<slug>` substituted for the
/// city's vendor-specific identifier. Ported verbatim from the original's
/// `VENDOR_DOMAINS` table.
fn domains_for(vendor: Vendor, slug: &str) -> Vec<String> {
    match vendor {
        Vendor::PrimeGov => vec![format!("{slug}.primegov.com")],
        Vendor::Granicus => vec![
            format!("{slug}.granicus.com"),
            "s3.amazonaws.com".to_string(),
            "cloudfront.net".to_string(),
            "legistar.granicus.com".to_string(),
            "legistar1.granicus.com".to_string(),
            "legistar2.granicus.com".to_string(),
            "docs.google.com".to_string(),
        ],
        Vendor::Legistar => vec![
            "legistar.granicus.com".to_string(),
            "legistar1.granicus.com".to_string(),
            "legistar2.granicus.com".to_string(),
            "legistar3.granicus.com".to_string(),
            format!("{slug}.legistar1.com"),
            format!("{slug}.legistar.com"),
            "docs.google.com".to_string(),
        ],
        Vendor::CivicClerk => vec![format!("{slug}.api.civicclerk.com")],
        Vendor::NovusAgenda => vec![format!("{slug}.novusagenda.com")],
        Vendor::CivicPlus => vec![
            format!("{slug}.civicplus.com"),
            "granicus.com".to_string(),
            "municodemeetings.com".to_string(),
        ],
        Vendor::CivicWeb => vec![format!("{slug}.civicweb.net")],
        Vendor::Iqm2 => vec![format!("{slug}.iqm2.com"), "granicus.com".to_string()],
        Vendor::Municode => vec!["municodemeetings.com".to_string(), format!("{slug}.municodemeetings.com")],
        Vendor::EScribe => vec![format!("{slug}.escribemeetings.com"), "escribemeetings.com".to_string()],
    }
}

/// Extract a lowercase host from a candidate URL, if it is absolute
/// (`http(s)://`) or protocol-relative (`//host/...`). Returns `None` for
/// relative or otherwise malformed input.
fn extract_host(candidate: &str) -> Option<String> {
    let rest = if let Some(stripped) = candidate.strip_prefix("//") {
        stripped
    } else if let Some(stripped) = candidate.strip_prefix("http://") {
        stripped
    } else if let Some(stripped) = candidate.strip_prefix("https://") {
        stripped
    } else {
        return None;
    };

    let host_and_port = rest.split(['/', '?', '#']).next()?;
    let host = host_and_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Validate a candidate packet/agenda URL against `vendor`'s allow-list.
///
/// `vendor` is `None` when the city's vendor string did not parse to a
/// supported [`Vendor`] — the original's "unknown vendor" branch, which
/// cannot validate and so does not block.
pub fn validate(candidate: Option<&str>, vendor: Option<Vendor>, vendor_slug: &str) -> ValidationResult {
    let Some(candidate) = candidate else {
        return ValidationResult::Store;
    };

    let Some(host) = extract_host(candidate) else {
        return ValidationResult::Warn;
    };

    let Some(vendor) = vendor else {
        return ValidationResult::Warn;
    };

    let allow_list = domains_for(vendor, vendor_slug);
    let matches = allow_list.iter().any(|entry| host.contains(&entry.to_lowercase()));

    if matches {
        ValidationResult::Store
    } else {
        ValidationResult::Reject
    }
}
