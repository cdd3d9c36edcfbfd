// SPDX-License-Identifier: MIT OR Apache-2.0
//! CivicPlus (§4.1): `AgendaCenter` homepage scrape.
//!
//! CivicPlus ships no API; its `AgendaCenter` page lists each meeting as a
//! row with a date, a category, and one or more document links. Many
//! CivicPlus deployments front a Granicus or Municode Meetings backend for
//! the documents themselves (the shared [`crate::pdf_discovery`] keyword
//! match still finds those links regardless of which domain they resolve
//! to — the packet-URL allow-list in `engagic-validator` is what decides
//! whether a given host is acceptable for this vendor).

use crate::VendorAdapter;
use crate::dates::parse_vendor_date;
use crate::pdf_discovery::discover_pdf_links;
use crate::status::parse_status_from_title;
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::EngagicError;
use scraper::{Html, Selector};

/// Adapter for cities on the CivicPlus `AgendaCenter` platform.
pub struct CivicPlusAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl CivicPlusAdapter {
    /// Build an adapter for `slug.civicplus.com/AgendaCenter`.
    pub fn new(client: reqwest::Client, slug: String) -> Self {
        Self { client, base_url: format!("https://{slug}.civicplus.com") }
    }
}

#[async_trait::async_trait]
impl VendorAdapter for CivicPlusAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let page_url = format!("{}/AgendaCenter", self.base_url);
        let body = crate::http::get_text(&self.client, &page_url).await?;
        Ok(parse_agenda_center(&body, &self.base_url))
    }
}

fn parse_agenda_center(page_html: &str, base_url: &str) -> Vec<RawMeetingRecord> {
    let document = Html::parse_document(page_html);
    let Ok(item_sel) = Selector::parse(".catAgendaRow, .AgendaCenterListItem, li.listItem") else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for item in document.select(&item_sel) {
        let title = item.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            continue;
        }
        let fragment = item.html();
        let pdfs = discover_pdf_links(&fragment, base_url);
        if pdfs.is_empty() {
            continue;
        }

        let meeting_id = content_hash_id(&title, &pdfs[0]);
        let packet_url = if pdfs.len() == 1 { PacketUrl::Single(pdfs[0].clone()) } else { PacketUrl::Multi(pdfs) };

        records.push(RawMeetingRecord {
            meeting_id,
            title: title.clone(),
            start: parse_vendor_date(&title),
            packet_url: Some(packet_url),
            agenda_url: None,
            items: None,
            meeting_status: parse_status_from_title(&title),
            location: None,
        });
    }
    records
}

fn content_hash_id(title: &str, packet_url: &str) -> String {
    use sha2::Digest;
    let digest = sha2::Sha256::digest(format!("{title}_{packet_url}").as_bytes());
    format!("{digest:x}")[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_row_with_packet_link() {
        let page = r#"
            <li class="listItem">
              <span>March 5, 2026 - City Council</span>
              <a href="/AgendaCenter/ViewFile/Agenda/_03052026-100">Agenda Packet</a>
            </li>
        "#;
        let records = parse_agenda_center(page, "https://example.civicplus.com");
        assert_eq!(records.len(), 1);
        assert!(records[0].packet_url.is_some());
    }

    #[test]
    fn skips_rows_with_no_document_link() {
        let page = r#"<li class="listItem"><span>March 5, 2026 - Workshop</span></li>"#;
        let records = parse_agenda_center(page, "https://example.civicplus.com");
        assert!(records.is_empty());
    }
}
