// SPDX-License-Identifier: MIT OR Apache-2.0
//! NovusAgenda (§4.1): `rgRow`/`rgAltRow` table scrape of `/agendapublic`.

use crate::VendorAdapter;
use crate::dates::parse_vendor_date;
use crate::status::parse_status_from_title;
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::EngagicError;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static MEETING_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"MeetingID=(\d+)").unwrap());
static PDF_HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DisplayAgendaPDF\.ashx").unwrap());

/// Adapter for cities on the NovusAgenda platform (no stable API; scrapes
/// the public agenda table directly).
pub struct NovusAgendaAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl NovusAgendaAdapter {
    /// Build an adapter for `slug.novusagenda.com`.
    pub fn new(client: reqwest::Client, slug: String) -> Self {
        Self { client, base_url: format!("https://{slug}.novusagenda.com") }
    }
}

#[async_trait::async_trait]
impl VendorAdapter for NovusAgendaAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let page_url = format!("{}/agendapublic", self.base_url);
        let body = crate::http::get_text(&self.client, &page_url).await?;
        Ok(parse_meeting_rows(&body, &self.base_url))
    }
}

fn parse_meeting_rows(page_html: &str, base_url: &str) -> Vec<RawMeetingRecord> {
    let document = Html::parse_document(page_html);
    let Ok(row_sel) = Selector::parse("tr.rgRow, tr.rgAltRow") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td") else {
        return Vec::new();
    };
    let Ok(link_sel) = Selector::parse("a") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut records = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<String> =
            row.select(&cell_sel).map(|c| c.text().collect::<String>().trim().to_string()).collect();
        if cells.len() < 5 {
            continue;
        }
        let date = &cells[0];
        let meeting_type = &cells[1];

        let Some(href) = row.select(&link_sel).find_map(|a| {
            let href = a.value().attr("href")?;
            PDF_HREF.is_match(href).then(|| href.to_string())
        }) else {
            continue;
        };
        let Some(caps) = MEETING_ID.captures(&href) else {
            continue;
        };
        let meeting_id = caps[1].to_string();
        let packet_url = base.as_ref().and_then(|b| b.join(&href).ok()).map(|u| u.to_string()).unwrap_or(href);

        records.push(RawMeetingRecord {
            meeting_id,
            title: meeting_type.clone(),
            start: parse_vendor_date(date),
            packet_url: Some(PacketUrl::Single(packet_url)),
            agenda_url: None,
            items: None,
            meeting_status: parse_status_from_title(meeting_type),
            location: None,
        });
    }
    records
}
