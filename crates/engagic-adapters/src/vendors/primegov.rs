// SPDX-License-Identifier: MIT OR Apache-2.0
//! PrimeGov (§4.1): JSON API over `/api/v2/PublicPortal/ListUpcomingMeetings`.

use crate::VendorAdapter;
use crate::dates::parse_vendor_date;
use crate::status::parse_status_from_title;
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::EngagicError;
use serde::Deserialize;

/// Adapter for cities on the PrimeGov platform
/// (`slug.primegov.com/api/v2/PublicPortal/ListUpcomingMeetings`).
pub struct PrimeGovAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PrimeGovMeeting {
    id: serde_json::Value,
    #[serde(default)]
    title: String,
    #[serde(rename = "dateTime", default)]
    date_time: String,
    #[serde(rename = "documentList", default)]
    document_list: Vec<PrimeGovDocument>,
}

#[derive(Debug, Deserialize)]
struct PrimeGovDocument {
    id: serde_json::Value,
    #[serde(default)]
    template: String,
}

impl PrimeGovAdapter {
    /// Build an adapter for `slug.primegov.com`.
    pub fn new(client: reqwest::Client, slug: String) -> Self {
        Self { client, base_url: format!("https://{slug}.primegov.com") }
    }

    fn packet_url(&self, meeting_id: &str, document: &PrimeGovDocument) -> String {
        format!(
            "{}/Public/CompiledDocument/{}?meetingId={}&compileOutputType=1",
            self.base_url, document.id, meeting_id
        )
    }
}

#[async_trait::async_trait]
impl VendorAdapter for PrimeGovAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let url = format!("{}/api/v2/PublicPortal/ListUpcomingMeetings", self.base_url);
        let meetings: Vec<PrimeGovMeeting> = crate::http::get_json(&self.client, &url).await?;

        let mut records = Vec::with_capacity(meetings.len());
        for meeting in meetings {
            let meeting_id = meeting.id.to_string().trim_matches('"').to_string();

            let packet = meeting
                .document_list
                .iter()
                .find(|d| d.template.eq_ignore_ascii_case("Agenda Packet"))
                .or_else(|| meeting.document_list.first());

            records.push(RawMeetingRecord {
                meeting_id: meeting_id.clone(),
                title: meeting.title.clone(),
                start: parse_vendor_date(&meeting.date_time),
                packet_url: packet.map(|doc| PacketUrl::Single(self.packet_url(&meeting_id, doc))),
                agenda_url: None,
                items: None,
                meeting_status: parse_status_from_title(&meeting.title),
                location: None,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_agenda_packet_document() {
        let adapter = PrimeGovAdapter::new(reqwest::Client::new(), "example".to_string());
        let doc = PrimeGovDocument { id: serde_json::json!(55), template: "Agenda Packet".to_string() };
        assert_eq!(
            adapter.packet_url("101", &doc),
            "https://example.primegov.com/Public/CompiledDocument/55?meetingId=101&compileOutputType=1"
        );
    }

    #[test]
    fn parses_upcoming_meetings_array() {
        let body = r#"[
            {"id":101,"title":"City Council","dateTime":"2026-03-05T18:00:00",
             "documentList":[{"id":55,"template":"Agenda Packet"}]}
        ]"#;
        let meetings: Vec<PrimeGovMeeting> = serde_json::from_str(body).unwrap();
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].document_list.len(), 1);
    }
}
