// SPDX-License-Identifier: MIT OR Apache-2.0
//! CivicClerk (§4.1): OData API, `publishedFiles` packet lookup.

use crate::VendorAdapter;
use crate::dates::parse_vendor_date;
use crate::status::parse_status_from_title;
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::EngagicError;
use serde::Deserialize;

/// Adapter for cities on the CivicClerk platform (OData `$filter`/`$orderby`
/// over `/v1/Events`, packet fetched via `GetMeetingFileStream`).
pub struct CivicClerkAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    value: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: serde_json::Value,
    #[serde(rename = "eventName", default)]
    event_name: String,
    #[serde(rename = "startDateTime", default)]
    start_date_time: String,
    #[serde(rename = "publishedFiles", default)]
    published_files: Vec<PublishedFile>,
}

#[derive(Debug, Deserialize)]
struct PublishedFile {
    #[serde(rename = "fileId")]
    file_id: serde_json::Value,
    #[serde(rename = "type", default)]
    file_type: String,
}

impl CivicClerkAdapter {
    /// Build an adapter for `slug.api.civicclerk.com`.
    pub fn new(client: reqwest::Client, slug: String) -> Self {
        Self { client, base_url: format!("https://{slug}.api.civicclerk.com") }
    }

    fn packet_url(&self, file: &PublishedFile) -> String {
        format!(
            "{}/v1/Meetings/GetMeetingFileStream(fileId={},plainText=false)",
            self.base_url, file.file_id
        )
    }
}

#[async_trait::async_trait]
impl VendorAdapter for CivicClerkAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let filter = format!("startDateTime gt {now}");
        let url = format!(
            "{}/v1/Events?$filter={}&$orderby=startDateTime%20asc,%20eventName%20asc",
            self.base_url,
            urlencoding_light(&filter)
        );

        let body: EventsResponse = crate::http::get_json(&self.client, &url).await?;

        let mut records = Vec::new();
        for event in body.value {
            let packet = event.published_files.iter().find(|f| f.file_type == "Agenda Packet");
            let Some(packet) = packet else {
                tracing::debug!(event = %event.event_name, "civicclerk: no agenda packet, skipping");
                continue;
            };

            records.push(RawMeetingRecord {
                meeting_id: event.id.to_string().trim_matches('"').to_string(),
                title: event.event_name.clone(),
                start: parse_vendor_date(&event.start_date_time),
                packet_url: Some(PacketUrl::Single(self.packet_url(packet))),
                agenda_url: None,
                items: None,
                meeting_status: parse_status_from_title(&event.event_name),
                location: None,
            });
        }
        Ok(records)
    }
}

/// Minimal percent-encoding for the characters OData filter strings need.
fn urlencoding_light(s: &str) -> String {
    s.replace(' ', "%20").replace('\'', "%27")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_file_stream_packet_url() {
        let adapter = CivicClerkAdapter::new(reqwest::Client::new(), "montpelliervt".to_string());
        let file = PublishedFile { file_id: serde_json::json!(12345), file_type: "Agenda Packet".to_string() };
        assert_eq!(
            adapter.packet_url(&file),
            "https://montpelliervt.api.civicclerk.com/v1/Meetings/GetMeetingFileStream(fileId=12345,plainText=false)"
        );
    }

    #[test]
    fn parses_events_response_and_skips_without_packet() {
        let body = r#"{"value":[
            {"id":1,"eventName":"Council Meeting","startDateTime":"2026-03-05T18:00:00.000Z",
             "publishedFiles":[{"fileId":99,"type":"Agenda Packet"}]},
            {"id":2,"eventName":"Workshop","startDateTime":"2026-03-06T18:00:00.000Z","publishedFiles":[]}
        ]}"#;
        let parsed: EventsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.value.len(), 2);
        assert!(parsed.value[1].published_files.is_empty());
    }
}
