// SPDX-License-Identifier: MIT OR Apache-2.0
//! Legistar (§4.1): OData Web API over a rolling forward window.

use crate::VendorAdapter;
use crate::dates::parse_vendor_date;
use crate::status::parse_status_from_title;
use chrono::{Duration, Utc};
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::EngagicError;
use serde::Deserialize;

/// Adapter for cities on the Legistar platform
/// (`webapi.legistar.com/v1/{client}/events`).
pub struct LegistarAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    window_days: i64,
}

#[derive(Debug, Deserialize)]
struct LegistarEvent {
    #[serde(rename = "EventId")]
    event_id: serde_json::Value,
    #[serde(rename = "EventDate", default)]
    event_date: String,
    #[serde(rename = "EventBodyName", default)]
    event_body_name: String,
    #[serde(rename = "EventLocation")]
    event_location: Option<String>,
    #[serde(rename = "EventAgendaFile")]
    event_agenda_file: Option<String>,
}

impl LegistarAdapter {
    /// Build an adapter for `webapi.legistar.com/v1/{slug}`.
    pub fn new(client: reqwest::Client, slug: String, api_token: Option<String>, window_days: i64) -> Self {
        Self { client, base_url: format!("https://webapi.legistar.com/v1/{slug}"), api_token, window_days }
    }
}

#[async_trait::async_trait]
impl VendorAdapter for LegistarAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let today = Utc::now().date_naive();
        let future = today + Duration::days(self.window_days);
        let filter = format!(
            "EventDate ge datetime'{}' and EventDate lt datetime'{}'",
            today.format("%Y-%m-%d"),
            future.format("%Y-%m-%d")
        );

        let mut url = format!(
            "{}/events?$filter={}&$orderby=EventDate%20asc&$top=1000",
            self.base_url,
            filter.replace(' ', "%20").replace('\'', "%27")
        );
        if let Some(token) = &self.api_token {
            url.push_str(&format!("&token={token}"));
        }

        let events: Vec<LegistarEvent> = crate::http::get_json(&self.client, &url).await?;

        let records = events
            .into_iter()
            .map(|event| RawMeetingRecord {
                meeting_id: event.event_id.to_string().trim_matches('"').to_string(),
                title: event.event_body_name.clone(),
                start: parse_vendor_date(&event.event_date),
                packet_url: event.event_agenda_file.map(PacketUrl::Single),
                agenda_url: None,
                items: None,
                meeting_status: parse_status_from_title(&event.event_body_name),
                location: event.event_location,
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_array() {
        let body = r#"[
            {"EventId":501,"EventDate":"2026-03-05T18:00:00","EventBodyName":"City Council",
             "EventLocation":"Chambers","EventAgendaFile":"https://sfgov.legistar.com/View.ashx?M=A&ID=1"}
        ]"#;
        let events: Vec<LegistarEvent> = serde_json::from_str(body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_body_name, "City Council");
        assert!(events[0].event_agenda_file.is_some());
    }

    #[test]
    fn missing_packet_is_none_not_error() {
        let body = r#"[{"EventId":1,"EventDate":"2026-03-05","EventBodyName":"Workshop"}]"#;
        let events: Vec<LegistarEvent> = serde_json::from_str(body).unwrap();
        assert!(events[0].event_agenda_file.is_none());
    }
}
