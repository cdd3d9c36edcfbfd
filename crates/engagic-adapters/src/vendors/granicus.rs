// SPDX-License-Identifier: MIT OR Apache-2.0
//! Granicus (§4.1): view-id brute-force discovery, HTML table scrape,
//! `AgendaViewer.php` PDF list expansion.

use crate::VendorAdapter;
use crate::status::parse_status_from_title;
use engagic_core::{PacketUrl, RawMeetingRecord};
use engagic_error::{EngagicError, ErrorCode};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

const MAX_VIEW_ID: u32 = 500;

static CLIP_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"clip_id=(\d+)").unwrap());
static EVENT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"event_id=(\d+)").unwrap());

/// Adapter for cities on the Granicus platform.
///
/// Granicus exposes no stable per-city identifier for its
/// `ViewPublisher.php?view_id=N` listing page, so the view id is discovered
/// by brute force and cached to disk (§6 "Granicus view-id cache").
pub struct GranicusAdapter {
    client: reqwest::Client,
    base_url: String,
    view_ids_path: PathBuf,
}

impl GranicusAdapter {
    /// Build an adapter for `slug.granicus.com`, backed by the shared
    /// view-id cache file at `view_ids_path`.
    pub fn new(client: reqwest::Client, slug: String, view_ids_path: PathBuf) -> Self {
        Self { client, base_url: format!("https://{slug}.granicus.com"), view_ids_path }
    }

    async fn resolve_view_id(&self) -> Result<u32, EngagicError> {
        let mappings = load_view_id_cache(&self.view_ids_path);
        if let Some(id) = mappings.get(&self.base_url) {
            return Ok(*id);
        }

        let view_id = self.discover_view_id().await?;
        let mut updated = mappings;
        updated.insert(self.base_url.clone(), view_id);
        save_view_id_cache(&self.view_ids_path, &updated)?;
        Ok(view_id)
    }

    async fn discover_view_id(&self) -> Result<u32, EngagicError> {
        let current_year = chrono::Utc::now().format("%Y").to_string();
        for candidate in 1..=MAX_VIEW_ID {
            let url = format!("{}/ViewPublisher.php?view_id={candidate}", self.base_url);
            let Ok(body) = crate::http::get_text(&self.client, &url).await else {
                continue;
            };
            if body.contains("ViewPublisher")
                && (body.contains("Meeting") || body.contains("Agenda"))
                && body.contains(&current_year)
            {
                return Ok(candidate);
            }
        }
        Err(EngagicError::new(ErrorCode::AdapterDiscoveryFailed, "could not discover Granicus view_id")
            .with_context("base_url", self.base_url.clone()))
    }

    async fn extract_pdfs_from_agenda_viewer(&self, agenda_url: &str) -> Vec<String> {
        let Ok(body) = crate::http::get_text(&self.client, agenda_url).await else {
            return Vec::new();
        };
        let document = Html::parse_document(&body);
        let Ok(sel) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let base = Url::parse(&self.base_url).ok();
        document
            .select(&sel)
            .filter_map(|el| {
                let href = el.value().attr("href")?;
                let lower = href.to_lowercase();
                if !(lower.contains(".pdf") || href.contains("MetaViewer")) {
                    return None;
                }
                let resolved = base.as_ref().and_then(|b| b.join(href).ok()).map(|u| u.to_string());
                resolved.or_else(|| Some(href.to_string()))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl VendorAdapter for GranicusAdapter {
    async fn fetch_meetings(&self) -> Result<Vec<RawMeetingRecord>, EngagicError> {
        let view_id = self.resolve_view_id().await?;
        let list_url = format!("{}/ViewPublisher.php?view_id={view_id}", self.base_url);
        let body = crate::http::get_text(&self.client, &list_url).await?;

        let upcoming_rows = find_upcoming_rows(&body);
        let mut records = Vec::with_capacity(upcoming_rows.len());
        for (title, start, href) in upcoming_rows {
            let agenda_url = href.as_ref().and_then(|h| {
                Url::parse(&self.base_url).ok().and_then(|b| b.join(h).ok()).map(|u| u.to_string())
            });

            let mut meeting_id = agenda_url.as_deref().and_then(extract_meeting_id);
            let mut packet_url = None;

            if let Some(agenda_url) = &agenda_url {
                let lower = agenda_url.to_lowercase();
                if lower.contains(".pdf") || agenda_url.contains("GeneratedAgenda.ashx") {
                    packet_url = Some(PacketUrl::Single(agenda_url.clone()));
                } else if agenda_url.contains("AgendaViewer.php") {
                    let pdfs = self.extract_pdfs_from_agenda_viewer(agenda_url).await;
                    if !pdfs.is_empty() {
                        packet_url = Some(PacketUrl::Multi(pdfs));
                    }
                }
            }

            if meeting_id.is_none() {
                meeting_id = Some(fallback_meeting_id(&title, &start));
            }

            records.push(RawMeetingRecord {
                meeting_id: meeting_id.unwrap(),
                title: title.clone(),
                start: crate::dates::parse_vendor_date(&start),
                packet_url,
                agenda_url,
                items: None,
                meeting_status: parse_status_from_title(&format!("{title} {start}")),
                location: None,
            });
        }
        Ok(records)
    }
}

/// Find the "Upcoming Events"/"Upcoming Meetings" table and return
/// `(title, start, agenda_href)` per row, skipping header rows.
fn find_upcoming_rows(page_html: &str) -> Vec<(String, String, Option<String>)> {
    let document = Html::parse_document(page_html);
    let Ok(header_sel) = Selector::parse("h2, h3") else {
        return Vec::new();
    };
    let header = document.select(&header_sel).find(|el| {
        let text = el.text().collect::<String>();
        text.contains("Upcoming Events") || text.contains("Upcoming Meetings")
    });
    let Some(header) = header else {
        return Vec::new();
    };

    let Some(table) = next_table_sibling(header) else {
        return Vec::new();
    };

    let Ok(row_sel) = Selector::parse("tr") else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse("td") else {
        return Vec::new();
    };
    let Ok(link_sel) = Selector::parse("a") else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.len() < 2 {
            continue;
        }
        if cells.iter().any(|c| c.value().attr("class") == Some("listHeader")) {
            continue;
        }

        let title = visible_text(cells[0]);
        let start = visible_text(cells[1]);
        if title.is_empty() || title == "Meeting" || title == "Event" {
            continue;
        }

        let href = row
            .select(&link_sel)
            .find(|a| a.text().collect::<String>().contains("Agenda"))
            .and_then(|a| a.value().attr("href"))
            .map(|s| s.to_string());

        rows.push((title, start, href));
    }
    rows
}

/// Walk a DOM subtree looking for the next sibling `<table>`, the way the
/// original treats a `<div class="archive">` boundary as "stop looking".
fn next_table_sibling(header: ElementRef) -> Option<ElementRef> {
    let mut node = header.next_sibling();
    while let Some(n) = node {
        if let Some(el) = ElementRef::wrap(n) {
            if el.value().name() == "table" {
                return Some(el);
            }
            if el.value().name() == "div" && el.value().attr("class") == Some("archive") {
                return None;
            }
        }
        node = n.next_sibling();
    }
    None
}

/// Cell text with `display:none` timestamp spans stripped.
fn visible_text(cell: ElementRef) -> String {
    let Ok(hidden_sel) = Selector::parse("span") else {
        return cell.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
    };
    let hidden: Vec<_> = cell
        .select(&hidden_sel)
        .filter(|s| s.value().attr("style").map(|v| v.contains("display:none")).unwrap_or(false))
        .map(|s| s.text().collect::<String>())
        .collect();
    let mut text = cell.text().collect::<String>();
    for h in hidden {
        text = text.replacen(&h, "", 1);
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_meeting_id(url: &str) -> Option<String> {
    if let Some(caps) = CLIP_ID.captures(url) {
        return Some(format!("clip_{}", &caps[1]));
    }
    if let Some(caps) = EVENT_ID.captures(url) {
        return Some(format!("event_{}", &caps[1]));
    }
    None
}

fn fallback_meeting_id(title: &str, start: &str) -> String {
    let digest = sha2::Sha256::digest(format!("{title}_{start}").as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

use sha2::Digest as _;

fn load_view_id_cache(path: &Path) -> BTreeMap<String, u32> {
    std::fs::read_to_string(path).ok().and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

/// Rewrite the view-id cache atomically: write to a sibling temp file, then
/// rename over the real path, so a concurrent reader never sees a torn file.
fn save_view_id_cache(path: &Path, mappings: &BTreeMap<String, u32>) -> Result<(), EngagicError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngagicError::new(ErrorCode::AdapterDiscoveryFailed, "failed to create view-id cache directory")
                    .with_source(e)
            })?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(mappings)
        .map_err(|e| EngagicError::new(ErrorCode::Internal, "failed to serialize view-id cache").with_source(e))?;
    std::fs::write(&tmp_path, body)
        .map_err(|e| EngagicError::new(ErrorCode::AdapterDiscoveryFailed, "failed to write view-id cache").with_source(e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| EngagicError::new(ErrorCode::AdapterDiscoveryFailed, "failed to install view-id cache").with_source(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_clip_id() {
        assert_eq!(extract_meeting_id("https://x.granicus.com/MediaPlayer.php?clip_id=501"), Some("clip_501".to_string()));
    }

    #[test]
    fn extracts_event_id() {
        assert_eq!(
            extract_meeting_id("https://x.granicus.com/AgendaViewer.php?event_id=77"),
            Some("event_77".to_string())
        );
    }

    #[test]
    fn falls_back_to_hash_when_no_id_present() {
        let id = fallback_meeting_id("City Council", "March 5, 2026");
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn finds_upcoming_events_table_rows() {
        let page = r#"
            <h3>Upcoming Events</h3>
            <table>
              <tr><td class="listHeader">Name</td><td class="listHeader">Date</td></tr>
              <tr>
                <td>City Council <span style="display:none">20260305</span></td>
                <td>March 5, 2026 <span style="display:none">sort</span></td>
                <a href="AgendaViewer.php?event_id=42">Agenda</a>
              </tr>
            </table>
            <div class="archive">Archive</div>
        "#;
        let rows = find_upcoming_rows(page);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "City Council");
        assert!(rows[0].2.as_deref().unwrap().contains("event_id=42"));
    }

    #[test]
    fn atomic_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("granicus_view_ids.json");
        let mut mappings = BTreeMap::new();
        mappings.insert("https://example.granicus.com".to_string(), 17u32);
        save_view_id_cache(&path, &mappings).unwrap();
        let loaded = load_view_id_cache(&path);
        assert_eq!(loaded.get("https://example.granicus.com"), Some(&17));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
