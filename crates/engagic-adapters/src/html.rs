// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTML → DOM helpers shared by the HTML-scraping adapters (§4.1).

use scraper::{Html, Selector};
use url::Url;

/// Select every element matching `selector` and return its trimmed,
/// whitespace-collapsed text content.
pub fn select_text(document: &Html, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .map(|el| el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Select every `<a>` matching `selector` and return `(href, anchor_text)`
/// pairs, hrefs resolved to absolute URLs against `base_url` when relative.
pub fn select_links(document: &Html, selector: &str, base_url: &str) -> Vec<(String, String)> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();
    document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let resolved = resolve_href(href, base.as_ref());
            let text = el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
            Some((resolved, text))
        })
        .collect()
}

fn resolve_href(href: &str, base: Option<&Url>) -> String {
    if let Some(base) = base {
        if let Ok(joined) = base.join(href) {
            return joined.to_string();
        }
    }
    href.to_string()
}

/// Given a table's rows selected by `row_selector`, collect each row's cell
/// text (selected by `cell_selector` within the row).
pub fn select_rows(document: &Html, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>> {
    let Ok(row_sel) = Selector::parse(row_selector) else {
        return Vec::new();
    };
    let Ok(cell_sel) = Selector::parse(cell_selector) else {
        return Vec::new();
    };
    document
        .select(&row_sel)
        .map(|row| {
            row.select(&cell_sel)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_text_collapses_whitespace() {
        let doc = Html::parse_document("<div class='title'>  Hello   \n  World </div>");
        let texts = select_text(&doc, ".title");
        assert_eq!(texts, vec!["Hello World".to_string()]);
    }

    #[test]
    fn select_links_resolves_relative_hrefs() {
        let doc = Html::parse_document(r#"<a href="/agenda/1.pdf">Agenda</a>"#);
        let links = select_links(&doc, "a", "https://example.gov/meetings");
        assert_eq!(links, vec![("https://example.gov/agenda/1.pdf".to_string(), "Agenda".to_string())]);
    }

    #[test]
    fn select_links_keeps_absolute_hrefs() {
        let doc = Html::parse_document(r#"<a href="https://cdn.example.gov/packet.pdf">Packet</a>"#);
        let links = select_links(&doc, "a", "https://example.gov/meetings");
        assert_eq!(links[0].0, "https://cdn.example.gov/packet.pdf");
    }

    #[test]
    fn select_rows_collects_cell_text() {
        let doc = Html::parse_document(
            r#"<table><tr class="rgRow"><td>March 5</td><td>Council</td></tr></table>"#,
        );
        let rows = select_rows(&doc, "tr.rgRow", "td");
        assert_eq!(rows, vec![vec!["March 5".to_string(), "Council".to_string()]]);
    }
}
