// SPDX-License-Identifier: MIT OR Apache-2.0
//! PDF discovery helper: given an agenda page, find its packet links
//! (§4.1 "PDF discovery helper").

use crate::html;
use scraper::Html;

const KEYWORDS: &[&str] = &["agenda", "packet", ".pdf"];

/// Collect every `<a>` on `page` whose href or anchor text matches one of
/// the keyword set (`"agenda"`, `"packet"`, `".pdf"`), resolved to absolute
/// URLs against `base_url`.
pub fn discover_pdf_links(page_html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(page_html);
    html::select_links(&document, "a", base_url)
        .into_iter()
        .filter(|(href, text)| {
            let haystack_href = href.to_lowercase();
            let haystack_text = text.to_lowercase();
            KEYWORDS.iter().any(|kw| haystack_href.contains(kw) || haystack_text.contains(kw))
        })
        .map(|(href, _)| href)
        .collect()
}
