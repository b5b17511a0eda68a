use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::crawler::error::CrawlError;
use crate::crawler::task::{ElementRecord, PageElements};

/// Elements captured from every page
pub const INTERACTIVE_SELECTOR: &str = "input, button, a";

/// Parse a rendered page into interactive elements and outgoing links
pub fn parse_page(html: &str, page_url: &str) -> Result<PageElements, CrawlError> {
    let selector = Selector::parse(INTERACTIVE_SELECTOR)
        .map_err(|e| CrawlError::extraction(page_url, format!("Invalid selector: {:?}", e)))?;
    let base = Url::parse(page_url).map_err(|e| CrawlError::malformed(page_url, e))?;

    let document = Html::parse_document(html);
    let mut elements = Vec::new();
    let mut links = Vec::new();
    let mut seen_links = HashSet::new();

    for node in document.select(&selector) {
        let value = node.value();
        let mut record = ElementRecord::new(value.name().to_lowercase());

        record.id = value.id().map(str::to_string);
        record.classes = value.classes().map(str::to_string).collect();
        record.attributes = value
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        if record.tag_name == "a" {
            if let Some(link) = value.attr("href").and_then(|href| resolve_link(&base, href)) {
                if seen_links.insert(link.clone()) {
                    links.push(link);
                }
            }
        }

        elements.push(record);
    }

    Ok(PageElements { elements, links })
}

/// Resolve an href against the page URL; only http(s) links are kept
fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html>
          <head><title>Inventory</title></head>
          <body>
            <a href="/about" class="nav primary">About</a>
            <a href="https://other.test/x#frag">Other</a>
            <a href="/about#team">About again</a>
            <a href="mailto:team@a.test">Mail</a>
            <a href="#top">Top</a>
            <div><button id="save" style="color: red" data-qa="save-btn">Save</button></div>
            <input type="checkbox" name="remember">
            <span class="ignored">Not captured</span>
          </body>
        </html>
    "##;

    #[test]
    fn test_elements_in_document_order() {
        let page = parse_page(PAGE, "https://a.test/home").unwrap();
        let tags: Vec<_> = page.elements.iter().map(|e| e.tag_name.as_str()).collect();

        assert_eq!(tags, vec!["a", "a", "a", "a", "a", "button", "input"]);

        let button = &page.elements[5];
        assert_eq!(button.id.as_deref(), Some("save"));
        assert!(button.has_inline_style());
        assert_eq!(button.attributes.get("data-qa").map(String::as_str), Some("save-btn"));

        let nav = &page.elements[0];
        assert!(nav.classes.contains("nav"));
        assert!(nav.classes.contains("primary"));
    }

    #[test]
    fn test_links_resolved_and_deduplicated() {
        let page = parse_page(PAGE, "https://a.test/home").unwrap();

        assert_eq!(
            page.links,
            vec!["https://a.test/about".to_string(), "https://other.test/x".to_string()]
        );
    }

    #[test]
    fn test_empty_page_is_not_an_error() {
        let page = parse_page("<html><body><p>nothing</p></body></html>", "https://a.test").unwrap();
        assert!(page.elements.is_empty());
        assert!(page.links.is_empty());
    }
}
