use std::collections::HashSet;

use scraper::{ElementRef, Html};
use url::Url;

use sift_guard::{registrable_domain, strip_tracking_params};

use crate::clean::in_dropped_subtree;

/// Anchors from the document, partitioned by registrable domain against
/// the final URL. Each side is deduplicated in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct LinkSets {
    pub internal: Vec<String>,
    pub external: Vec<String>,
}

pub fn collect_links(doc: &Html, final_url: &Url) -> LinkSets {
    let own_domain = final_url
        .host_str()
        .map(|h| registrable_domain(h).unwrap_or_else(|| h.to_ascii_lowercase()));

    let mut seen: HashSet<String> = HashSet::new();
    let mut links = LinkSets::default();

    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else { continue };
        if el.value().name() != "a" || in_dropped_subtree(node) {
            continue;
        }
        let Some(href) = el.value().attr("href") else { continue };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }
        let Ok(mut resolved) = final_url.join(href) else { continue };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        strip_tracking_params(&mut resolved);

        let target = resolved.to_string();
        if !seen.insert(target.clone()) {
            continue;
        }

        let link_domain = resolved
            .host_str()
            .map(|h| registrable_domain(h).unwrap_or_else(|| h.to_ascii_lowercase()));
        if link_domain.is_some() && link_domain == own_domain {
            links.internal.push(target);
        } else {
            links.external.push(target);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(html: &str, base: &str) -> LinkSets {
        let doc = Html::parse_document(html);
        let url = Url::parse(base).unwrap();
        collect_links(&doc, &url)
    }

    #[test]
    fn partitions_by_registrable_domain() {
        let html = r#"<body>
            <a href="/docs">docs</a>
            <a href="https://blog.example.com/post">blog</a>
            <a href="https://other.org/x">other</a>
        </body>"#;
        let links = collect(html, "https://www.example.com/");
        assert_eq!(
            links.internal,
            vec!["https://www.example.com/docs", "https://blog.example.com/post"]
        );
        assert_eq!(links.external, vec!["https://other.org/x"]);
    }

    #[test]
    fn dedups_preserving_first_seen_order() {
        let html = r#"<body>
            <a href="/b">b</a>
            <a href="/a">a</a>
            <a href="/b#section">b again</a>
            <a href="/a?utm_source=x">a tracked</a>
        </body>"#;
        let links = collect(html, "https://example.com/");
        assert_eq!(links.internal, vec!["https://example.com/b", "https://example.com/a"]);
    }

    #[test]
    fn skips_non_web_schemes_and_dropped_subtrees() {
        let html = r##"<body>
            <nav><a href="/nav-link">nav</a></nav>
            <a href="mailto:x@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="tel:+15550100">tel</a>
            <a href="#frag">frag</a>
            <a href="/kept">kept</a>
        </body>"##;
        let links = collect(html, "https://example.com/");
        assert_eq!(links.internal, vec!["https://example.com/kept"]);
        assert!(links.external.is_empty());
    }
}
