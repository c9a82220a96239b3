use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

/// Document-level metadata pulled from the head (and the root element).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_image: Option<String>,
    pub og_site_name: Option<String>,
    pub og_published_time: Option<String>,
    pub canonical_url: Option<String>,
    pub language: Option<String>,
    pub favicon: Option<String>,
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

pub fn extract_meta(doc: &Html, base: &Url) -> PageMeta {
    let title = doc
        .select(&selector("title"))
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let description = meta_content(doc, "meta[name='description'], meta[name='Description']")
        .or_else(|| property_content(doc, "og:description"));

    let og_image = property_content(doc, "og:image").map(|v| absolutize(base, &v));
    let og_site_name = property_content(doc, "og:site_name");
    let og_published_time = property_content(doc, "article:published_time")
        .or_else(|| property_content(doc, "og:published_time"));

    let canonical_url = doc
        .select(&selector("link[rel='canonical']"))
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| absolutize(base, href));

    let language = doc
        .select(&selector("html"))
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let favicon = doc
        .select(&selector("link[rel='icon'], link[rel='shortcut icon'], link[rel='apple-touch-icon']"))
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| absolutize(base, href));

    PageMeta {
        title,
        description,
        og_image,
        og_site_name,
        og_published_time,
        canonical_url,
        language,
        favicon,
    }
}

fn meta_content(doc: &Html, sel: &str) -> Option<String> {
    doc.select(&selector(sel))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn property_content(doc: &Html, property: &str) -> Option<String> {
    let sel = format!("meta[property='{property}']");
    meta_content(doc, &sel)
}

fn absolutize(base: &Url, href: &str) -> String {
    base.join(href.trim()).map(|u| u.to_string()).unwrap_or_else(|_| href.trim().to_string())
}

/// Words in the rendered Markdown, with markup punctuation stripped first
/// so fences and link syntax don't count as words.
pub fn word_count(markdown: &str) -> usize {
    markdown
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .count()
}

/// Reading time at 200 words per minute, rounded up.
pub fn read_time_minutes(words: usize) -> u32 {
    words.div_ceil(200) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulls_head_metadata() {
        let html = r#"<html lang="en"><head>
            <title> The Title </title>
            <meta name="description" content="A summary.">
            <meta property="og:image" content="/img/cover.png">
            <meta property="og:site_name" content="Example">
            <meta property="article:published_time" content="2024-03-01T10:00:00Z">
            <link rel="canonical" href="https://example.com/canonical">
            <link rel="icon" href="/favicon.ico">
        </head><body></body></html>"#;
        let doc = Html::parse_document(html);
        let base = Url::parse("https://example.com/page").unwrap();
        let meta = extract_meta(&doc, &base);
        assert_eq!(meta.title.as_deref(), Some("The Title"));
        assert_eq!(meta.description.as_deref(), Some("A summary."));
        assert_eq!(meta.og_image.as_deref(), Some("https://example.com/img/cover.png"));
        assert_eq!(meta.og_site_name.as_deref(), Some("Example"));
        assert_eq!(meta.og_published_time.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert_eq!(meta.canonical_url.as_deref(), Some("https://example.com/canonical"));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert_eq!(meta.favicon.as_deref(), Some("https://example.com/favicon.ico"));
    }

    #[test]
    fn missing_metadata_is_none() {
        let doc = Html::parse_document("<html><body><p>x</p></body></html>");
        let base = Url::parse("https://example.com/").unwrap();
        let meta = extract_meta(&doc, &base);
        assert!(meta.title.is_none());
        assert!(meta.description.is_none());
        assert!(meta.canonical_url.is_none());
    }

    #[test]
    fn word_count_ignores_markup_punctuation() {
        let md = "# Title\n\nOne two **three** [link](https://example.com) `code` | cell |";
        // Title, One, two, three, link+url (one token), code, cell
        assert_eq!(word_count(md), 7);
    }

    #[test]
    fn read_time_rounds_up() {
        assert_eq!(read_time_minutes(0), 0);
        assert_eq!(read_time_minutes(1), 1);
        assert_eq!(read_time_minutes(200), 1);
        assert_eq!(read_time_minutes(201), 2);
        assert_eq!(read_time_minutes(1000), 5);
    }
}
