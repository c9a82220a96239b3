pub mod clean;
pub mod links;
pub mod markdown;
pub mod meta;
pub mod score;

use scraper::Html;
use url::Url;

pub use links::LinkSets;
pub use meta::PageMeta;

/// Everything the pipeline needs from one HTML document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub title: Option<String>,
    pub description: Option<String>,
    pub markdown: String,
    pub meta: PageMeta,
    pub links: LinkSets,
    pub word_count: usize,
    pub read_time_minutes: u32,
}

/// Max bytes to parse. Larger documents are truncated before parsing.
const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;

/// Turn raw HTML into clean Markdown, metadata and a partitioned link
/// graph. Byte-identical input and URL produce byte-identical output.
pub fn extract(html: &str, final_url: &Url) -> Extraction {
    let html = if html.len() > MAX_PARSE_SIZE {
        // Truncate on a char boundary.
        let mut end = MAX_PARSE_SIZE;
        while !html.is_char_boundary(end) {
            end -= 1;
        }
        &html[..end]
    } else {
        html
    };

    let doc = Html::parse_document(html);
    let meta = meta::extract_meta(&doc, final_url);

    let markdown = score::select_main_content(&doc)
        .map(|main| markdown::convert(main, final_url))
        .unwrap_or_default();

    let links = links::collect_links(&doc, final_url);
    let word_count = meta::word_count(&markdown);
    let read_time_minutes = meta::read_time_minutes(word_count);

    Extraction {
        title: meta.title.clone(),
        description: meta.description.clone(),
        markdown,
        meta,
        links,
        word_count,
        read_time_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html lang="en"><head>
        <title>Sample Article</title>
        <meta name="description" content="An article about things.">
    </head><body>
        <nav><a href="/home">Home</a><a href="/about">About</a></nav>
        <article>
            <h1>Sample Article</h1>
            <p>Opening paragraph with enough prose to anchor the content scorer,
               including commas, periods, and other punctuation. It continues for a while
               so the text mass is clearly larger than any navigation chrome.</p>
            <p>See the <a href="/guide?utm_campaign=x">guide</a> and
               <a href="https://other.org/ref">an external reference</a>.</p>
        </article>
        <footer><a href="/privacy">Privacy</a></footer>
    </body></html>"#;

    #[test]
    fn extracts_title_markdown_and_links() {
        let url = Url::parse("https://www.example.com/articles/sample").unwrap();
        let out = extract(ARTICLE, &url);

        assert_eq!(out.title.as_deref(), Some("Sample Article"));
        assert_eq!(out.description.as_deref(), Some("An article about things."));
        assert!(out.markdown.starts_with("# Sample Article"));
        assert!(out.markdown.contains("[guide](https://www.example.com/guide)"));
        // Nav and footer never leak into the content.
        assert!(!out.markdown.contains("Privacy"));
        assert!(!out.markdown.contains("Home"));

        // Links exclude dropped chrome but cover the whole document.
        assert_eq!(
            out.links.internal,
            vec!["https://www.example.com/guide".to_string()]
        );
        assert_eq!(out.links.external, vec!["https://other.org/ref".to_string()]);

        assert!(out.word_count > 20);
        assert_eq!(out.read_time_minutes, 1);
    }

    #[test]
    fn extraction_is_byte_deterministic() {
        let url = Url::parse("https://www.example.com/articles/sample").unwrap();
        let a = extract(ARTICLE, &url);
        let b = extract(ARTICLE, &url);
        assert_eq!(a.markdown, b.markdown);
        assert_eq!(a.links.internal, b.links.internal);
        assert_eq!(a.links.external, b.links.external);
        assert_eq!(a.word_count, b.word_count);
    }

    #[test]
    fn empty_document_yields_empty_artifact() {
        let url = Url::parse("https://example.com/").unwrap();
        let out = extract("", &url);
        assert!(out.markdown.is_empty());
        assert_eq!(out.word_count, 0);
        assert_eq!(out.read_time_minutes, 0);
        assert!(out.links.internal.is_empty());
    }
}
