use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

/// Bodies shorter than this are assumed to be a shell for script-driven
/// content.
const MIN_BODY_BYTES: usize = 500;
/// Minimum visible text (script/style stripped) for a page to count as
/// server-rendered.
const MIN_TEXT_CHARS: usize = 200;

static SPA_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"id\s*=\s*["'](?:app|root)["']"#).expect("spa shell regex"));
static NEXT_DATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"__next_data__").expect("next data regex"));
static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*url\s*="#).expect("meta refresh regex")
});

/// Decide whether an `auto` fetch should fall back to headless rendering.
/// Fires on any of: a tiny body, a known SPA mount point, a meta-refresh
/// pointing elsewhere, or almost no visible text once script and style
/// are stripped.
pub fn needs_render(body: &[u8]) -> bool {
    if body.len() < MIN_BODY_BYTES {
        return true;
    }
    let text = String::from_utf8_lossy(body);
    let lower = text.to_lowercase();
    if SPA_SHELL.is_match(&lower) || NEXT_DATA.is_match(&lower) {
        return true;
    }
    if META_REFRESH.is_match(&lower) {
        return true;
    }
    visible_text_len(&text) < MIN_TEXT_CHARS
}

fn visible_text_len(html: &str) -> usize {
    let doc = Html::parse_document(html);
    let mut len = 0usize;
    for node in doc.root_element().descendants() {
        let scraper::Node::Text(text) = node.value() else {
            continue;
        };
        let in_script = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
                .unwrap_or(false)
        });
        if !in_script {
            len += text.trim().chars().count();
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_prose() -> String {
        "Plain server rendered paragraph text with enough words to pass the visible text check. "
            .repeat(10)
    }

    #[test]
    fn tiny_body_triggers_render() {
        assert!(needs_render(b"<html><body></body></html>"));
    }

    #[test]
    fn spa_shell_triggers_render() {
        let html = format!(
            "<html><body><div id=\"app\"></div><script src=\"/b.js\"></script><!-- {} --></body></html>",
            "pad ".repeat(200)
        );
        assert!(needs_render(html.as_bytes()));

        let html = format!(
            "<html><body><div id='root'></div><!-- {} --></body></html>",
            "pad ".repeat(200)
        );
        assert!(needs_render(html.as_bytes()));
    }

    #[test]
    fn next_data_marker_triggers_render() {
        let html = format!(
            "<html><body><script id=\"__NEXT_DATA__\" type=\"application/json\">{{}}</script><!-- {} --></body></html>",
            "pad ".repeat(200)
        );
        assert!(needs_render(html.as_bytes()));
    }

    #[test]
    fn meta_refresh_triggers_render() {
        let html = format!(
            "<html><head><meta http-equiv=\"refresh\" content=\"0; url=https://example.com/next\"></head><body>{}</body></html>",
            long_prose()
        );
        assert!(needs_render(html.as_bytes()));
    }

    #[test]
    fn script_only_text_triggers_render() {
        let script = format!("<script>var x = \"{}\";</script>", "y".repeat(2000));
        let html = format!("<html><body>{script}<p>hi</p></body></html>");
        assert!(needs_render(html.as_bytes()));
    }

    #[test]
    fn server_rendered_article_does_not_trigger() {
        let html = format!("<html><body><article><p>{}</p></article></body></html>", long_prose());
        assert!(!needs_render(html.as_bytes()));
    }
}
