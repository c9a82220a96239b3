use scraper::{ElementRef, Html, Selector};

use crate::clean::{in_dropped_subtree, is_dropped};

/// Tags eligible to anchor the main content subtree.
const CANDIDATE_TAGS: &[&str] = &["article", "main", "section", "div", "td"];

/// Minimum visible text for a candidate to be considered at all.
const MIN_CANDIDATE_TEXT: usize = 80;

/// Pick the subtree that most likely holds the page's main content.
///
/// Semantic containers win outright when present; otherwise block
/// candidates are ranked by text mass, discounted by link density and
/// boosted by punctuation frequency (prose carries commas and periods,
/// link farms don't). Falls back to `<body>`.
pub fn select_main_content(doc: &Html) -> Option<ElementRef<'_>> {
    for selector in ["article", "main", "[role=\"main\"]"] {
        let sel = Selector::parse(selector).expect("static selector");
        let mut best: Option<(f64, ElementRef)> = None;
        for el in doc.select(&sel) {
            if is_dropped(el.value()) || in_dropped_subtree(*el) {
                continue;
            }
            let text = visible_text_len(el);
            if text < MIN_CANDIDATE_TEXT {
                continue;
            }
            if best.as_ref().map(|(t, _)| (text as f64) > *t).unwrap_or(true) {
                best = Some((text as f64, el));
            }
        }
        if let Some((_, el)) = best {
            return Some(el);
        }
    }

    let mut best: Option<(f64, ElementRef)> = None;
    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else { continue };
        if !CANDIDATE_TAGS.contains(&el.value().name()) {
            continue;
        }
        if is_dropped(el.value()) || in_dropped_subtree(node) {
            continue;
        }
        let score = score_candidate(el);
        // Strictly-greater keeps the earliest of equal-scoring candidates,
        // which keeps selection deterministic.
        if score > best.as_ref().map(|(s, _)| *s).unwrap_or(f64::MIN) {
            best = Some((score, el));
        }
    }
    if let Some((_, el)) = best {
        return Some(el);
    }

    let body = Selector::parse("body").expect("static selector");
    doc.select(&body).next()
}

fn score_candidate(el: ElementRef<'_>) -> f64 {
    let text_len = visible_text_len(el);
    if text_len < MIN_CANDIDATE_TEXT {
        return f64::MIN;
    }
    let link_len = link_text_len(el);
    let link_density = if text_len > 0 {
        link_len as f64 / text_len as f64
    } else {
        1.0
    };
    let punctuation = punctuation_count(el);
    text_len as f64 * (1.0 - link_density) + punctuation as f64 * 10.0
}

pub(crate) fn visible_text_len(el: ElementRef<'_>) -> usize {
    let mut len = 0usize;
    for node in el.descendants() {
        if let scraper::Node::Text(text) = node.value() {
            if !in_dropped_subtree(node) {
                len += text.split_whitespace().map(str::len).sum::<usize>();
            }
        }
    }
    len
}

fn link_text_len(el: ElementRef<'_>) -> usize {
    let mut len = 0usize;
    for node in el.descendants() {
        if let scraper::Node::Text(text) = node.value() {
            if in_dropped_subtree(node) {
                continue;
            }
            let in_anchor = node.ancestors().any(|a| {
                a.value().as_element().map(|e| e.name() == "a").unwrap_or(false)
            });
            if in_anchor {
                len += text.split_whitespace().map(str::len).sum::<usize>();
            }
        }
    }
    len
}

fn punctuation_count(el: ElementRef<'_>) -> usize {
    let mut count = 0usize;
    for node in el.descendants() {
        if let scraper::Node::Text(text) = node.value() {
            if !in_dropped_subtree(node) {
                count += text.chars().filter(|c| matches!(c, ',' | '.' | ';' | ':')).count();
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_article_over_link_heavy_siblings() {
        let prose = "The quick brown fox jumps over the lazy dog, again and again. ".repeat(10);
        let html = format!(
            r#"<html><body>
                <div class="sidebar"><a href="/1">one</a> <a href="/2">two</a> <a href="/3">three</a></div>
                <article><p>{prose}</p></article>
            </body></html>"#
        );
        let doc = Html::parse_document(&html);
        let main = select_main_content(&doc).unwrap();
        assert_eq!(main.value().name(), "article");
    }

    #[test]
    fn scores_prose_div_above_link_list() {
        let prose = "Sentence with punctuation, commas, and periods. More prose follows here. ".repeat(12);
        let links = r#"<a href="/a">aaaa aaaa</a> <a href="/b">bbbb bbbb</a> "#.repeat(30);
        let html = format!(
            r#"<html><body><div id="listing">{links}</div><div id="story"><p>{prose}</p></div></body></html>"#
        );
        let doc = Html::parse_document(&html);
        let main = select_main_content(&doc).unwrap();
        assert_eq!(main.value().attr("id"), Some("story"));
    }

    #[test]
    fn falls_back_to_body_for_bare_pages() {
        let doc = Html::parse_document("<html><body><p>tiny</p></body></html>");
        let main = select_main_content(&doc).unwrap();
        assert_eq!(main.value().name(), "body");
    }
}
