use ego_tree::NodeRef;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Element;
use scraper::Node;

/// Subtrees that never contribute content.
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "form", "iframe", "svg",
    "template", "button", "select",
];

/// Class/id tokens that mark ad, tracker and chrome containers.
static AD_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^|[\s_-])(ad|ads|advert|advertisement|adsbygoogle|banner|sponsor|sponsored|promo|tracking|tracker|analytics|cookie|gdpr|consent|popup|share-buttons|social-share)([\s_-]|$)",
    )
    .expect("ad token regex")
});

/// Whether this element's whole subtree is excluded from extraction.
pub fn is_dropped(element: &Element) -> bool {
    if DROPPED_TAGS.contains(&element.name()) {
        return true;
    }
    if let Some(id) = element.attr("id") {
        if AD_TOKEN.is_match(id) {
            return true;
        }
    }
    if let Some(class) = element.attr("class") {
        if AD_TOKEN.is_match(class) {
            return true;
        }
    }
    false
}

/// Whether the node or any ancestor element is dropped.
pub fn in_dropped_subtree(node: NodeRef<'_, Node>) -> bool {
    for ancestor in std::iter::once(node).chain(node.ancestors()) {
        if let Some(element) = ancestor.value().as_element() {
            if is_dropped(element) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn first_element_dropped(html: &str, selector: &str) -> bool {
        let doc = Html::parse_fragment(html);
        let sel = Selector::parse(selector).unwrap();
        let el = doc.select(&sel).next().unwrap();
        is_dropped(el.value())
    }

    #[test]
    fn drops_structural_chrome() {
        assert!(first_element_dropped("<nav>menu</nav>", "nav"));
        assert!(first_element_dropped("<footer>f</footer>", "footer"));
        assert!(first_element_dropped("<script>x</script>", "script"));
        assert!(!first_element_dropped("<article>a</article>", "article"));
        assert!(!first_element_dropped("<p>a</p>", "p"));
    }

    #[test]
    fn drops_ad_classes_but_not_lookalikes() {
        assert!(first_element_dropped(r#"<div class="ad-container">x</div>"#, "div"));
        assert!(first_element_dropped(r#"<div class="sidebar ads">x</div>"#, "div"));
        assert!(first_element_dropped(r#"<div id="cookie-banner">x</div>"#, "div"));
        // "adventure" and "gradient" must survive the token match.
        assert!(!first_element_dropped(r#"<div class="adventure">x</div>"#, "div"));
        assert!(!first_element_dropped(r#"<div class="gradient-bg">x</div>"#, "div"));
    }
}
