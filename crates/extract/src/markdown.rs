use scraper::{ElementRef, Node};
use url::Url;

use sift_guard::strip_tracking_params;

use crate::clean::is_dropped;

/// Convert a content subtree to GitHub-flavored Markdown. Link and image
/// targets are rewritten absolute against `base` with tracking parameters
/// stripped. Output is a pure function of the input DOM and base URL.
pub fn convert(root: ElementRef<'_>, base: &Url) -> String {
    let mut renderer = Renderer { base, out: String::new() };
    renderer.container(root);
    finalize(renderer.out)
}

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "div", "section", "article", "main", "ul", "ol",
    "pre", "blockquote", "table", "hr", "figure", "figcaption", "dl", "details", "summary",
];

struct Renderer<'a> {
    base: &'a Url,
    out: String,
}

impl Renderer<'_> {
    /// Walk a container's children, grouping consecutive inline nodes into
    /// implicit paragraphs between block elements.
    fn container(&mut self, el: ElementRef<'_>) {
        let mut inline_buf = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => inline_buf.push_str(&normalize_inline(text)),
                Node::Element(element) => {
                    if is_dropped(element) {
                        continue;
                    }
                    let child_el = ElementRef::wrap(child).expect("element node");
                    if BLOCK_TAGS.contains(&element.name()) {
                        self.flush_paragraph(&mut inline_buf);
                        self.block_element(child_el);
                    } else {
                        inline_buf.push_str(&self.inline(child_el));
                    }
                }
                _ => {}
            }
        }
        self.flush_paragraph(&mut inline_buf);
    }

    fn block_element(&mut self, el: ElementRef<'_>) {
        match el.value().name() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = el.value().name().as_bytes()[1] - b'0';
                let text = collapse_spaces(&self.inline_children(el));
                if !text.is_empty() {
                    self.start_block();
                    for _ in 0..level {
                        self.out.push('#');
                    }
                    self.out.push(' ');
                    self.out.push_str(&text);
                }
            }
            "p" | "figcaption" | "summary" => {
                let text = tidy_paragraph(&self.inline_children(el));
                if !text.is_empty() {
                    self.start_block();
                    self.out.push_str(&text);
                }
            }
            "ul" | "ol" => {
                self.start_block();
                self.list(el, 0);
            }
            "pre" => self.code_block(el),
            "blockquote" => {
                let mut inner = Renderer { base: self.base, out: String::new() };
                inner.container(el);
                let quoted = finalize(inner.out);
                if !quoted.is_empty() {
                    self.start_block();
                    let mut first = true;
                    for line in quoted.lines() {
                        if !first {
                            self.out.push('\n');
                        }
                        first = false;
                        self.out.push_str("> ");
                        self.out.push_str(line);
                    }
                }
            }
            "table" => self.table(el),
            "hr" => {
                self.start_block();
                self.out.push_str("---");
            }
            _ => self.container(el),
        }
    }

    fn list(&mut self, el: ElementRef<'_>, depth: usize) {
        let ordered = el.value().name() == "ol";
        let mut index = 1usize;
        for child in el.children() {
            let Some(item) = ElementRef::wrap(child) else { continue };
            if item.value().name() != "li" || is_dropped(item.value()) {
                continue;
            }

            let mut text = String::new();
            let mut nested: Vec<ElementRef> = Vec::new();
            for part in item.children() {
                match part.value() {
                    Node::Text(t) => text.push_str(&normalize_inline(t)),
                    Node::Element(element) => {
                        if is_dropped(element) {
                            continue;
                        }
                        let part_el = ElementRef::wrap(part).expect("element node");
                        match element.name() {
                            "ul" | "ol" => nested.push(part_el),
                            name if BLOCK_TAGS.contains(&name) => {
                                text.push(' ');
                                text.push_str(&self.inline_children(part_el));
                            }
                            _ => text.push_str(&self.inline(part_el)),
                        }
                    }
                    _ => {}
                }
            }

            if !self.out.ends_with('\n') && !self.out.is_empty() {
                self.out.push('\n');
            }
            for _ in 0..depth {
                self.out.push_str("  ");
            }
            if ordered {
                self.out.push_str(&format!("{index}. "));
                index += 1;
            } else {
                self.out.push_str("- ");
            }
            self.out.push_str(&collapse_spaces(&text));
            for sub in nested {
                self.list(sub, depth + 1);
            }
        }
    }

    fn code_block(&mut self, el: ElementRef<'_>) {
        let language = code_language(el).unwrap_or_default();
        let code = raw_text(el);
        let code = code.trim_matches('\n');
        self.start_block();
        self.out.push_str("```");
        self.out.push_str(&language);
        self.out.push('\n');
        self.out.push_str(code);
        self.out.push_str("\n```");
    }

    fn table(&mut self, el: ElementRef<'_>) {
        let mut rows: Vec<Vec<String>> = Vec::new();
        for node in el.descendants() {
            let Some(tr) = ElementRef::wrap(node) else { continue };
            if tr.value().name() != "tr" {
                continue;
            }
            let mut cells = Vec::new();
            for cell in tr.children() {
                let Some(cell_el) = ElementRef::wrap(cell) else { continue };
                if !matches!(cell_el.value().name(), "td" | "th") {
                    continue;
                }
                let text = collapse_spaces(&self.inline_children(cell_el)).replace('|', "\\|");
                cells.push(text);
            }
            if !cells.is_empty() {
                rows.push(cells);
            }
        }
        if rows.is_empty() {
            return;
        }

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        self.start_block();
        for (i, row) in rows.iter().enumerate() {
            self.out.push('|');
            for c in 0..columns {
                self.out.push(' ');
                self.out.push_str(row.get(c).map(String::as_str).unwrap_or(""));
                self.out.push_str(" |");
            }
            self.out.push('\n');
            if i == 0 {
                self.out.push('|');
                for _ in 0..columns {
                    self.out.push_str(" --- |");
                }
                self.out.push('\n');
            }
        }
        // Drop the trailing newline so block spacing stays uniform.
        self.out.pop();
    }

    /// Inline markdown for one non-block element.
    fn inline(&self, el: ElementRef<'_>) -> String {
        match el.value().name() {
            "a" => {
                let text = collapse_spaces(&self.inline_children(el));
                match self.absolute_href(el.value().attr("href")) {
                    Some(href) => {
                        let label = if text.is_empty() { href.clone() } else { text };
                        format!("[{label}]({href})")
                    }
                    None => text,
                }
            }
            "strong" | "b" => wrap_emphasis(&self.inline_children(el), "**"),
            "em" | "i" => wrap_emphasis(&self.inline_children(el), "*"),
            "code" => {
                let code = raw_text(el);
                let code = code.trim();
                if code.is_empty() {
                    String::new()
                } else {
                    format!("`{code}`")
                }
            }
            "img" => {
                let alt = el.value().attr("alt").unwrap_or("").trim().to_string();
                match self.absolute_href(el.value().attr("src")) {
                    Some(src) => format!("![{alt}]({src})"),
                    None => String::new(),
                }
            }
            "br" => "\n".to_string(),
            _ => self.inline_children(el),
        }
    }

    fn inline_children(&self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => out.push_str(&normalize_inline(text)),
                Node::Element(element) => {
                    if is_dropped(element) {
                        continue;
                    }
                    let child_el = ElementRef::wrap(child).expect("element node");
                    out.push_str(&self.inline(child_el));
                }
                _ => {}
            }
        }
        out
    }

    fn absolute_href(&self, href: Option<&str>) -> Option<String> {
        let href = href?.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            return None;
        }
        let mut resolved = self.base.join(href).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        strip_tracking_params(&mut resolved);
        Some(resolved.to_string())
    }

    fn start_block(&mut self) {
        if self.out.is_empty() {
            return;
        }
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        if self.out.ends_with("\n\n") {
            return;
        }
        if self.out.ends_with('\n') {
            self.out.push('\n');
        } else {
            self.out.push_str("\n\n");
        }
    }

    fn flush_paragraph(&mut self, buf: &mut String) {
        let text = tidy_paragraph(buf);
        if !text.is_empty() {
            self.start_block();
            self.out.push_str(&text);
        }
        buf.clear();
    }
}

/// Collapse runs of whitespace to single spaces while remembering edge
/// whitespace so adjacent inline fragments stay separated.
fn normalize_inline(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return if text.chars().any(char::is_whitespace) { " ".into() } else { String::new() };
    }
    let lead = if text.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if text.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{collapsed}{trail}")
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Paragraph text: collapse space runs but keep explicit line breaks.
fn tidy_paragraph(text: &str) -> String {
    let lines: Vec<String> = text
        .split('\n')
        .map(collapse_spaces)
        .collect();
    let joined = lines.join("\n");
    joined.trim_matches('\n').trim().to_string()
}

fn wrap_emphasis(inner: &str, marker: &str) -> String {
    let inner = collapse_spaces(inner);
    if inner.is_empty() {
        String::new()
    } else {
        format!("{marker}{inner}{marker}")
    }
}

/// All text under an element with original whitespace, for code blocks.
fn raw_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn code_language(pre: ElementRef<'_>) -> Option<String> {
    let mut classes = Vec::new();
    if let Some(class) = pre.value().attr("class") {
        classes.extend(class.split_whitespace().map(str::to_string));
    }
    for child in pre.children() {
        if let Some(el) = ElementRef::wrap(child) {
            if el.value().name() == "code" {
                if let Some(class) = el.value().attr("class") {
                    classes.extend(class.split_whitespace().map(str::to_string));
                }
            }
        }
    }
    classes.iter().find_map(|c| {
        c.strip_prefix("language-")
            .or_else(|| c.strip_prefix("lang-"))
            .map(str::to_string)
    })
}

fn finalize(mut out: String) -> String {
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn md(html: &str) -> String {
        let doc = Html::parse_document(html);
        let base = Url::parse("https://example.com/dir/page").unwrap();
        let sel = scraper::Selector::parse("body").unwrap();
        convert(doc.select(&sel).next().unwrap(), &base)
    }

    #[test]
    fn headings_and_paragraphs() {
        let out = md("<body><h1>Title</h1><p>First para.</p><h2>Sub</h2><p>Second.</p></body>");
        assert_eq!(out, "# Title\n\nFirst para.\n\n## Sub\n\nSecond.");
    }

    #[test]
    fn unordered_and_ordered_lists() {
        let out = md("<body><ul><li>one</li><li>two</li></ul><ol><li>first</li><li>second</li></ol></body>");
        assert_eq!(out, "- one\n- two\n\n1. first\n2. second");
    }

    #[test]
    fn nested_lists_indent() {
        let out = md("<body><ul><li>a<ul><li>a1</li><li>a2</li></ul></li><li>b</li></ul></body>");
        assert_eq!(out, "- a\n  - a1\n  - a2\n- b");
    }

    #[test]
    fn links_become_absolute_with_tracking_stripped() {
        let out = md(r#"<body><p>see <a href="../other?utm_source=x&id=2">docs</a></p></body>"#);
        assert_eq!(out, "see [docs](https://example.com/other?id=2)");
    }

    #[test]
    fn inline_markup() {
        let out = md("<body><p>a <strong>bold</strong> and <em>italic</em> and <code>x = 1</code></p></body>");
        assert_eq!(out, "a **bold** and *italic* and `x = 1`");
    }

    #[test]
    fn fenced_code_blocks_keep_whitespace() {
        let out = md("<body><pre><code class=\"language-rust\">fn main() {\n    run();\n}</code></pre></body>");
        assert_eq!(out, "```rust\nfn main() {\n    run();\n}\n```");
    }

    #[test]
    fn blockquotes_prefix_every_line() {
        let out = md("<body><blockquote><p>first</p><p>second</p></blockquote></body>");
        assert_eq!(out, "> first\n> \n> second");
    }

    #[test]
    fn tables_render_gfm() {
        let out = md(
            "<body><table><tr><th>Name</th><th>Age</th></tr><tr><td>Ada</td><td>36</td></tr></table></body>",
        );
        assert_eq!(out, "| Name | Age |\n| --- | --- |\n| Ada | 36 |");
    }

    #[test]
    fn dropped_subtrees_leave_no_trace() {
        let out = md(
            r#"<body><nav><a href="/home">Home</a></nav><p>content</p><script>track()</script><div class="ad-banner">buy</div></body>"#,
        );
        assert_eq!(out, "content");
    }

    #[test]
    fn images_and_rules() {
        let out = md(r#"<body><p><img src="/logo.png" alt="Logo"></p><hr><p>after</p></body>"#);
        assert_eq!(out, "![Logo](https://example.com/logo.png)\n\n---\n\nafter");
    }

    #[test]
    fn conversion_is_deterministic() {
        let html = r#"<body><h1>T</h1><ul><li>x <a href="/a?b=1&utm_x=2">l</a></li></ul><table><tr><td>c</td></tr></table></body>"#;
        assert_eq!(md(html), md(html));
    }
}
