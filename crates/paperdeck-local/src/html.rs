//! arXiv (LaTeXML) HTML processing.
//!
//! Turns a raw paper page into a displayable fragment plus its metadata,
//! heading outline and a math flag. The shape of the pipeline:
//!
//! - main-content selection via a fallback chain (marker class -> `article`
//!   -> `body` -> whole document). The chain is over-inclusive on purpose:
//!   an empty result is worse than one with minor surrounding noise.
//! - a single serializing clean pass that drops navigation chrome and empty
//!   paragraphs, absolutizes image URLs, tags tables and math for styling,
//!   and assigns heading anchors. The pass is idempotent: cleaning
//!   already-cleaned markup is byte-identical.
//! - math detection checks marker classes first and falls back to text
//!   patterns only when no markers exist. Advisory only.

use crate::textprep::{slugify, truncate_chars};
use paperdeck_core::{Error, Metadata, PaperSummary, ProcessedDocument, Result, Section};
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Marker classes used as structural signals in arXiv's LaTeXML markup.
const MAIN_CONTENT_CLASS: &str = "ltx_page_main";
const TITLE_CLASS: &str = "ltx_title";
const AUTHOR_CLASS: &str = "ltx_author";
const ABSTRACT_CLASS: &str = "ltx_abstract";
const DATES_CLASS: &str = "ltx_dates";
const MATH_CLASS: &str = "ltx_Math";
const EQUATION_CLASSES: [&str; 2] = ["ltx_equation", "ltx_eqn_table"];

/// Class of the fresh container the extracted content is re-rooted under.
const CONTENT_CONTAINER_CLASS: &str = "arxiv-content";

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

fn sel(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::Process(format!("bad selector {selector}: {e}")))
}

fn re(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Process(format!("bad pattern {pattern}: {e}")))
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>()
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Configuration of the cleaning pass.
#[derive(Debug, Clone)]
pub struct CleanConfig {
    /// Tags removed wholesale, subtrees included.
    pub strip_tags: Vec<String>,
    /// Class-marked containers removed wholesale (page chrome).
    pub strip_classes: Vec<String>,
    /// Prefix for image sources that are not already absolute.
    pub asset_base_url: String,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            strip_tags: ["script", "style", "nav", "footer", "header"]
                .map(String::from)
                .to_vec(),
            strip_classes: ["ltx_page_navbar", "ltx_page_footer", "ltx_page_header"]
                .map(String::from)
                .to_vec(),
            asset_base_url: "https://arxiv.org/html/".to_string(),
        }
    }
}

/// The output of one cleaning pass over a content tree.
#[derive(Debug, Clone)]
pub struct CleanedContent {
    /// Cleaned markup, ready for display.
    pub html: String,
    /// Headings in appearance order (title-marker headings excluded).
    pub sections: Vec<Section>,
    /// Flattened text of the kept nodes.
    pub text: String,
    /// Whether any math/equation marker element survived cleaning.
    pub has_math_markers: bool,
}

/// Processes raw arXiv HTML into a [`ProcessedDocument`].
#[derive(Debug, Clone, Default)]
pub struct HtmlProcessor {
    clean: CleanConfig,
}

impl HtmlProcessor {
    pub fn new(clean: CleanConfig) -> Self {
        Self { clean }
    }

    /// Process a raw paper page end to end.
    ///
    /// Never panics past this boundary: anything that goes wrong surfaces as
    /// [`Error::Process`].
    pub fn process(&self, id: &str, html: &str) -> Result<ProcessedDocument> {
        let doc = Html::parse_document(html);
        let metadata = self.extract_metadata(&doc, id)?;
        let main = self.extract_main(&doc)?;
        let cleaned = self.clean_element(main)?;
        let content = format!(
            "<div class=\"{}\">{}</div>",
            CONTENT_CONTAINER_CLASS, cleaned.html
        );
        let has_math = cleaned.has_math_markers || has_math_patterns(&cleaned.text)?;
        Ok(ProcessedDocument {
            id: id.to_string(),
            metadata,
            content,
            sections: cleaned.sections,
            has_math,
        })
    }

    /// Locate the main content container.
    ///
    /// First match wins: marker class, then `article`, then `body`, then the
    /// document itself.
    fn extract_main<'a>(&self, doc: &'a Html) -> Result<ElementRef<'a>> {
        for selector in [format!(".{MAIN_CONTENT_CLASS}"), "article".to_string(), "body".to_string()]
        {
            let parsed = sel(&selector)?;
            if let Some(el) = doc.select(&parsed).next() {
                return Ok(el);
            }
        }
        Ok(doc.root_element())
    }

    /// Pull metadata from the raw tree's marker classes.
    ///
    /// Each field is omitted (not defaulted) when its marker is absent.
    pub fn extract_metadata(&self, doc: &Html, id: &str) -> Result<Metadata> {
        let title = doc
            .select(&sel(&format!(".{TITLE_CLASS}"))?)
            .find(|el| heading_level(el.value().name()).is_some())
            .map(|el| element_text(el).trim().to_string());

        let mut authors = Vec::new();
        for el in doc.select(&sel(&format!(".{AUTHOR_CLASS}"))?) {
            let name = element_text(el).trim().to_string();
            if !name.is_empty() {
                authors.push(name);
            }
        }

        let label = re(r"(?i)^abstract\s*")?;
        let abstract_text = doc
            .select(&sel(&format!(".{ABSTRACT_CLASS}"))?)
            .next()
            .map(|el| {
                let text = element_text(el);
                label.replace(text.trim(), "").trim().to_string()
            });

        let date = doc
            .select(&sel(&format!(".{DATES_CLASS}"))?)
            .next()
            .map(|el| element_text(el).trim().to_string());

        Ok(Metadata {
            id: id.to_string(),
            title,
            authors,
            abstract_text,
            date,
        })
    }

    /// Clean a standalone markup fragment.
    ///
    /// This is the same pass `process` runs after main-content selection;
    /// running it on its own output is byte-identical.
    pub fn clean_fragment(&self, html: &str) -> Result<CleanedContent> {
        let doc = Html::parse_fragment(html);
        self.clean_element(doc.root_element())
    }

    /// Clean the children of `el` into a fresh fragment.
    fn clean_element(&self, el: ElementRef) -> Result<CleanedContent> {
        let mut walker = CleanWalker {
            cfg: &self.clean,
            html: String::new(),
            text: String::new(),
            sections: Vec::new(),
            has_math_markers: false,
        };
        walker.walk_children(el);
        Ok(CleanedContent {
            html: walker.html,
            sections: walker.sections,
            text: walker.text,
            has_math_markers: walker.has_math_markers,
        })
    }

    /// Derive the list-view summary of a processed paper.
    ///
    /// An `Err` input passes through verbatim: a failed extraction stays the
    /// same failure for the list consumer.
    pub fn create_paper_summary(
        &self,
        processed: Result<ProcessedDocument>,
    ) -> Result<PaperSummary> {
        let doc = processed?;

        let fragment = Html::parse_fragment(&doc.content);
        let text = element_text(fragment.root_element());
        let sentences: Vec<&str> = text
            .split(['.', '!', '?'])
            .filter(|s| !s.is_empty())
            .collect();
        let joined = sentences
            .iter()
            .take(3)
            .map(|s| s.trim())
            .collect::<Vec<_>>()
            .join(". ");
        let (mut preview, _clipped) = truncate_chars(&joined, 300);
        // Ellipsis is length-comparison-based: the 3-sentence cap alone is
        // enough to earn one.
        if preview.chars().count() < text.chars().count() {
            preview.push_str("...");
        }

        Ok(PaperSummary {
            id: doc.id,
            title: doc.metadata.title,
            authors: doc.metadata.authors,
            abstract_text: doc.metadata.abstract_text,
            preview,
            sections: doc.sections,
            has_math: doc.has_math,
            date: doc.metadata.date,
        })
    }
}

/// Text-pattern fallback for math detection: inline dollar math, a
/// backslash command token, or a `\begin{...}` environment opener.
fn has_math_patterns(text: &str) -> Result<bool> {
    for pattern in [r"\$.*?\$", r"\\[a-zA-Z]+", r"\\begin\{.*?\}"] {
        if re(pattern)?.is_match(text) {
            return Ok(true);
        }
    }
    Ok(false)
}

struct CleanWalker<'c> {
    cfg: &'c CleanConfig,
    html: String,
    text: String,
    sections: Vec<Section>,
    has_math_markers: bool,
}

impl CleanWalker<'_> {
    fn walk_children(&mut self, el: ElementRef) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    self.text.push_str(t);
                    escape_text(t, &mut self.html);
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.emit_element(child_el);
                    }
                }
                // Comments, doctypes and processing instructions carry no
                // display content.
                _ => {}
            }
        }
    }

    fn emit_element(&mut self, el: ElementRef) {
        let name = el.value().name();
        if self.cfg.strip_tags.iter().any(|t| t == name) {
            return;
        }

        let source_classes: Vec<String> = el
            .value()
            .attr("class")
            .map(|c| c.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        if source_classes
            .iter()
            .any(|c| self.cfg.strip_classes.iter().any(|s| s == c))
        {
            return;
        }

        // Empty paragraphs are display noise left behind by the source
        // converter.
        if name == "p" && el.text().all(|t| t.trim().is_empty()) {
            return;
        }

        // Sorted attribute order keeps the serialization deterministic and
        // the pass idempotent.
        let mut attrs: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in el.value().attrs() {
            attrs.insert(k.to_string(), v.to_string());
        }

        let mut classes = source_classes;
        if name == "table" {
            for extra in ["table", "table-responsive"] {
                if !classes.iter().any(|c| c == extra) {
                    classes.push(extra.to_string());
                }
            }
        }
        if name == "math" && !classes.iter().any(|c| c == MATH_CLASS) {
            classes.push(MATH_CLASS.to_string());
        }
        if classes
            .iter()
            .any(|c| c == MATH_CLASS || EQUATION_CLASSES.contains(&c.as_str()))
        {
            self.has_math_markers = true;
        }
        if !classes.is_empty() {
            attrs.insert("class".to_string(), classes.join(" "));
        }

        if name == "img" {
            if let Some(src) = attrs.get("src") {
                if !src.starts_with("http") {
                    let absolute = format!("{}{}", self.cfg.asset_base_url, src);
                    attrs.insert("src".to_string(), absolute);
                }
            }
        }

        if let Some(level) = heading_level(name) {
            let title = element_text(el).trim().to_string();
            // Headings carrying the title marker class are document
            // metadata, not outline entries.
            if !title.is_empty() && !classes.iter().any(|c| c == TITLE_CLASS) {
                let id = attrs
                    .get("id")
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| slugify(&title));
                attrs.insert("id".to_string(), id.clone());
                self.sections.push(Section { id, title, level });
            }
        }

        self.html.push('<');
        self.html.push_str(name);
        for (k, v) in &attrs {
            self.html.push(' ');
            self.html.push_str(k);
            self.html.push_str("=\"");
            escape_attr(v, &mut self.html);
            self.html.push('"');
        }
        self.html.push('>');

        if VOID_TAGS.contains(&name) {
            return;
        }
        self.walk_children(el);
        self.html.push_str("</");
        self.html.push_str(name);
        self.html.push('>');
    }
}

fn escape_text(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> HtmlProcessor {
        HtmlProcessor::default()
    }

    const SAMPLE: &str = r#"
    <html>
      <body>
        <div class="ltx_page_main">
          <h1 class="ltx_title">Sample Paper Title</h1>
          <div class="ltx_authors">
            <span class="ltx_author">Author One</span>
            <span class="ltx_author">Author Two</span>
          </div>
          <div class="ltx_abstract">Abstract This is a sample abstract.</div>
          <script>console.log('noise');</script>
          <section>
            <h2>Introduction &amp; Background</h2>
            <p>This is the introduction section with inline math $x^2$.</p>
            <img src="images/plot.png" />
            <table><tr><td>Data</td></tr></table>
          </section>
        </div>
      </body>
    </html>
    "#;

    #[test]
    fn process_cleans_and_extracts_metadata() {
        let doc = processor().process("1234.5678", SAMPLE).unwrap();

        assert_eq!(doc.id, "1234.5678");
        assert_eq!(doc.metadata.title.as_deref(), Some("Sample Paper Title"));
        assert_eq!(doc.metadata.authors, vec!["Author One", "Author Two"]);
        assert_eq!(
            doc.metadata.abstract_text.as_deref(),
            Some("This is a sample abstract.")
        );

        assert!(!doc.content.contains("<script"));
        assert!(!doc.content.contains("console.log"));
        assert!(doc
            .content
            .contains("src=\"https://arxiv.org/html/images/plot.png\""));
        assert!(doc.content.contains("class=\"table table-responsive\""));
        assert!(doc.content.starts_with("<div class=\"arxiv-content\">"));

        let intro = doc
            .sections
            .iter()
            .find(|s| s.title == "Introduction & Background")
            .expect("intro section");
        assert_eq!(intro.id, "introduction-background");
        assert_eq!(intro.level, 2);
        assert!(doc.has_math, "inline $x^2$ should trip the pattern fallback");
    }

    #[test]
    fn round_trip_sample_document() {
        let html = r#"<div class="ltx_page_main"><h1 class="ltx_title">T</h1><div class="ltx_abstract">Abstract X.</div><section><h2>Intro &amp; Setup</h2><p>Body.</p></section></div>"#;
        let doc = processor().process("2401.0001", html).unwrap();

        assert_eq!(doc.metadata.title.as_deref(), Some("T"));
        assert_eq!(doc.metadata.abstract_text.as_deref(), Some("X."));
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].title, "Intro & Setup");
        assert_eq!(doc.sections[0].id, "intro-setup");
        assert!(!doc.has_math);
        // The assigned id lands on the displayed heading so anchors resolve.
        assert!(doc.content.contains("<h2 id=\"intro-setup\">"));
    }

    #[test]
    fn clean_is_idempotent() {
        let doc = processor().process("1234.5678", SAMPLE).unwrap();
        let once = doc.content;
        let again = processor().clean_fragment(&once).unwrap();
        assert_eq!(again.html, once);
        let thrice = processor().clean_fragment(&again.html).unwrap();
        assert_eq!(thrice.html, once);
    }

    #[test]
    fn clean_does_not_reprefix_absolute_image_urls() {
        let html = r#"<img src="https://arxiv.org/html/2401.0001/fig.png">"#;
        let cleaned = processor().clean_fragment(html).unwrap();
        assert!(cleaned
            .html
            .contains("src=\"https://arxiv.org/html/2401.0001/fig.png\""));
        assert!(!cleaned.html.contains("https://arxiv.org/html/https"));
    }

    #[test]
    fn extraction_falls_back_to_article_then_body() {
        let article = r#"<html><body><nav>menu</nav><article><p>Article body text.</p></article></body></html>"#;
        let doc = processor().process("a1", article).unwrap();
        assert!(doc.content.contains("Article body text."));
        assert!(
            !doc.content.contains("menu"),
            "body-level nav must not leak into an article extraction"
        );

        let body_only = r#"<html><body><p>Just a body.</p></body></html>"#;
        let doc = processor().process("a2", body_only).unwrap();
        assert!(doc.content.contains("Just a body."));
    }

    #[test]
    fn metadata_fields_are_omitted_when_markers_are_absent() {
        let doc = processor()
            .process("m1", "<html><body><p>No markers here at all.</p></body></html>")
            .unwrap();
        assert_eq!(doc.metadata.title, None);
        assert_eq!(doc.metadata.abstract_text, None);
        assert_eq!(doc.metadata.date, None);
        assert!(doc.metadata.authors.is_empty());
    }

    #[test]
    fn duplicate_heading_titles_keep_duplicate_ids() {
        let html = r#"<div class="ltx_page_main"><h2>Intro</h2><p>One paragraph of text.</p><h2>Intro</h2></div>"#;
        let doc = processor().process("d1", html).unwrap();
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].id, "intro");
        assert_eq!(doc.sections[1].id, "intro");
    }

    #[test]
    fn existing_heading_ids_are_preserved() {
        let html = r#"<div class="ltx_page_main"><h3 id="S1.2">Methods</h3></div>"#;
        let doc = processor().process("d2", html).unwrap();
        assert_eq!(doc.sections[0].id, "S1.2");
        assert_eq!(doc.sections[0].level, 3);
    }

    #[test]
    fn math_detection_uses_markers_then_patterns() {
        let marker = r#"<div class="ltx_page_main"><span class="ltx_Math">x</span></div>"#;
        assert!(processor().process("m1", marker).unwrap().has_math);

        let equation = r#"<div class="ltx_page_main"><div class="ltx_equation">y</div></div>"#;
        assert!(processor().process("m2", equation).unwrap().has_math);

        let pattern = r#"<div class="ltx_page_main"><p>We solve \begin{equation} here in plain text.</p></div>"#;
        assert!(processor().process("m3", pattern).unwrap().has_math);

        let none = r#"<div class="ltx_page_main"><p>No mathematics in this text at all.</p></div>"#;
        assert!(!processor().process("m4", none).unwrap().has_math);
    }

    #[test]
    fn math_elements_gain_the_marker_class_once() {
        let html = r#"<div class="ltx_page_main"><math><mi>x</mi></math></div>"#;
        let doc = processor().process("m5", html).unwrap();
        assert!(doc.content.contains("<math class=\"ltx_Math\">"));
        let again = processor().clean_fragment(&doc.content).unwrap();
        assert_eq!(again.html.matches("ltx_Math").count(), 1);
    }

    #[test]
    fn empty_paragraphs_are_removed() {
        let html = r#"<div class="ltx_page_main"><p>   </p><p></p><p>Kept paragraph.</p></div>"#;
        let doc = processor().process("p1", html).unwrap();
        assert_eq!(doc.content.matches("<p>").count(), 1);
        assert!(doc.content.contains("Kept paragraph."));
    }

    #[test]
    fn navigation_chrome_is_stripped_by_class() {
        let html = r#"<div class="ltx_page_main"><div class="ltx_page_navbar"><a href="/">Home</a></div><p>Paper text.</p></div>"#;
        let doc = processor().process("n1", html).unwrap();
        assert!(!doc.content.contains("Home"));
        assert!(doc.content.contains("Paper text."));
    }

    #[test]
    fn summary_previews_first_three_sentences_with_ellipsis() {
        let html = r#"
        <div class="ltx_page_main">
          <h1 class="ltx_title">Deep Learning Advances</h1>
          <div class="ltx_authors"><span class="ltx_author">A. Researcher</span></div>
          <div class="ltx_abstract">Abstract This work explores advances.</div>
          <section>
            <h2>Overview</h2>
            <p>First sentence. Second sentence offers details! Third sentence keeps going? Fourth sentence adds more context.</p>
          </section>
        </div>
        "#;
        let processed = processor().process("0501.0001", html);
        let summary = processor().create_paper_summary(processed).unwrap();

        assert_eq!(summary.id, "0501.0001");
        assert_eq!(summary.title.as_deref(), Some("Deep Learning Advances"));
        assert_eq!(summary.authors, vec!["A. Researcher"]);
        assert!(summary.sections.iter().any(|s| s.title == "Overview"));
        assert!(!summary.has_math);
        assert!(summary.preview.contains("First sentence"));
        assert!(summary.preview.ends_with("..."));
        assert!(!summary.preview.contains("Fourth sentence"));
    }

    #[test]
    fn summary_passes_failures_through_verbatim() {
        let err = Err(Error::Process("boom".to_string()));
        let out = processor().create_paper_summary(err);
        match out {
            Err(Error::Process(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected the failure to pass through, got {other:?}"),
        }
    }
}
