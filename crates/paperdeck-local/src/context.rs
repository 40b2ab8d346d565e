//! Paper-context assembly for the chat assistant.
//!
//! Orchestrates the paper-repository collaborator (metadata lookup, HTML
//! availability, HTML fetch), reduces the cleaned markup to bounded plain
//! text plus a reference list, and builds the deterministic prompt a chat
//! provider consumes. All the heavy lifting after the network calls is pure
//! computation on owned inputs.

use crate::html::HtmlProcessor;
use crate::textprep::truncate_chars;
use paperdeck_core::{
    Error, PaperContext, PaperSource, Result, Section, CONTEXT_CONTENT_MAX_CHARS,
    CONTEXT_MAX_REFERENCES, CONTEXT_MAX_SECTIONS, RELEVANT_CONTENT_MAX_CHARS,
};
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;

fn sel(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::Process(format!("bad selector {selector}: {e}")))
}

fn stage_err(stage: &str, id: &str, e: Error) -> Error {
    match e {
        Error::NotFound(msg) => Error::NotFound(format!("{stage} failed for {id}: {msg}")),
        Error::Process(msg) => Error::Process(format!("{stage} failed for {id}: {msg}")),
        other => Error::Fetch(format!("{stage} failed for {id}: {other}")),
    }
}

/// Builds [`PaperContext`] values from a [`PaperSource`] collaborator.
pub struct ContextBuilder<S> {
    source: S,
    processor: HtmlProcessor,
}

impl<S: PaperSource> ContextBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            processor: HtmlProcessor::default(),
        }
    }

    /// Build the bounded chat context for one paper.
    ///
    /// A paper without an HTML rendering is not an error: the abstract
    /// becomes the content and the section/reference lists stay empty.
    /// Everything else is wrapped with the failing stage and paper id so the
    /// caller can log and decide retry policy.
    pub async fn extract_paper_context(&self, id: &str) -> Result<PaperContext> {
        let details = self
            .source
            .paper_details(id)
            .await
            .map_err(|e| stage_err("paper metadata lookup", id, e))?;

        let mut content_html: Option<String> = None;
        let mut sections: Vec<Section> = Vec::new();
        let available = self
            .source
            .html_available(id)
            .await
            .map_err(|e| stage_err("html availability check", id, e))?;
        if available {
            let html = self
                .source
                .fetch_html(id)
                .await
                .map_err(|e| stage_err("html fetch", id, e))?;
            let processed = self
                .processor
                .process(id, &html)
                .map_err(|e| stage_err("html processing", id, e))?;
            sections = processed.sections;
            content_html = Some(processed.content);
        }

        let (content, references) = match content_html {
            Some(html) => (extract_text(&html), extract_references(&html)?),
            None => (details.abstract_text.clone(), Vec::new()),
        };
        // Bound the carried text before any relevance selection sees it.
        let (content, _clipped) = truncate_chars(&content, CONTEXT_CONTENT_MAX_CHARS);

        Ok(PaperContext {
            id: id.to_string(),
            title: details.title,
            authors: details.authors,
            abstract_text: details.abstract_text,
            content,
            sections,
            references,
        })
    }
}

/// Flatten markup to whitespace-collapsed plain text, dropping script and
/// style subtrees.
pub fn extract_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let doc = Html::parse_fragment(html);
    let mut raw = String::new();
    collect_text(doc.root_element(), &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(el: ElementRef, out: &mut String) {
    if matches!(el.value().name(), "script" | "style") {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Collect up to [`CONTEXT_MAX_REFERENCES`] bibliography entries.
///
/// Containers are `section`/`div` elements whose class matches a
/// case-insensitive `ref`/`bib` substring; items are their `li`/`div`/`p`
/// descendants with more than 20 characters of text (a crude floor that
/// drops bare "[1]" markers).
pub fn extract_references(html: &str) -> Result<Vec<String>> {
    if html.trim().is_empty() {
        return Ok(Vec::new());
    }
    let class_probe =
        Regex::new(r"(?i)ref|bib").map_err(|e| Error::Process(format!("bad pattern: {e}")))?;
    let doc = Html::parse_fragment(html);
    let containers = sel("section, div")?;
    let items = sel("li, div, p")?;

    let mut references = Vec::new();
    for container in doc.select(&containers) {
        let Some(class) = container.value().attr("class") else {
            continue;
        };
        if !class_probe.is_match(class) {
            continue;
        }
        for item in container.select(&items) {
            let text: String = item.text().collect();
            let text = text.trim();
            if text.chars().count() > 20 {
                references.push(text.to_string());
            }
        }
    }
    references.truncate(CONTEXT_MAX_REFERENCES);
    Ok(references)
}

/// Select the content sentences most relevant to a query, bounded to
/// [`RELEVANT_CONTENT_MAX_CHARS`] characters of assembled output.
///
/// Sentence splitting is period-naive and keyword matching is
/// substring-based; this is a keyword-density heuristic, not retrieval, and
/// is acceptable only because the whole context is already bounded.
pub fn extract_relevant_content(content: &str, query: &str) -> String {
    select_relevant(content, query, RELEVANT_CONTENT_MAX_CHARS)
}

fn select_relevant(content: &str, query: &str, budget: usize) -> String {
    if content.trim().is_empty() || query.trim().is_empty() {
        return String::new();
    }
    let keywords: BTreeSet<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();

    let mut ranked: Vec<(&str, usize)> = Vec::new();
    for sentence in content.split('.') {
        let sentence = sentence.trim();
        if sentence.chars().count() < 20 {
            continue;
        }
        let lower = sentence.to_lowercase();
        let matches = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        if matches > 0 {
            ranked.push((sentence, matches));
        }
    }
    // Stable sort: ties keep their original relative order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut selected: Vec<&str> = Vec::new();
    let mut assembled = 1usize; // trailing period
    for (sentence, _) in ranked {
        let len = sentence.chars().count();
        let cost = if selected.is_empty() { len } else { len + 2 };
        if assembled + cost > budget {
            break;
        }
        selected.push(sentence);
        assembled += cost;
    }
    if selected.is_empty() {
        String::new()
    } else {
        format!("{}.", selected.join(". "))
    }
}

/// Assemble the chat prompt for one paper + question.
///
/// Pure string composition. The block order (header, structure, relevant
/// content, question, instructions) is part of the output contract: persisted
/// conversations reference prior outputs.
pub fn prepare_context_prompt(paper: &PaperContext, user_query: &str) -> String {
    let mut context = format!(
        "Paper: {}\nAuthors: {}\nArXiv ID: {}\n\nAbstract:\n{}\n\n",
        paper.title,
        paper.authors.join(", "),
        paper.id,
        paper.abstract_text,
    );

    if !paper.sections.is_empty() {
        context.push_str("Paper Structure:\n");
        for (i, section) in paper.sections.iter().take(CONTEXT_MAX_SECTIONS).enumerate() {
            context.push_str(&format!("{}. {}\n", i + 1, section.title));
        }
        context.push('\n');
    }

    let relevant = extract_relevant_content(&paper.content, user_query);
    if !relevant.is_empty() {
        context.push_str(&format!("Relevant Content:\n{relevant}\n\n"));
    }

    context.push_str(&format!("User Question: {user_query}\n\n"));
    context.push_str(
        "Instructions:\n\
         - Answer based on the provided paper content\n\
         - Be specific and cite relevant sections when possible\n\
         - If the paper doesn't contain information to answer the question, say so clearly\n\
         - Use technical language appropriate for academic discussion\n\
         - Format mathematical expressions clearly if relevant\n",
    );
    context
}
