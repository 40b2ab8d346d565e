use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid paper id: {0}")]
    InvalidId(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("paper not found: {0}")]
    NotFound(String),
    #[error("processing failed: {0}")]
    Process(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Hard ceiling on the paper text carried inside a [`PaperContext`].
///
/// Applied when the context is built, before any relevance selection runs,
/// and again by [`PaperContext::to_context_string`] for the displayed form.
pub const CONTEXT_CONTENT_MAX_CHARS: usize = 8_000;

/// Character budget for the relevance-selected content block of a prompt.
pub const RELEVANT_CONTENT_MAX_CHARS: usize = 3_000;

/// Maximum number of sections listed in AI-facing context strings.
pub const CONTEXT_MAX_SECTIONS: usize = 10;

/// Maximum number of extracted bibliography entries carried in a context.
pub const CONTEXT_MAX_REFERENCES: usize = 20;

/// Paper metadata pulled from structural markers in the paper HTML.
///
/// Fields absent in the source markup stay `None`; an empty string always
/// means "found but empty", never "missing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Document order is preserved.
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// One entry of a paper's heading outline.
///
/// `id` is the anchor the displayed content carries for this heading. Ids are
/// not deduplicated: duplicate heading text yields duplicate ids, in source
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    /// Heading rank, h1 -> 1 ... h6 -> 6.
    pub level: u8,
}

/// A paper's HTML after extraction and cleaning.
///
/// `content` is a self-contained markup fragment: asset URLs are absolute and
/// the only presentation classes used are `table table-responsive` and the
/// math marker class. `sections` follows heading appearance order in
/// `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub id: String,
    pub metadata: Metadata,
    pub content: String,
    pub sections: Vec<Section>,
    /// Best-effort: marker elements force `true`; a text-pattern fallback may
    /// still flag documents without markers.
    pub has_math: bool,
}

/// List-view preview of a processed paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    pub preview: String,
    pub sections: Vec<Section>,
    pub has_math: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A paper record as reported by the search/metadata collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

/// Everything a chat consumer needs to ground a conversation in one paper.
///
/// Immutable once built; consumed per chat turn, not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperContext {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Plain paper text, capped at [`CONTEXT_CONTENT_MAX_CHARS`].
    pub content: String,
    pub sections: Vec<Section>,
    /// Bounded to [`CONTEXT_MAX_REFERENCES`] entries.
    pub references: Vec<String>,
}

impl PaperContext {
    /// Render the context as the fixed header block fed to chat providers.
    ///
    /// The displayed content is hard-truncated at
    /// [`CONTEXT_CONTENT_MAX_CHARS`] regardless of how the context was built.
    pub fn to_context_string(&self) -> String {
        let mut shown: String = self
            .content
            .chars()
            .take(CONTEXT_CONTENT_MAX_CHARS)
            .collect();
        if shown.chars().count() < self.content.chars().count() {
            shown.push_str("...");
        }

        let mut out = format!(
            "Paper Information:\nTitle: {}\nAuthors: {}\nArXiv ID: {}\n\nAbstract:\n{}\n\nContent:\n{}\n",
            self.title,
            self.authors.join(", "),
            self.id,
            self.abstract_text,
            shown,
        );
        if !self.sections.is_empty() {
            out.push_str("\nSections:\n");
            for section in self.sections.iter().take(CONTEXT_MAX_SECTIONS) {
                out.push_str(&format!("- {}\n", section.title));
            }
        }
        out
    }
}

/// Collaborator contract for the paper repository (metadata + HTML).
///
/// Implementations own their network policy (timeouts, retries); this core
/// treats results as already-available inputs or propagates the failure.
#[async_trait::async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch the repository's metadata record for one paper.
    ///
    /// Returns [`Error::NotFound`] when the repository has no such paper.
    async fn paper_details(&self, id: &str) -> Result<PaperRecord>;

    /// Whether a rendered-HTML version of the paper is offered.
    ///
    /// `false` is not an error; callers fall back to abstract-only content.
    async fn html_available(&self, id: &str) -> Result<bool>;

    /// Fetch the raw HTML document for one paper.
    async fn fetch_html(&self, id: &str) -> Result<String>;
}
