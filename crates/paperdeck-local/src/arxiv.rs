//! arXiv client: Atom search, per-id lookup, rendered-HTML probing.
//!
//! Notes:
//! - ArXiv exposes an Atom API at `https://export.arxiv.org/api/query` and
//!   rendered paper HTML under `https://arxiv.org/html/<id>`.
//! - Parsing stays deliberately minimal and resilient; a malformed tail of
//!   the feed degrades to a partial result with a warning, not an error.
//! - Endpoints are constructor-injected so tests can point the client at a
//!   local fixture server.

use crate::textprep::norm_ws;
use paperdeck_core::{Error, PaperRecord, PaperSource, Result};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_API_ENDPOINT: &str = "https://export.arxiv.org/api/query";
const DEFAULT_HTML_BASE: &str = "https://arxiv.org/html";
const MAX_RESULTS_LIMIT: usize = 100;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ArxivSearchResponse {
    pub query: String,
    pub start: usize,
    pub total_results: Option<u64>,
    pub papers: Vec<PaperRecord>,
    pub warnings: Vec<&'static str>,
}

/// Build the arXiv query expression for a set of user keywords.
///
/// Every keyword is searched across title, abstract and all fields, and the
/// keywords are AND-combined, so adding a keyword narrows the result set.
pub fn build_search_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| format!("(ti:{k} OR abs:{k} OR all:{k})"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn arxiv_id_from_url(url: &str) -> Option<String> {
    // Entry ids look like http://arxiv.org/abs/0805.3415v1
    let u = url.trim();
    let i = u.rfind("/abs/")?;
    let id = u[i + "/abs/".len()..].trim_matches('/').trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn attr_map(e: &quick_xml::events::BytesStart<'_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for a in e.attributes().flatten() {
        let k = String::from_utf8_lossy(a.key.as_ref()).to_string();
        let v = a.unescape_value().map(|v| v.to_string()).unwrap_or_default();
        out.insert(k, v);
    }
    out
}

#[derive(Default)]
struct EntryAcc {
    id_url: String,
    title: String,
    summary: String,
    published: Option<String>,
    updated: Option<String>,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_url: Option<String>,
    in_author: bool,
    text: String,
}

fn parse_atom(body: &str, html_base: &str) -> (Option<u64>, Vec<PaperRecord>, Vec<&'static str>) {
    let mut warnings: Vec<&'static str> = Vec::new();
    let mut total_results: Option<u64> = None;
    let mut papers: Vec<PaperRecord> = Vec::new();

    // quick-xml because Atom namespaces make regex parsing brittle.
    let mut reader = quick_xml::Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut in_entry = false;
    let mut top_tag = String::new();
    let mut top_text = String::new();
    let mut cur = EntryAcc::default();

    fn element_attrs(cur: &mut EntryAcc, name: &str, attrs: BTreeMap<String, String>) {
        if name.ends_with("category") {
            if let Some(term) = attrs.get("term").filter(|v| !v.trim().is_empty()) {
                cur.categories.push(term.clone());
            }
        } else if name.ends_with("link")
            && attrs.get("rel").map(String::as_str) == Some("related")
            && attrs.get("type").map(String::as_str) == Some("application/pdf")
        {
            cur.pdf_url = attrs.get("href").cloned();
        }
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name.ends_with("entry") {
                    in_entry = true;
                    cur = EntryAcc::default();
                } else if in_entry {
                    if name.ends_with("author") {
                        cur.in_author = true;
                    }
                    element_attrs(&mut cur, &name, attr_map(&e));
                } else {
                    top_tag = name;
                    top_text.clear();
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if in_entry {
                    element_attrs(&mut cur, &name, attr_map(&e));
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                let txt = t.unescape().map(|t| t.to_string()).unwrap_or_default();
                if in_entry {
                    cur.text.push_str(&txt);
                } else {
                    top_text.push_str(&txt);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if in_entry {
                    let txt = norm_ws(&cur.text);
                    if name.ends_with("id") {
                        cur.id_url = txt;
                    } else if name.ends_with("title") {
                        cur.title = txt;
                    } else if name.ends_with("summary") {
                        cur.summary = txt;
                    } else if name.ends_with("published") {
                        cur.published = (!txt.is_empty()).then_some(txt);
                    } else if name.ends_with("updated") {
                        cur.updated = (!txt.is_empty()).then_some(txt);
                    } else if cur.in_author && name.ends_with("name") && !txt.is_empty() {
                        cur.authors.push(txt);
                    }
                    cur.text.clear();

                    if name.ends_with("author") {
                        cur.in_author = false;
                    }
                    if name.ends_with("entry") {
                        in_entry = false;
                        let Some(id) = arxiv_id_from_url(&cur.id_url) else {
                            warnings.push("arxiv_entry_without_id_skipped");
                            continue;
                        };
                        let pdf_url = cur
                            .pdf_url
                            .take()
                            .or_else(|| Some(format!("https://arxiv.org/pdf/{id}.pdf")));
                        papers.push(PaperRecord {
                            html_url: Some(format!("{}/{}", html_base.trim_end_matches('/'), id)),
                            id,
                            title: std::mem::take(&mut cur.title),
                            authors: std::mem::take(&mut cur.authors),
                            abstract_text: std::mem::take(&mut cur.summary),
                            categories: std::mem::take(&mut cur.categories),
                            published: cur.published.take(),
                            updated: cur.updated.take(),
                            pdf_url,
                        });
                    }
                } else if top_tag.ends_with("totalResults") && name.ends_with("totalResults") {
                    if let Ok(n) = top_text.trim().parse::<u64>() {
                        total_results = Some(n);
                    }
                    top_tag.clear();
                }
            }
            Err(_) => {
                warnings.push("arxiv_feed_parse_failed_partial");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    (total_results, papers, warnings)
}

/// arXiv repository client. Implements [`PaperSource`].
#[derive(Debug, Clone)]
pub struct ArxivClient {
    http: reqwest::Client,
    api_endpoint: url::Url,
    html_base: url::Url,
    timeout: Duration,
}

impl ArxivClient {
    pub fn new(http: reqwest::Client) -> Result<Self> {
        Self::with_endpoints(http, DEFAULT_API_ENDPOINT, DEFAULT_HTML_BASE)
    }

    /// Construct against explicit endpoints (fixture servers in tests).
    pub fn with_endpoints(http: reqwest::Client, api: &str, html_base: &str) -> Result<Self> {
        Ok(Self {
            http,
            api_endpoint: url::Url::parse(api).map_err(|e| Error::Fetch(e.to_string()))?,
            html_base: url::Url::parse(html_base).map_err(|e| Error::Fetch(e.to_string()))?,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rendered-HTML URL for one paper.
    pub fn html_url(&self, id: &str) -> String {
        format!("{}/{}", self.html_base.as_str().trim_end_matches('/'), id.trim())
    }

    /// Keyword search, newest submissions first.
    pub async fn search(
        &self,
        keywords: &[String],
        max_results: usize,
        start: usize,
    ) -> Result<ArxivSearchResponse> {
        let search_query = build_search_query(keywords);
        if search_query.is_empty() {
            return Err(Error::InvalidId("no search keywords provided".to_string()));
        }
        let max_results = max_results.clamp(1, MAX_RESULTS_LIMIT);

        let mut url = self.api_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("search_query", &search_query)
            .append_pair("start", &start.to_string())
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending");

        let body = self.get_text(url).await?;
        let (total_results, papers, warnings) = parse_atom(&body, self.html_base.as_str());
        Ok(ArxivSearchResponse {
            query: search_query,
            start,
            total_results,
            papers,
            warnings,
        })
    }

    /// Look one paper up by its arXiv id.
    pub async fn paper_details(&self, id: &str) -> Result<PaperRecord> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidId("empty paper id".to_string()));
        }
        let mut url = self.api_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("id_list", id)
            .append_pair("max_results", "1");

        let body = self.get_text(url).await?;
        let (_total, papers, _warnings) = parse_atom(&body, self.html_base.as_str());
        papers
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Probe whether a rendered HTML version exists.
    ///
    /// Availability is advisory: request failures count as "unavailable".
    pub async fn html_available(&self, id: &str) -> bool {
        let resp = self
            .http
            .head(self.html_url(id))
            .timeout(self.timeout)
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().as_u16() == 200)
    }

    /// Fetch the rendered HTML page for one paper.
    pub async fn fetch_html(&self, id: &str) -> Result<String> {
        let url = self.html_url(id);
        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(Error::NotFound(format!("no html rendering at {url}")));
        }
        if !status.is_success() {
            return Err(Error::Fetch(format!("html fetch failed: HTTP {status}")));
        }
        resp.text().await.map_err(|e| Error::Fetch(e.to_string()))
    }

    async fn get_text(&self, url: url::Url) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("arxiv query failed: HTTP {status}")));
        }
        resp.text().await.map_err(|e| Error::Fetch(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PaperSource for ArxivClient {
    async fn paper_details(&self, id: &str) -> Result<PaperRecord> {
        ArxivClient::paper_details(self, id).await
    }

    async fn html_available(&self, id: &str) -> Result<bool> {
        Ok(ArxivClient::html_available(self, id).await)
    }

    async fn fetch_html(&self, id: &str) -> Result<String> {
        ArxivClient::fetch_html(self, id).await
    }
}
