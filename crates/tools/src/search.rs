//! DuckDuckGo HTML search: shared by the web and video search tools.
//!
//! The HTML endpoint needs no API key. Result links and snippets are pulled
//! out of the markup with two patterns; links come back wrapped in a
//! `/l/?uddg=<target>` redirect which is unwrapped here.

use cortex_core::error::ToolError;
use regex_lite::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{debug, error};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

struct Patterns {
    link: Regex,
    snippet: Regex,
    tags: Regex,
    whitespace: Regex,
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!(pattern, error = %e, "Search pattern failed to compile"))
        .ok()
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| {
    Some(Patterns {
        link: compile(r#"class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)?,
        snippet: compile(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#)?,
        tags: compile(r"<[^>]+>")?,
        whitespace: compile(r"\s+")?,
    })
});

fn patterns() -> Result<&'static Patterns, ToolError> {
    PATTERNS.as_ref().ok_or_else(|| ToolError::ExecutionFailed {
        tool_name: "web_search".into(),
        reason: "result parser unavailable".into(),
    })
}

/// Strip tags, collapse whitespace, decode the common entities.
fn html_to_text(p: &Patterns, html: &str) -> String {
    let text = p.tags.replace_all(html, " ");
    let text = p.whitespace.replace_all(&text, " ");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Unwrap DuckDuckGo's `uddg=` redirect links.
fn clean_url(href: &str) -> String {
    let href = href.replace("&amp;", "&");
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.clone()
    };

    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(href)
}

/// Parse result links and snippets out of a DuckDuckGo HTML page.
///
/// A snippet belongs to the link before it and must appear before the next
/// link, so a result without one leaves the others in place.
pub fn parse_results(html: &str) -> Result<Vec<SearchHit>, ToolError> {
    let p = patterns()?;
    let links: Vec<_> = p.link.captures_iter(html).collect();

    Ok(links
        .iter()
        .enumerate()
        .filter_map(|(i, cap)| {
            let whole = cap.get(0)?;
            let block_end = links
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |m| m.start());
            let snippet = p
                .snippet
                .captures(&html[whole.end()..block_end])
                .and_then(|c| c.get(1))
                .map_or(String::new(), |m| html_to_text(p, m.as_str()));
            Some(SearchHit {
                url: clean_url(cap.get(1).map_or("", |m| m.as_str())),
                title: html_to_text(p, cap.get(2).map_or("", |m| m.as_str())),
                snippet,
            })
        })
        .filter(|hit| !hit.url.is_empty())
        .collect())
}

/// Render hits as a numbered list for the model.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| {
            if h.snippet.is_empty() {
                format!("{}. {}\n   {}", i + 1, h.title, h.url)
            } else {
                format!("{}. {}\n   {}\n   {}", i + 1, h.title, h.url, h.snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Client for the DuckDuckGo HTML endpoint.
#[derive(Clone)]
pub struct DuckDuckGo {
    client: reqwest::Client,
    url: String,
}

impl DuckDuckGo {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Run a query and return every parsed hit.
    pub async fn search(&self, tool_name: &str, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: tool_name.to_string(),
            reason,
        };

        debug!(tool = tool_name, query, "Searching DuckDuckGo");
        let response = self
            .client
            .get(&self.url)
            .header("User-Agent", USER_AGENT)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| failed(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(failed(format!("search failed: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read response: {e}")))?;

        parse_results(&body)
    }
}
