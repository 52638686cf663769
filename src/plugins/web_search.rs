//! Web search plugin backed by the Tavily Search API.
//!
//! Environment:
//! * `TAVILY_API_KEY` must be set (Bearer token) or every call fails with a
//!   descriptive error that ends up in the tool output.
//!
//! Arguments schema:
//! * `query` (string, required)
//! * `max_results` (integer, optional, default 5; clamped to 1..=10)

use std::fmt::Write as _;
use std::time::Duration;

use color_eyre::{Result, eyre::WrapErr, eyre::eyre};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::assistant::ToolArguments;

use super::plugin::{Plugin, ToolParameters, ToolParametersBuilder, required_str};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct WebSearch {
    api_key: Option<String>,
    endpoint: String,
}

impl WebSearch {
    pub const NAME: &'static str = "web_search";

    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key: api_key.filter(|k| !k.trim().is_empty()), endpoint: TAVILY_ENDPOINT.to_string() }
    }

    /// 別のエンドポイント (プロキシ等) を使う
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn search(&self, query: &str, max_results: u64) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| eyre!("TAVILY_API_KEY not set"))?;
        let body = json!({
            "query": query,
            "max_results": max_results.clamp(1, 10),
            "search_depth": "basic",
            "include_answer": true,
            "include_raw_content": false,
            "include_images": false,
            "topic": "general"
        });

        let client = Client::builder()
            .user_agent("assistant_bridge_web_search/0.1")
            .timeout(Duration::from_secs(15))
            .build()
            .wrap_err("building reqwest client for tavily")?;

        let resp = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .wrap_err("sending tavily search request")?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        debug!(target: "plugins", status = %status, len = text.len(), "tavily_response_raw");

        if !status.is_success() {
            return Err(eyre!("status {}: {}", status.as_u16(), text));
        }
        let parsed: TavilyResponse = serde_json::from_str(&text).wrap_err("decoding tavily response")?;
        Ok(summarize(&parsed))
    }
}

fn summarize(resp: &TavilyResponse) -> String {
    let mut out = String::new();
    if let Some(answer) = resp.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        out.push_str(answer.trim());
    }
    if !resp.results.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("Sources:");
        for r in &resp.results {
            let snippet: String = r.content.chars().take(SNIPPET_CHARS).collect();
            let _ = write!(out, "\n- {} ({}): {}", r.title, r.url, snippet.trim());
        }
    }
    if out.is_empty() {
        out.push_str("No results found.");
    }
    out
}

impl Plugin for WebSearch {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Perform a web search and retrieve the contents of the top results. Use this whenever you are unsure of an answer and need more information."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParametersBuilder::new_object()
            .add_string("query", Some("The query you want to search for."))
            .add_integer("max_results", Some("Maximum number of results to request (1-10)"), Some(1), Some(10))
            .required("query")
            .additional_properties(false)
            .build()
    }

    fn run(&self, args: &ToolArguments) -> Result<String> {
        let query = required_str(args, "query")?;
        let max_results = args.get("max_results").and_then(Value::as_u64).unwrap_or(5);
        let summary = self.search(query, max_results)?;
        trace!(target: "plugins", query, summary = %summary, "web_search_result");
        Ok(summary)
    }
}
