//! Page fetch plugin: downloads a URL and returns its content as markdown text.

use std::io::Read;
use std::time::Duration;

use color_eyre::{Result, eyre::WrapErr, eyre::eyre};
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::debug;

use crate::assistant::ToolArguments;

use super::plugin::{Plugin, ToolParameters, ToolParametersBuilder, required_str};

/// 空ページのときに返す文言
pub const EMPTY_PAGE_TEXT: &str = "Could not retrieve content from the URL.";

const DEFAULT_MAX_CHARS: usize = 20_000;
/// 本文として読み込む上限 (変換前の HTML バイト数)
const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024;

pub struct UrlViewer {
    max_chars: usize,
    max_bytes: u64,
    timeout: Duration,
}

impl Default for UrlViewer {
    fn default() -> Self {
        Self { max_chars: DEFAULT_MAX_CHARS, max_bytes: DEFAULT_MAX_BYTES, timeout: Duration::from_secs(20) }
    }
}

impl UrlViewer {
    pub const NAME: &'static str = "url_viewer";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn fetch(&self, url: &Url) -> Result<String> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; assistant_bridge_url_viewer/0.1)")
            .timeout(self.timeout)
            .build()
            .wrap_err("building reqwest client for url_viewer")?;
        let resp = client.get(url.clone()).send().wrap_err_with(|| format!("fetching {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(eyre!("status {} for {}", status.as_u16(), url));
        }
        if let Some(len) = resp.content_length().filter(|len| *len > self.max_bytes) {
            return Err(eyre!("page {url} is too large ({len} bytes, limit {})", self.max_bytes));
        }
        let body = read_capped(resp, self.max_bytes).wrap_err("reading page body")?;
        debug!(target: "plugins", %url, status = %status, len = body.len(), "url_viewer_fetched");
        Ok(body)
    }
}

/// 最大 `limit` バイトだけ読み、UTF-8 として (不正部分は置換して) 返す。
/// Content-Length の無いレスポンスもここで頭打ちになる。
fn read_capped<R: Read>(reader: R, limit: u64) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(limit).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// HTML をテキスト (markdown) に変換し、文字数上限で切り詰める
pub fn page_text(html: &str, max_chars: usize) -> String {
    let text = html2md::parse_html(html);
    let text = text.trim();
    if text.is_empty() {
        return EMPTY_PAGE_TEXT.to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("\n\n[content truncated]");
    cut
}

impl Plugin for UrlViewer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Browse a specified URL and return the content of the page."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParametersBuilder::new_object()
            .add_string("url", Some("Absolute http(s) URL of the page to read."))
            .required("url")
            .additional_properties(false)
            .build()
    }

    fn run(&self, args: &ToolArguments) -> Result<String> {
        let raw = required_str(args, "url")?;
        let url = Url::parse(raw).wrap_err_with(|| format!("invalid url '{raw}'"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(eyre!("unsupported url scheme '{}'", url.scheme()));
        }
        let html = self.fetch(&url)?;
        Ok(page_text(&html, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn html_is_converted_and_truncated() {
        let html = "<html><body><h1>Title</h1><p>Hello world</p></body></html>";
        let text = page_text(html, 1000);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world"));

        let short = page_text(html, 3);
        assert!(short.ends_with("[content truncated]"));

        assert_eq!(page_text("<html><body></body></html>", 1000), EMPTY_PAGE_TEXT);
    }

    #[test]
    fn body_read_stops_at_the_byte_limit() {
        let page = format!("<p>{}</p>", "x".repeat(10_000));
        let body = read_capped(page.as_bytes(), 64).unwrap();
        assert_eq!(body.len(), 64);
        assert!(body.starts_with("<p>xxx"));

        assert_eq!(read_capped("<p>short</p>".as_bytes(), 64).unwrap(), "<p>short</p>");
        // 多バイト文字の途中で切れても失敗しない
        let cut = read_capped("ああ".as_bytes(), 4).unwrap();
        assert!(cut.starts_with('あ'));
    }

    #[test]
    fn rejects_bad_urls_without_fetching() {
        let viewer = UrlViewer::new();
        let args: ToolArguments = serde_json::from_value(json!({"url": "not a url"})).unwrap();
        assert!(viewer.run(&args).is_err());

        let args: ToolArguments = serde_json::from_value(json!({"url": "file:///etc/passwd"})).unwrap();
        let err = viewer.run(&args).unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }
}
