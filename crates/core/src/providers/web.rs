use async_trait::async_trait;
use regex::{Captures, Regex};
use std::time::Duration;
use tracing::debug;

use crate::errors::CoreError;

use super::traits::{FetchedPage, PageFetcher};
use super::{check_status, http_client, tag_error};

const PROVIDER: &str = "web";

/// Tags whose whole subtree carries no readable content.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "svg", "iframe", "form",
];

/// Reduces HTML to markdown-ish plain text.
///
/// Headings become `#` lines, list items become `- ` lines, block elements
/// become paragraph breaks, and common entities are decoded.
pub struct HtmlExtractor {
    comments: Regex,
    stripped: Vec<Regex>,
    title: Regex,
    heading: Regex,
    list_item: Regex,
    block: Regex,
    tag: Regex,
    numeric_entity: Regex,
    blank_lines: Regex,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self, CoreError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| CoreError::Config(format!("Invalid extraction pattern: {e}")))
        };
        let stripped = STRIPPED_ELEMENTS
            .iter()
            .map(|tag| compile(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            comments: compile(r"(?s)<!--.*?-->")?,
            stripped,
            title: compile(r"(?is)<title[^>]*>(.*?)</title\s*>")?,
            heading: compile(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>")?,
            list_item: compile(r"(?i)<li\b[^>]*>")?,
            block: compile(
                r"(?i)</?(p|div|br|tr|section|article|main|ul|ol|table|blockquote|pre)\b[^>]*/?>",
            )?,
            tag: compile(r"(?s)<[^>]+>")?,
            numeric_entity: compile(r"&#(x?[0-9a-fA-F]+);")?,
            blank_lines: compile(r"\n{3,}")?,
        })
    }

    /// Contents of `<title>`, whitespace-collapsed.
    #[must_use]
    pub fn title(&self, html: &str) -> Option<String> {
        self.title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| collapse_whitespace(&self.decode_entities(m.as_str())))
            .filter(|t| !t.is_empty())
    }

    /// Convert an HTML document or fragment into markdown-ish text.
    #[must_use]
    pub fn to_markdown(&self, html: &str) -> String {
        let mut text = self.comments.replace_all(html, "").into_owned();
        for pattern in &self.stripped {
            text = pattern.replace_all(&text, "").into_owned();
        }
        text = self.title.replace_all(&text, "").into_owned();
        text = self
            .heading
            .replace_all(&text, |caps: &Captures| {
                let level = caps[1].parse::<usize>().unwrap_or(1);
                let inner = self.tag.replace_all(&caps[2], "");
                format!("\n\n{} {}\n\n", "#".repeat(level), collapse_whitespace(&inner))
            })
            .into_owned();
        text = self.list_item.replace_all(&text, "\n- ").into_owned();
        text = self.block.replace_all(&text, "\n\n").into_owned();
        text = self.tag.replace_all(&text, "").into_owned();
        text = self.decode_entities(&text);

        let lines: Vec<String> = text.lines().map(collapse_whitespace).collect();
        let joined = lines.join("\n");
        self.blank_lines
            .replace_all(joined.trim(), "\n\n")
            .into_owned()
    }

    fn decode_entities(&self, text: &str) -> String {
        let named = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'");
        let numeric = self.numeric_entity.replace_all(&named, |caps: &Captures| {
            let code = &caps[1];
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            value
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        });
        // `&amp;` last so "&amp;lt;" stays literal "&lt;"
        numeric.replace("&amp;", "&")
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fetches pages over HTTP(S) and extracts readable text.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    extractor: HtmlExtractor,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, CoreError> {
        Ok(Self {
            client: http_client(timeout),
            extractor: HtmlExtractor::new()?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,text/plain;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response)?;

        let final_url = response.url().to_string();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |ct| ct.contains("html"));
        let body = response.text().await.map_err(|e| tag_error(PROVIDER, e))?;
        debug!(url = %final_url, bytes = body.len(), "Fetched page");

        let (title, markdown) = if is_html {
            (
                self.extractor.title(&body).unwrap_or_else(|| final_url.clone()),
                self.extractor.to_markdown(&body),
            )
        } else {
            (final_url.clone(), body.trim().to_string())
        };

        Ok(FetchedPage {
            url: final_url,
            title,
            markdown,
        })
    }
}
