use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::CoreError;
use crate::models::market_info::{Importance, Sentiment};
use crate::models::settings::LlmSettings;

use super::traits::{AnalysisRequest, AnalysisResult, ContentAnalyzer};
use super::{http_client, tag_error};

const SYSTEM_PROMPT: &str = r#"You are a financial news analyst.
Read the article and answer with a single JSON object and nothing else:
{"summary": string (at most 80 words),
 "sentiment": "positive" | "neutral" | "negative",
 "sentiment_score": number between -1 and 1,
 "importance": "low" | "medium" | "high",
 "market_impact": string (one sentence),
 "mentioned_symbols": [ticker strings],
 "tags": [short lowercase topic strings]}"#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Raw analysis as the model emits it, before enum validation.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    summary: String,
    sentiment: String,
    sentiment_score: f64,
    importance: String,
    #[serde(default)]
    market_impact: String,
    #[serde(default)]
    mentioned_symbols: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Content analyzer backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmAnalyzer {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl LlmAnalyzer {
    pub fn new(settings: LlmSettings, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            settings,
        }
    }

    /// Parse the model's reply into an [`AnalysisResult`].
    ///
    /// Tolerates markdown code fences around the JSON object.
    pub fn parse_reply(content: &str) -> Result<AnalysisResult, CoreError> {
        let start = content.find('{');
        let end = content.rfind('}');
        let json = match (start, end) {
            (Some(s), Some(e)) if s < e => &content[s..=e],
            _ => {
                return Err(CoreError::AnalysisFailure(
                    "Model reply contained no JSON object".into(),
                ))
            }
        };
        let raw: RawAnalysis = serde_json::from_str(json)
            .map_err(|e| CoreError::AnalysisFailure(format!("Malformed analysis JSON: {e}")))?;

        if raw.summary.trim().is_empty() {
            return Err(CoreError::AnalysisFailure("Model returned an empty summary".into()));
        }
        if !raw.sentiment_score.is_finite() {
            return Err(CoreError::AnalysisFailure("Sentiment score is not a number".into()));
        }
        if raw.market_impact.trim().is_empty() {
            return Err(CoreError::AnalysisFailure("Model returned no market impact".into()));
        }

        Ok(AnalysisResult {
            summary: raw.summary.trim().to_string(),
            sentiment: Sentiment::parse(&raw.sentiment)?,
            sentiment_score: raw.sentiment_score.clamp(-1.0, 1.0),
            importance: Importance::parse(&raw.importance)?,
            market_impact: raw.market_impact.trim().to_string(),
            mentioned_symbols: raw.mentioned_symbols,
            tags: raw.tags,
        })
    }
}

#[async_trait]
impl ContentAnalyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CoreError> {
        let mut user_prompt = format!("Title: {}\n\n{}", request.title, request.content);
        if !request.known_symbols.is_empty() {
            user_prompt.push_str(&format!(
                "\n\nTracked tickers (report any that the article mentions): {}",
                request.known_symbols.join(", ")
            ));
        }

        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 600,
            stream: false,
        };

        debug!(model = %self.settings.model, title = %request.title, "Requesting analysis");

        let response = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| tag_error("llm", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::AnalysisFailure(format!(
                "Analysis service returned HTTP {status}: {}",
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::AnalysisFailure(format!("Unreadable analysis response: {e}")))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| CoreError::AnalysisFailure("Analysis service returned no choices".into()))?;

        let result = Self::parse_reply(content)?;
        info!(
            title = %request.title,
            sentiment = result.sentiment.as_str(),
            importance = result.importance.as_str(),
            "Analysis complete"
        );
        Ok(result)
    }
}

/// Analyzer used when no analysis service is configured.
#[derive(Debug, Default)]
pub struct UnconfiguredAnalyzer;

#[async_trait]
impl ContentAnalyzer for UnconfiguredAnalyzer {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, CoreError> {
        Err(CoreError::AnalysisFailure(
            "No analysis service configured (settings.llm is empty)".into(),
        ))
    }
}
