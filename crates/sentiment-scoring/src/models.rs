//! Pluggable text sentiment models. The config manager picks one at
//! startup: a local VADER-based lexicon model with financial keyword
//! boosting, or a remote LLM classifier behind the same narrow interface.

use async_trait::async_trait;
use screener_core::{ScreenerError, SentimentModel, TextSentiment};
use serde::Deserialize;
use std::time::Duration;
use vader_sentiment::SentimentIntensityAnalyzer;

/// Financial jargon the general-purpose lexicon underweights.
const BULLISH_KEYWORDS: &[(&str, f64)] = &[
    ("surge", 0.4),
    ("surges", 0.4),
    ("rally", 0.4),
    ("rallies", 0.4),
    ("soar", 0.5),
    ("soars", 0.5),
    ("bullish", 0.5),
    ("all-time high", 0.5),
    ("record high", 0.4),
    ("breakout", 0.3),
    ("upgrade", 0.3),
    ("beat estimates", 0.4),
    ("beats estimates", 0.4),
    ("raised guidance", 0.4),
    ("buyback", 0.3),
    ("breakthrough", 0.4),
    ("outperform", 0.3),
];

const BEARISH_KEYWORDS: &[(&str, f64)] = &[
    ("crash", -0.5),
    ("crashes", -0.5),
    ("plunge", -0.5),
    ("plunges", -0.5),
    ("bearish", -0.5),
    ("collapse", -0.5),
    ("lawsuit", -0.4),
    ("sell-off", -0.4),
    ("selloff", -0.4),
    ("downgrade", -0.4),
    ("missed estimates", -0.4),
    ("misses estimates", -0.4),
    ("cut guidance", -0.4),
    ("layoff", -0.4),
    ("layoffs", -0.4),
    ("investigation", -0.4),
    ("fraud", -0.5),
    ("panic", -0.4),
    ("underperform", -0.3),
];

/// VADER with financial keyword boosting.
pub struct RuleBasedModel {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl RuleBasedModel {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    fn financial_boost(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let mut boost = 0.0;
        for (keyword, score) in BULLISH_KEYWORDS {
            if lowered.contains(keyword) {
                boost += score;
            }
        }
        for (keyword, score) in BEARISH_KEYWORDS {
            if lowered.contains(keyword) {
                boost += score;
            }
        }
        boost
    }

    /// Blended VADER compound + keyword boost, clamped to [-1, 1].
    pub fn score(&self, text: &str) -> TextSentiment {
        if text.trim().is_empty() {
            return TextSentiment {
                score: 0.0,
                confidence: 0.0,
            };
        }
        let scores = self.analyzer.polarity_scores(text);
        let compound = scores.get("compound").copied().unwrap_or(0.0);
        let combined = (compound + self.financial_boost(text) * 0.5).clamp(-1.0, 1.0);

        // Longer texts with a decisive polarity read as higher confidence
        let length_factor = (text.split_whitespace().count() as f64 / 20.0).min(1.0);
        let confidence = (combined.abs() * 0.6 + length_factor * 0.4).clamp(0.05, 0.95);
        TextSentiment {
            score: combined,
            confidence,
        }
    }
}

impl Default for RuleBasedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentModel for RuleBasedModel {
    async fn score_text(&self, text: &str) -> Result<TextSentiment, ScreenerError> {
        Ok(self.score(text))
    }

    fn name(&self) -> &'static str {
        "rule_based"
    }
}

/// Remote LLM classifier speaking the messages-endpoint contract: the
/// model is asked for a single polarity number and anything unparseable
/// is surfaced as a source error rather than silently defaulted.
pub struct RemoteLlmModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: String,
}

impl RemoteLlmModel {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn prompt(text: &str) -> String {
        format!(
            "Rate the financial sentiment of the following text on a scale \
             from -1.0 (very bearish) to 1.0 (very bullish). Respond with \
             only the number.\n\nText: {text}"
        )
    }

    /// Pull the leading float out of the model's reply.
    fn parse_reply(reply: &str) -> Option<f64> {
        let token = reply.split_whitespace().next()?;
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '+' || *c == '.')
            .collect();
        cleaned.parse::<f64>().ok().map(|v| v.clamp(-1.0, 1.0))
    }
}

#[async_trait]
impl SentimentModel for RemoteLlmModel {
    async fn score_text(&self, text: &str) -> Result<TextSentiment, ScreenerError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 16,
            "messages": [{"role": "user", "content": Self::prompt(text)}],
        });
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScreenerError::Timeout(e.to_string())
                } else {
                    ScreenerError::Source(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => {
                return Err(ScreenerError::Source(
                    "sentiment endpoint rejected the credentials".to_string(),
                ))
            }
            429 => {
                return Err(ScreenerError::RateLimited(
                    "sentiment endpoint returned 429".to_string(),
                ))
            }
            other => {
                return Err(ScreenerError::Source(format!(
                    "sentiment endpoint HTTP {other}"
                )))
            }
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        let reply = payload
            .content
            .first()
            .map(|c| c.text.as_str())
            .unwrap_or_default();
        match Self::parse_reply(reply) {
            Some(score) => Ok(TextSentiment {
                score,
                confidence: 0.85,
            }),
            None => Err(ScreenerError::Parse(format!(
                "unparseable sentiment reply: {reply:?}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "remote_llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_headlines_score_positive() {
        let model = RuleBasedModel::new();
        for headline in [
            "Shares surge after company beats estimates and raised guidance",
            "Analysts turn bullish as the stock hits a record high",
        ] {
            let result = model.score(headline);
            assert!(result.score > 0.0, "{headline:?} scored {}", result.score);
        }
    }

    #[test]
    fn bearish_headlines_score_negative() {
        let model = RuleBasedModel::new();
        for headline in [
            "Stock plunges after the company misses estimates",
            "Shares crash amid fraud investigation and layoffs",
        ] {
            let result = model.score(headline);
            assert!(result.score < 0.0, "{headline:?} scored {}", result.score);
        }
    }

    #[test]
    fn empty_text_is_neutral_with_no_confidence() {
        let model = RuleBasedModel::new();
        let result = model.score("   ");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn keyword_boost_moves_generic_text() {
        let model = RuleBasedModel::new();
        let generic = model.score("This is good news for the company");
        let financial = model.score("This is good news: a breakout surge on the buyback");
        assert!(financial.score > generic.score);
    }

    #[test]
    fn llm_reply_parsing_extracts_the_number() {
        assert_eq!(RemoteLlmModel::parse_reply("0.7"), Some(0.7));
        assert_eq!(RemoteLlmModel::parse_reply("-0.35 (bearish)"), Some(-0.35));
        assert_eq!(RemoteLlmModel::parse_reply("2.5"), Some(1.0), "clamped");
        assert_eq!(RemoteLlmModel::parse_reply("no idea"), None);
    }
}
