use crate::error::{Error, Result};
use crate::mention::{ClassifiedMention, RawMention, ResponseStatus, Sentiment};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use surf::Client;
use url::Url;

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ATTEMPTS: usize = 2;
const SCHEMA_REMINDER: &str = "\n\nReturn ONLY valid compact JSON matching this schema strictly: \
{sentiment, sentiment_score, rating, topics, category, key_insight, summary, confidence, actionable, response_draft}.";

const NEGATIVE_WORDS: [&str; 7] = [
    "bad",
    "terrible",
    "awful",
    "hate",
    "worst",
    "poor",
    "disappointing",
];
const POSITIVE_WORDS: [&str; 7] = [
    "good",
    "great",
    "excellent",
    "love",
    "best",
    "amazing",
    "fantastic",
];

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
}

/// Classifies raw mentions.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Classify one mention.
    async fn analyze(&self, mention: &RawMention) -> Result<ClassifiedMention>;

    /// Classify every mention, in order, waiting `delay` between calls.
    ///
    /// A mention that cannot be classified gets the keyword-based fallback
    /// classification instead, so the output has one item per input.
    async fn analyze_batch(
        &self,
        mentions: &[RawMention],
        delay: Duration,
    ) -> Vec<ClassifiedMention> {
        let mut analyzed = Vec::with_capacity(mentions.len());

        for (i, mention) in mentions.iter().enumerate() {
            match self.analyze(mention).await {
                Ok(item) => {
                    log::debug!("Analyzed {}/{}: {}", i + 1, mentions.len(), mention.id());
                    analyzed.push(item);
                }
                Err(err) => {
                    log::warn!("Falling back for {}: {}", mention.id(), err);
                    analyzed.push(fallback_classification(mention));
                }
            }

            if !delay.is_zero() && i + 1 < mentions.len() {
                tokio::time::sleep(delay).await;
            }
        }

        analyzed
    }
}

/// Shape the model is asked to answer with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Analysis {
    pub sentiment: String,
    pub sentiment_score: f64,
    pub rating: Option<i64>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub category: String,
    pub key_insight: String,
    pub summary: String,
    pub confidence: f64,
    pub actionable: bool,
    pub response_draft: Option<String>,
}

impl Analysis {
    fn validate(self) -> Result<Self> {
        if !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(Error::Validation(format!(
                "sentiment_score {} outside [-1, 1]",
                self.sentiment_score
            )));
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(Error::Validation(format!("rating {} outside 1..=5", rating)));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::Validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.key_insight.chars().count() > 200 {
            return Err(Error::Validation("key_insight longer than 200 characters".to_string()));
        }
        if self.summary.chars().count() > 100 {
            return Err(Error::Validation("summary longer than 100 characters".to_string()));
        }
        Ok(self)
    }

    /// Combine with the raw mention it describes
    pub fn into_mention(self, raw: &RawMention) -> ClassifiedMention {
        let mut mention = ClassifiedMention::from_raw(raw);
        mention.sentiment = Some(Sentiment::from_str(&self.sentiment).unwrap_or(Sentiment::Unknown));
        mention.sentiment_score = self.sentiment_score;
        mention.rating = self.rating.and_then(|rating| u8::try_from(rating).ok());
        mention.topics = self.topics;
        mention.category = Some(self.category);
        mention.key_insight = Some(self.key_insight);
        mention.summary = Some(self.summary);
        mention.confidence = Some(self.confidence);
        mention.actionable = self.actionable;
        mention.response_status = Some(if self.actionable {
            ResponseStatus::Pending
        } else {
            ResponseStatus::Ignored
        });
        mention.response_draft = self.response_draft;
        mention
    }
}

/// Pull the JSON object out of a model reply that may be wrapped in a
/// Markdown code fence.
pub fn extract_json(reply: &str) -> &str {
    match FENCED_JSON.captures(reply).and_then(|captures| captures.get(1)) {
        Some(object) => object.as_str(),
        None => reply.trim(),
    }
}

/// Parse and validate a model reply.
pub fn parse_analysis(reply: &str) -> Result<Analysis> {
    let analysis: Analysis = serde_json::from_str(extract_json(reply))?;
    analysis.validate()
}

/// Keyword-count classification used when the model cannot be reached or
/// keeps answering with invalid output.
pub fn fallback_classification(raw: &RawMention) -> ClassifiedMention {
    let text = raw.text().to_lowercase();
    let negative = NEGATIVE_WORDS.iter().filter(|word| text.contains(*word)).count();
    let positive = POSITIVE_WORDS.iter().filter(|word| text.contains(*word)).count();

    let (sentiment, score) = if negative > positive {
        (Sentiment::Negative, -0.5)
    } else if positive > negative {
        (Sentiment::Positive, 0.5)
    } else {
        (Sentiment::Neutral, 0.0)
    };

    let mut mention = ClassifiedMention::from_raw(raw);
    mention.sentiment = Some(sentiment);
    mention.sentiment_score = score;
    mention.topics = vec!["general".to_string()];
    mention.category = Some("review".to_string());
    mention.key_insight = Some("Unable to analyze - LLM error".to_string());
    mention.summary = Some("Analysis unavailable".to_string());
    mention.confidence = Some(0.3);
    mention.actionable = false;
    mention.response_status = Some(ResponseStatus::Ignored);
    mention
}

pub fn build_prompt(raw: &RawMention) -> String {
    format!(
        r#"Analyze this user feedback about {entities}:

**Text:** {text}

**Source:** {platform}
**URL:** {url}
**Author:** {author}

Provide a structured analysis in JSON format with these fields:

1. **sentiment**: "positive", "neutral", or "negative"
2. **sentiment_score**: Float from -1.0 (very negative) to +1.0 (very positive)
3. **rating**: Integer 1-5 stars if explicitly mentioned in text, otherwise null
4. **category**: One of: "complaint", "review", "question", "praise", "feature_request"
5. **topics**: List of relevant topics (e.g., ["pricing", "ad_quality", "support", "integration"])
6. **key_insight**: One sentence capturing the core message (max 20 words)
7. **summary**: Professional 10-15 word summary suitable for dashboard
8. **confidence**: Float 0.0-1.0 indicating your confidence in this analysis
9. **actionable**: Boolean - true if this requires a response or action from the company
10. **response_draft**: If actionable=true, a professional, empathetic reply draft (2-3 sentences). Otherwise null.

Guidelines:
- Be objective and professional
- Extract topics actually mentioned in the text
- Only include a rating if the author explicitly gives one (e.g. "3/5", "4 stars")
- A response draft acknowledges the issue and suggests next steps

Return ONLY valid JSON, no markdown formatting or explanations."#,
        entities = raw.entity_mentioned().join(", "),
        text = raw.text(),
        platform = raw.platform(),
        url = raw.url(),
        author = raw.author(),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
    }
}

/// Classifies mentions with a Gemini model.
pub struct GeminiAnalyzer {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        ))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 2048,
            },
        };

        let response: GenerateResponse = self
            .http
            .post(url)
            .body_json(&request)?
            .recv_json()
            .await?;

        response
            .text()
            .ok_or_else(|| Error::Parse("model returned no text".to_string()))
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, mention: &RawMention) -> Result<ClassifiedMention> {
        if self.api_key.is_empty() {
            return Err(Error::Config("Gemini API key is not configured".to_string()));
        }

        let prompt = build_prompt(mention);
        let mut last_error = None;

        for attempt in 1..=ATTEMPTS {
            let reply = if attempt == 1 {
                self.generate(&prompt).await?
            } else {
                self.generate(&format!("{}{}", prompt, SCHEMA_REMINDER)).await?
            };

            match parse_analysis(&reply) {
                Ok(analysis) => return Ok(analysis.into_mention(mention)),
                Err(err) => {
                    log::debug!(
                        "Attempt {} for {} returned invalid output: {}",
                        attempt,
                        mention.id(),
                        err
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(Error::Validation(format!(
            "no valid analysis after {} attempts: {}",
            ATTEMPTS,
            last_error.map(|err| err.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPLY: &str = r#"{
        "sentiment": "negative",
        "sentiment_score": -0.6,
        "rating": 2,
        "category": "complaint",
        "topics": ["pricing", "ad_quality"],
        "key_insight": "User frustrated with high CPM and intrusive ad placements",
        "summary": "Negative feedback on pricing and ad quality from publisher",
        "confidence": 0.85,
        "actionable": true,
        "response_draft": "Thank you for the feedback."
    }"#;

    fn raw(text: &str) -> RawMention {
        RawMention::new(
            "google_0123456789abcdef".to_string(),
            "google_search".to_string(),
            vec!["Taboola".to_string()],
            text.to_string(),
            "reddit".to_string(),
            DateTime::<FixedOffset>::parse_from_rfc3339("2025-03-10T12:00:00+01:00").unwrap(),
            "https://example.com/post".to_string(),
        )
    }

    #[test]
    fn test_extract_json_from_fences() {
        let fenced = format!("Here you go:\n```json\n{}\n```\nthanks", REPLY);
        assert!(extract_json(&fenced).starts_with('{'));
        assert!(extract_json(&fenced).ends_with('}'));

        let bare_fence = format!("```\n{}\n```", REPLY);
        assert_eq!(extract_json(&bare_fence), REPLY.trim());

        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_analysis_into_mention() {
        let mention = parse_analysis(REPLY).unwrap().into_mention(&raw("too expensive"));

        assert_eq!(mention.sentiment, Some(Sentiment::Negative));
        assert_eq!(mention.sentiment_score, -0.6);
        assert_eq!(mention.rating, Some(2));
        assert_eq!(mention.topics, vec!["pricing", "ad_quality"]);
        assert_eq!(mention.response_status, Some(ResponseStatus::Pending));
        assert_eq!(mention.url.as_deref(), Some("https://example.com/post"));
        assert_eq!(mention.timestamp.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn test_parse_analysis_rejects_out_of_range() {
        let bad_score = REPLY.replace("-0.6", "-1.5");
        assert!(matches!(parse_analysis(&bad_score), Err(Error::Validation(_))));

        let bad_rating = REPLY.replace("\"rating\": 2", "\"rating\": 9");
        assert!(matches!(parse_analysis(&bad_rating), Err(Error::Validation(_))));

        assert!(matches!(parse_analysis("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_fallback_counts_keywords() {
        let negative = fallback_classification(&raw("Terrible support, the worst experience"));
        assert_eq!(negative.sentiment, Some(Sentiment::Negative));
        assert_eq!(negative.sentiment_score, -0.5);
        assert_eq!(negative.topics, vec!["general"]);
        assert_eq!(negative.response_status, Some(ResponseStatus::Ignored));

        let positive = fallback_classification(&raw("Great product, love it"));
        assert_eq!(positive.sentiment, Some(Sentiment::Positive));

        let neutral = fallback_classification(&raw("It exists"));
        assert_eq!(neutral.sentiment, Some(Sentiment::Neutral));
        assert_eq!(neutral.sentiment_score, 0.0);
    }

    #[test]
    fn test_prompt_mentions_the_text() {
        let prompt = build_prompt(&raw("Ads load slowly"));
        assert!(prompt.contains("Ads load slowly"));
        assert!(prompt.contains("about Taboola"));
    }

    struct FlakyAnalyzer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Analyzer for FlakyAnalyzer {
        async fn analyze(&self, mention: &RawMention) -> Result<ClassifiedMention> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(Error::Http("rate limited".to_string()));
            }
            Ok(parse_analysis(REPLY)?.into_mention(mention))
        }
    }

    #[tokio::test]
    async fn test_batch_falls_back_per_item() {
        let analyzer = FlakyAnalyzer {
            calls: AtomicUsize::new(0),
        };
        let items = vec![raw("first"), raw("second, great"), raw("third")];

        let analyzed = analyzer.analyze_batch(&items, Duration::ZERO).await;

        assert_eq!(analyzed.len(), 3);
        assert_eq!(analyzed[0].sentiment, Some(Sentiment::Negative));
        assert_eq!(analyzed[1].confidence, Some(0.3));
        assert_eq!(analyzed[1].sentiment, Some(Sentiment::Positive));
        assert_eq!(analyzed[2].category.as_deref(), Some("complaint"));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_key_is_a_config_error() {
        let analyzer = GeminiAnalyzer::new("", "gemini-2.5-flash");
        assert!(matches!(
            analyzer.analyze(&raw("anything")).await,
            Err(Error::Config(_))
        ));
    }
}
