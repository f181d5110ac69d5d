use chrono::{DateTime, FixedOffset};
use getset::Getters;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Overall sentiment assigned by the analyzer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    /// Anything the analyzer produced outside the three known labels
    #[serde(other)]
    Unknown,
}

/// Where a mention stands in the reply workflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Replied,
    InCampaign,
    Ignored,
    #[serde(other)]
    Unknown,
}

/// A mention as produced by a collector, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
#[get = "pub"]
pub struct RawMention {
    id: String,
    platform: String,
    entity_mentioned: Vec<String>,
    text: String,
    author: String,
    timestamp: DateTime<FixedOffset>,
    url: String,
}

impl RawMention {
    pub fn new(
        id: String,
        platform: String,
        entity_mentioned: Vec<String>,
        text: String,
        author: String,
        timestamp: DateTime<FixedOffset>,
        url: String,
    ) -> Self {
        Self {
            id,
            platform,
            entity_mentioned,
            text,
            author,
            timestamp,
            url,
        }
    }
}

/// A mention enriched with the analyzer's judgments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedMention {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub entity_mentioned: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub sentiment_score: f64,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub key_insight: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub actionable: bool,

    #[serde(default)]
    pub response_status: Option<ResponseStatus>,
    #[serde(default)]
    pub response_draft: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl ClassifiedMention {
    /// Carry the raw mention's identity and provenance over, with every
    /// judgment left empty.
    pub fn from_raw(raw: &RawMention) -> Self {
        Self {
            id: raw.id.clone(),
            timestamp: raw.timestamp,
            text: Some(raw.text.clone()),
            url: Some(raw.url.clone()),
            platform: Some(raw.platform.clone()),
            entity_mentioned: raw.entity_mentioned.clone(),
            author: Some(raw.author.clone()),
            sentiment: None,
            sentiment_score: 0.0,
            rating: None,
            topics: Vec::new(),
            category: None,
            key_insight: None,
            summary: None,
            confidence: None,
            actionable: false,
            response_status: None,
            response_draft: None,
            assigned_to: None,
        }
    }
}

/// A response campaign opened for a recurring topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub topic: String,
    pub summary: Option<String>,
    pub sentiment: Option<String>,
    pub trigger_count: Option<u32>,
    pub created_at: String,
}

/// Fields accepted when creating a campaign; missing ones are generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignInput {
    pub id: Option<String>,
    pub topic: String,
    pub summary: Option<String>,
    pub sentiment: Option<String>,
    pub trigger_count: Option<u32>,
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_unknown_labels_deserialize() {
        let mention: ClassifiedMention = serde_json::from_str(
            r#"{
                "id": "google_1",
                "timestamp": "2025-03-01T10:00:00+02:00",
                "sentiment": "mixed",
                "sentiment_score": 0.1,
                "response_status": "escalated"
            }"#,
        )
        .unwrap();

        assert_eq!(mention.sentiment, Some(Sentiment::Unknown));
        assert_eq!(mention.response_status, Some(ResponseStatus::Unknown));
        assert!(mention.topics.is_empty());
        assert!(!mention.actionable);
        assert_eq!(mention.rating, None);
    }

    #[test]
    fn test_labels_use_snake_case() {
        assert_eq!(ResponseStatus::InCampaign.to_string(), "in_campaign");
        assert_eq!(
            ResponseStatus::from_str("in_campaign").unwrap(),
            ResponseStatus::InCampaign
        );
        assert!(Sentiment::from_str("whatever").is_err());
        assert_eq!(
            serde_json::to_string(&Sentiment::Negative).unwrap(),
            "\"negative\""
        );
    }
}
