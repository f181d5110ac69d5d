use crate::error::{Error, Result};
use crate::mention::RawMention;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use surf::Client;
use url::Url;

const SERPAPI_URL: &str = "https://serpapi.com/search";
const PLATFORM: &str = "google_search";

/// Source of raw mentions for a set of keywords.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Collect at most `limit` mentions of any of `keywords`.
    async fn collect(&self, keywords: &[String], limit: usize) -> Result<Vec<RawMention>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    link: Option<String>,
    source: Option<String>,
}

/// Collects Google results through SerpAPI.
pub struct SerpApiCollector {
    http: Client,
    api_key: String,
    base_url: String,
}

impl SerpApiCollector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: SERPAPI_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn queries(keyword: &str) -> [String; 3] {
        [
            format!("\"{}\" review", keyword),
            format!(
                "\"{}\" opinion site:reddit.com OR site:news.ycombinator.com",
                keyword
            ),
            format!("\"{}\" experience", keyword),
        ]
    }

    async fn search(&self, query: &str) -> Result<Vec<OrganicResult>> {
        let url = Url::parse_with_params(
            &self.base_url,
            &[
                ("q", query),
                ("api_key", self.api_key.as_str()),
                ("num", "10"),
                ("hl", "en"),
            ],
        )?;

        let response: SearchResponse = self.http.get(url).recv_json().await?;
        Ok(response.organic_results)
    }
}

#[async_trait]
impl Collector for SerpApiCollector {
    async fn collect(&self, keywords: &[String], limit: usize) -> Result<Vec<RawMention>> {
        if self.api_key.is_empty() {
            return Err(Error::Config("SerpAPI key is not configured".to_string()));
        }

        let mut items = Vec::new();
        let mut seen = HashSet::new();

        for keyword in keywords {
            for query in Self::queries(keyword) {
                if items.len() >= limit {
                    return Ok(items);
                }

                let results = match self.search(&query).await {
                    Ok(results) => results,
                    Err(err) => {
                        log::warn!("Search failed for query '{}': {}", query, err);
                        continue;
                    }
                };

                for mention in mentions_from_results(keywords, &results, Utc::now().into()) {
                    if seen.insert(mention.id().clone()) {
                        items.push(mention);
                    }
                    if items.len() >= limit {
                        return Ok(items);
                    }
                }
            }
        }

        log::info!("Collected {} mentions for {:?}", items.len(), keywords);
        Ok(items)
    }
}

/// Stable identifier for a search result, derived from its link.
pub fn mention_id(link: &str) -> String {
    let digest = hex::encode(Sha256::digest(link.as_bytes()));
    format!("google_{}", &digest[..16])
}

/// Keywords that appear in `text`, compared case-insensitively.
pub fn detect_entities(keywords: &[String], text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
        .cloned()
        .collect()
}

fn mentions_from_results(
    keywords: &[String],
    results: &[OrganicResult],
    collected_at: DateTime<FixedOffset>,
) -> Vec<RawMention> {
    results
        .iter()
        .filter_map(|result| {
            let link = result.link.as_ref()?;
            let text = format!("{}\n{}", result.title, result.snippet);
            let entities = detect_entities(keywords, &text);
            if entities.is_empty() {
                return None;
            }

            Some(RawMention::new(
                mention_id(link),
                PLATFORM.to_string(),
                entities,
                text,
                result
                    .source
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                collected_at,
                link.clone(),
            ))
        })
        .collect()
}
