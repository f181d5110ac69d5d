use crate::aggregator::{StatsAggregator, StatsReport};
use crate::analyzer::Analyzer;
use crate::cache::{CacheConfig, CacheKey, CacheStats, RequestCoalescingCache};
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::mention::{Campaign, CampaignInput, ClassifiedMention, RawMention, Sentiment};
use crate::store::{MentionFilter, Store, StoreSummary};
use chrono::Utc;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::slice;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Categories a mention list may be filtered by.
pub const CATEGORIES: [&str; 4] = ["complaint", "review", "question", "praise"];

/// How many fresh mentions are searched when looking one up by id.
const LOOKUP_LIMIT: usize = 100;
/// How many stored mentions are searched when looking one up by id.
const STORED_LOOKUP_LIMIT: usize = 200;

pub type StatsCache = RequestCoalescingCache<CacheKey, StatsReport, Error>;
pub type MentionCache = RequestCoalescingCache<CacheKey, Vec<ClassifiedMention>, Error>;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
    pub entity: String,
    pub days: u32,
    pub limit: usize,
    pub force_refresh: bool,
    pub use_db: bool,
}

impl StatsQuery {
    pub fn new(entity: impl Into<String>, days: u32, limit: usize) -> Self {
        Self {
            entity: entity.into(),
            days,
            limit,
            force_refresh: false,
            use_db: true,
        }
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::Stats {
            entity: self.entity.clone(),
            days: self.days,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MentionQuery {
    pub entity: String,
    pub sentiment: Option<Sentiment>,
    pub category: Option<String>,
    pub days: u32,
    pub limit: usize,
    pub use_db: bool,
}

impl MentionQuery {
    pub fn new(entity: impl Into<String>, days: u32, limit: usize) -> Self {
        Self {
            entity: entity.into(),
            sentiment: None,
            category: None,
            days,
            limit,
            use_db: false,
        }
    }

    /// Only the three real sentiments and the known categories can be asked for.
    pub fn validate(&self) -> Result<()> {
        if self.sentiment == Some(Sentiment::Unknown) {
            return Err(Error::Validation(
                "sentiment must be one of positive, neutral, negative".to_string(),
            ));
        }
        if let Some(category) = &self.category {
            if !CATEGORIES.contains(&category.as_str()) {
                return Err(Error::Validation(format!(
                    "category must be one of {}",
                    CATEGORIES.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn filter(&self) -> MentionFilter {
        MentionFilter {
            days: self.days,
            sentiment: self.sentiment,
            category: self.category.clone(),
            limit: self.limit,
        }
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::Mentions {
            entity: self.entity.clone(),
            sentiment: self.sentiment.map(|sentiment| sentiment.to_string()),
            category: self.category.clone(),
            days: self.days,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectRequest {
    pub entity: String,
    #[serde(default = "CollectRequest::default_days")]
    pub days: u32,
    #[serde(default = "CollectRequest::default_limit")]
    pub limit: usize,
}

impl CollectRequest {
    fn default_days() -> u32 {
        30
    }

    fn default_limit() -> usize {
        20
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectSummary {
    pub status: String,
    pub total_mentions: usize,
    pub analyzed_count: usize,
    pub message: Option<String>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cached_items: usize,
    pub active_requests: usize,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    /// Pause between two analyzer calls of the same batch
    pub analysis_delay: Duration,
}

/// Collect, analyze, persist. Cloned into every cache computation.
#[derive(Clone)]
struct Pipeline {
    collector: Arc<dyn Collector>,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn Store>,
    aggregator: StatsAggregator,
    analysis_delay: Duration,
}

impl Pipeline {
    async fn collect(&self, entity: &str, limit: usize) -> Result<Vec<RawMention>> {
        self.collector.collect(&[entity.to_string()], limit).await
    }

    async fn analyze(&self, raw: &[RawMention]) -> Vec<ClassifiedMention> {
        self.analyzer.analyze_batch(raw, self.analysis_delay).await
    }

    async fn collect_and_analyze(&self, entity: &str, limit: usize) -> Result<Vec<ClassifiedMention>> {
        let raw = self.collect(entity, limit).await?;
        Ok(self.analyze(&raw).await)
    }
}

/// Entry point of the monitoring pipeline.
///
/// Stats reports and mention lists each have their own coalescing cache, so
/// concurrent identical requests trigger one collection between them.
#[derive(Clone, Getters)]
pub struct PulseService {
    pipeline: Pipeline,
    #[getset(get = "pub")]
    stats_cache: StatsCache,
    #[getset(get = "pub")]
    mention_cache: MentionCache,
}

impl PulseService {
    pub fn new(
        collector: Arc<dyn Collector>,
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn Store>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                collector,
                analyzer,
                store,
                aggregator: StatsAggregator::new(),
                analysis_delay: config.analysis_delay,
            },
            stats_cache: RequestCoalescingCache::new(config.cache.clone()),
            mention_cache: RequestCoalescingCache::new(config.cache),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.pipeline.store
    }

    /// Aggregated statistics for an entity over a time window
    pub async fn stats(&self, query: &StatsQuery) -> Result<StatsReport> {
        if query.use_db && !query.force_refresh {
            let stored = self
                .pipeline
                .store
                .mentions(&query.entity, &MentionFilter::new(query.days, query.limit))
                .await?;
            if !stored.is_empty() {
                log::debug!("Aggregating {} stored mentions of {}", stored.len(), query.entity);
                return Ok(self.pipeline.aggregator.aggregate(&stored, query.days));
            }
        }

        let pipeline = self.pipeline.clone();
        let entity = query.entity.clone();
        let (days, limit) = (query.days, query.limit);

        let lookup = self
            .stats_cache
            .get_or_compute(
                query.cache_key(),
                move || async move {
                    let analyzed = pipeline.collect_and_analyze(&entity, limit).await?;
                    pipeline.store.save_mentions(&entity, &analyzed).await?;
                    Ok(pipeline.aggregator.aggregate(&analyzed, days))
                },
                query.force_refresh,
            )
            .await?;

        Ok(lookup.into_data())
    }

    /// Analyzed mentions filtered by sentiment and category
    pub async fn mentions(&self, query: &MentionQuery) -> Result<Vec<ClassifiedMention>> {
        query.validate()?;
        let key = query.cache_key();

        if let Some(hit) = self.mention_cache.get(&key) {
            return Ok(hit.into_data());
        }

        if query.use_db {
            let stored = self
                .pipeline
                .store
                .mentions(&query.entity, &query.filter())
                .await?;
            if !stored.is_empty() {
                self.mention_cache.set(key, stored.clone());
                return Ok(stored);
            }
        }

        let pipeline = self.pipeline.clone();
        let entity = query.entity.clone();
        let filter = query.filter();

        let lookup = self
            .mention_cache
            .get_or_compute(
                key,
                move || async move {
                    let analyzed = pipeline.collect_and_analyze(&entity, filter.limit).await?;
                    let filtered: Vec<ClassifiedMention> = analyzed
                        .into_iter()
                        .filter(|mention| filter.matches_labels(mention))
                        .collect();
                    pipeline.store.save_mentions(&entity, &filtered).await?;
                    Ok(filtered)
                },
                false,
            )
            .await?;

        Ok(lookup.into_data())
    }

    /// One mention by id, from the store when `use_db` is set, else from a
    /// fresh collection.
    pub async fn mention(
        &self,
        id: &str,
        entity: &str,
        days: u32,
        use_db: bool,
    ) -> Result<ClassifiedMention> {
        if use_db {
            let stored = self
                .pipeline
                .store
                .mentions(entity, &MentionFilter::new(days, STORED_LOOKUP_LIMIT))
                .await?;
            if let Some(found) = stored.into_iter().find(|mention| mention.id == id) {
                return Ok(found);
            }
        }

        let analyzed = self.pipeline.collect_and_analyze(entity, LOOKUP_LIMIT).await?;
        match analyzed.into_iter().find(|mention| mention.id == id) {
            Some(found) => {
                self.pipeline
                    .store
                    .save_mentions(entity, slice::from_ref(&found))
                    .await?;
                Ok(found)
            }
            None => Err(Error::NotFound(format!("Mention not found: {}", id))),
        }
    }

    /// Run the whole pipeline now and seed the stats cache with the result
    pub async fn collect(&self, request: &CollectRequest) -> Result<CollectSummary> {
        let job_id = Uuid::new_v4().to_string();
        log::info!("Collection {} started for {}", job_id, request.entity);

        let raw = self.pipeline.collect(&request.entity, request.limit).await?;
        let analyzed = self.pipeline.analyze(&raw).await;
        let stats = self.pipeline.aggregator.aggregate(&analyzed, request.days);

        self.stats_cache.set(
            CacheKey::Stats {
                entity: request.entity.clone(),
                days: request.days,
                limit: request.limit,
            },
            stats,
        );
        self.pipeline
            .store
            .save_mentions(&request.entity, &analyzed)
            .await?;

        log::info!(
            "Collection {} completed: {} mentions, {} analyzed",
            job_id,
            raw.len(),
            analyzed.len()
        );

        Ok(CollectSummary {
            status: "completed".to_string(),
            total_mentions: raw.len(),
            analyzed_count: analyzed.len(),
            message: None,
            job_id: Some(job_id),
        })
    }

    /// Drop cached results whose key contains `pattern`, or all of them
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.stats_cache.clear(pattern) + self.mention_cache.clear(pattern)
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            cached_items: self.stats_cache.len() + self.mention_cache.len(),
            active_requests: self.stats_cache.in_flight() + self.mention_cache.in_flight(),
            ttl_minutes: self.stats_cache.config.ttl.num_minutes(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats_cache.stats() + self.mention_cache.stats()
    }

    pub async fn store_summary(&self) -> Result<StoreSummary> {
        self.pipeline.store.summary().await
    }

    pub async fn clear_store(&self, entity: Option<&str>) -> Result<usize> {
        let removed = self.pipeline.store.clear(entity).await?;
        log::info!("Removed {} stored mentions", removed);
        Ok(removed)
    }

    pub async fn campaigns(&self, limit: usize) -> Result<Vec<Campaign>> {
        self.pipeline.store.campaigns(limit).await
    }

    /// Store a campaign, generating its id and creation time when missing
    pub async fn create_campaign(&self, input: CampaignInput) -> Result<Campaign> {
        if input.topic.trim().is_empty() {
            return Err(Error::Validation("campaign topic must not be empty".to_string()));
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: input
                .id
                .unwrap_or_else(|| format!("c-{}", now.timestamp_millis())),
            topic: input.topic,
            summary: input.summary,
            sentiment: input.sentiment,
            trigger_count: input.trigger_count,
            created_at: input
                .created_at
                .unwrap_or_else(|| now.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
        };

        self.pipeline.store.save_campaign(campaign.clone()).await?;
        Ok(campaign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_query_validation() {
        let mut query = MentionQuery::new("Taboola", 30, 50);
        assert!(query.validate().is_ok());

        query.category = Some("praise".to_string());
        assert!(query.validate().is_ok());

        query.category = Some("rant".to_string());
        assert!(matches!(query.validate(), Err(Error::Validation(_))));

        query.category = None;
        query.sentiment = Some(Sentiment::Unknown);
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_query_cache_keys() {
        let stats = StatsQuery::new("Taboola", 30, 20);
        assert_eq!(stats.cache_key().to_string(), "stats_Taboola_30_20");

        let mut mentions = MentionQuery::new("Taboola", 7, 50);
        mentions.sentiment = Some(Sentiment::Negative);
        assert_eq!(
            mentions.cache_key().to_string(),
            "mentions_Taboola_negative_any_7_50"
        );
    }

    #[test]
    fn test_collect_request_defaults() {
        let request: CollectRequest = serde_json::from_str(r#"{"entity": "Realize"}"#).unwrap();
        assert_eq!(request.days, 30);
        assert_eq!(request.limit, 20);
    }
}
