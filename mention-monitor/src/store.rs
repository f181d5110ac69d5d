use crate::aggregator::days_before;
use crate::error::Result;
use crate::mention::{Campaign, ClassifiedMention, Sentiment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Which stored mentions to return.
#[derive(Debug, Clone, PartialEq)]
pub struct MentionFilter {
    /// Only mentions newer than this many days
    pub days: u32,
    pub sentiment: Option<Sentiment>,
    pub category: Option<String>,
    pub limit: usize,
}

impl MentionFilter {
    pub fn new(days: u32, limit: usize) -> Self {
        Self {
            days,
            sentiment: None,
            category: None,
            limit,
        }
    }

    /// Start of the window ending at `now`
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.days)
    }

    /// Window, sentiment and category all match
    pub fn matches(&self, mention: &ClassifiedMention, since: DateTime<Utc>) -> bool {
        mention.timestamp > since && self.matches_labels(mention)
    }

    /// Sentiment and category match, whatever the timestamp
    pub fn matches_labels(&self, mention: &ClassifiedMention) -> bool {
        if let Some(sentiment) = self.sentiment {
            if mention.sentiment != Some(sentiment) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if mention.category.as_ref() != Some(category) {
                return false;
            }
        }
        true
    }
}

/// Overview of what is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total_items: usize,
    pub unique_entities: usize,
    pub oldest_item: Option<DateTime<Utc>>,
    pub newest_item: Option<DateTime<Utc>>,
}

/// Persistence for classified mentions and campaigns.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace mentions by id, filed under `entity`.
    async fn save_mentions(&self, entity: &str, mentions: &[ClassifiedMention]) -> Result<()>;

    /// Mentions of `entity` matching `filter`, newest first.
    async fn mentions(&self, entity: &str, filter: &MentionFilter)
        -> Result<Vec<ClassifiedMention>>;

    async fn summary(&self) -> Result<StoreSummary>;

    /// Remove every mention, or only those of `entity`. Returns how many went.
    async fn clear(&self, entity: Option<&str>) -> Result<usize>;

    async fn save_campaign(&self, campaign: Campaign) -> Result<()>;

    /// Most recent campaigns first.
    async fn campaigns(&self, limit: usize) -> Result<Vec<Campaign>>;
}

#[derive(Debug, Clone)]
struct StoredMention {
    entity: String,
    mention: ClassifiedMention,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    mentions: HashMap<String, StoredMention>,
    campaigns: HashMap<String, Campaign>,
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_mentions(&self, entity: &str, mentions: &[ClassifiedMention]) -> Result<()> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        for mention in mentions {
            tables.mentions.insert(
                mention.id.clone(),
                StoredMention {
                    entity: entity.to_string(),
                    mention: mention.clone(),
                    created_at: now,
                },
            );
        }
        log::debug!("Saved {} mentions for {}", mentions.len(), entity);
        Ok(())
    }

    async fn mentions(
        &self,
        entity: &str,
        filter: &MentionFilter,
    ) -> Result<Vec<ClassifiedMention>> {
        let since = filter.since(Utc::now());
        let tables = self.tables.read().await;

        let mut found: Vec<ClassifiedMention> = tables
            .mentions
            .values()
            .filter(|stored| stored.entity == entity && filter.matches(&stored.mention, since))
            .map(|stored| stored.mention.clone())
            .collect();

        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(filter.limit);
        Ok(found)
    }

    async fn summary(&self) -> Result<StoreSummary> {
        let tables = self.tables.read().await;
        let entities: HashSet<&str> = tables
            .mentions
            .values()
            .map(|stored| stored.entity.as_str())
            .collect();

        Ok(StoreSummary {
            total_items: tables.mentions.len(),
            unique_entities: entities.len(),
            oldest_item: tables.mentions.values().map(|stored| stored.created_at).min(),
            newest_item: tables.mentions.values().map(|stored| stored.created_at).max(),
        })
    }

    async fn clear(&self, entity: Option<&str>) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.mentions.len();
        match entity {
            Some(entity) => tables.mentions.retain(|_, stored| stored.entity != entity),
            None => tables.mentions.clear(),
        }
        Ok(before - tables.mentions.len())
    }

    async fn save_campaign(&self, campaign: Campaign) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.campaigns.insert(campaign.id.clone(), campaign);
        Ok(())
    }

    async fn campaigns(&self, limit: usize) -> Result<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut campaigns: Vec<Campaign> = tables.campaigns.values().cloned().collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns.truncate(limit);
        Ok(campaigns)
    }
}
