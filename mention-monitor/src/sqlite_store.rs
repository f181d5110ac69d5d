//! SQLite persistence for classified mentions and campaigns.
//!
//! Each mention is stored as its JSON payload next to the columns the
//! filters run on, so the row format follows `ClassifiedMention` without a
//! migration per field.

use crate::error::{Error, Result};
use crate::mention::{Campaign, ClassifiedMention};
use crate::store::{MentionFilter, Store, StoreSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS analyzed_items (
        id            TEXT     PRIMARY KEY,
        entity        TEXT     NOT NULL,
        timestamp_ms  INTEGER  NOT NULL,
        sentiment     TEXT,
        category      TEXT,
        payload       TEXT     NOT NULL,
        created_at_ms INTEGER  NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_analyzed_items_entity ON analyzed_items (entity, timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_analyzed_items_sentiment ON analyzed_items (sentiment)",
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id            TEXT     PRIMARY KEY,
        topic         TEXT     NOT NULL,
        summary       TEXT,
        sentiment     TEXT,
        trigger_count INTEGER,
        created_at    TEXT     NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_campaigns_created_at ON campaigns (created_at)",
];

type CampaignRow = (String, String, Option<String>, Option<String>, Option<i64>, String);

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(err.to_string())
    }
}

fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Store backed by a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and its tables
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        log::info!("Opened mention database at {}", path.as_ref().display());
        Self::with_pool(pool).await
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_mentions(&self, entity: &str, mentions: &[ClassifiedMention]) -> Result<()> {
        let created_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        for mention in mentions {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO analyzed_items
                    (id, entity, timestamp_ms, sentiment, category, payload, created_at_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&mention.id)
            .bind(entity)
            .bind(mention.timestamp.timestamp_millis())
            .bind(mention.sentiment.map(|sentiment| sentiment.to_string()))
            .bind(&mention.category)
            .bind(serde_json::to_string(mention)?)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::debug!("Saved {} mentions for {}", mentions.len(), entity);
        Ok(())
    }

    async fn mentions(
        &self,
        entity: &str,
        filter: &MentionFilter,
    ) -> Result<Vec<ClassifiedMention>> {
        let since = filter.since(Utc::now()).timestamp_millis();
        let sentiment = filter.sentiment.map(|sentiment| sentiment.to_string());

        let payloads = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT payload
            FROM analyzed_items
            WHERE entity = ?
              AND timestamp_ms > ?
              AND (? IS NULL OR sentiment = ?)
              AND (? IS NULL OR category = ?)
            ORDER BY timestamp_ms DESC
            LIMIT ?
            "#,
        )
        .bind(entity)
        .bind(since)
        .bind(&sentiment)
        .bind(&sentiment)
        .bind(&filter.category)
        .bind(&filter.category)
        .bind(to_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        payloads
            .into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(Error::from))
            .collect()
    }

    async fn summary(&self) -> Result<StoreSummary> {
        let (total_items, unique_entities, oldest, newest) =
            sqlx::query_as::<_, (i64, i64, Option<i64>, Option<i64>)>(
                r#"
                SELECT COUNT(*), COUNT(DISTINCT entity), MIN(created_at_ms), MAX(created_at_ms)
                FROM analyzed_items
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreSummary {
            total_items: total_items as usize,
            unique_entities: unique_entities as usize,
            oldest_item: from_millis(oldest),
            newest_item: from_millis(newest),
        })
    }

    async fn clear(&self, entity: Option<&str>) -> Result<usize> {
        let done = match entity {
            Some(entity) => {
                sqlx::query("DELETE FROM analyzed_items WHERE entity = ?")
                    .bind(entity)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM analyzed_items")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(done.rows_affected() as usize)
    }

    async fn save_campaign(&self, campaign: Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO campaigns
                (id, topic, summary, sentiment, trigger_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.topic)
        .bind(&campaign.summary)
        .bind(&campaign.sentiment)
        .bind(campaign.trigger_count.map(i64::from))
        .bind(&campaign.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn campaigns(&self, limit: usize) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, topic, summary, sentiment, trigger_count, created_at
            FROM campaigns
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, topic, summary, sentiment, trigger_count, created_at)| Campaign {
                    id,
                    topic,
                    summary,
                    sentiment,
                    trigger_count: trigger_count.and_then(|count| u32::try_from(count).ok()),
                    created_at,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mention::{ResponseStatus, Sentiment};
    use chrono::{Duration, FixedOffset};

    fn mention(id: &str, days_ago: i64, sentiment: Sentiment, category: &str) -> ClassifiedMention {
        let timestamp: DateTime<FixedOffset> = (Utc::now() - Duration::days(days_ago)).into();
        ClassifiedMention {
            id: id.to_string(),
            timestamp,
            text: Some(format!("text of {}", id)),
            url: None,
            platform: Some("google_search".to_string()),
            entity_mentioned: vec!["Taboola".to_string()],
            author: None,
            sentiment: Some(sentiment),
            sentiment_score: 0.4,
            rating: Some(4),
            topics: vec!["pricing".to_string()],
            category: Some(category.to_string()),
            key_insight: None,
            summary: None,
            confidence: Some(0.8),
            actionable: true,
            response_status: Some(ResponseStatus::Pending),
            response_draft: None,
            assigned_to: None,
        }
    }

    fn campaign(id: &str, created_at: &str) -> Campaign {
        Campaign {
            id: id.to_string(),
            topic: "pricing".to_string(),
            summary: Some("price complaints".to_string()),
            sentiment: Some("negative".to_string()),
            trigger_count: Some(3),
            created_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn test_filter_window_and_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_mentions(
                "Taboola",
                &[
                    mention("old", 40, Sentiment::Negative, "complaint"),
                    mention("recent", 1, Sentiment::Negative, "complaint"),
                    mention("newest", 0, Sentiment::Positive, "praise"),
                ],
            )
            .await
            .unwrap();
        store
            .save_mentions("Realize", &[mention("other", 0, Sentiment::Neutral, "review")])
            .await
            .unwrap();

        let all = store
            .mentions("Taboola", &MentionFilter::new(30, 10))
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "recent"]);

        let mut negative = MentionFilter::new(30, 10);
        negative.sentiment = Some(Sentiment::Negative);
        let found = store.mentions("Taboola", &negative).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "recent");

        let mut praise = MentionFilter::new(30, 1);
        praise.category = Some("praise".to_string());
        assert_eq!(store.mentions("Taboola", &praise).await.unwrap()[0].id, "newest");

        let everything = store
            .mentions("Taboola", &MentionFilter::new(u32::MAX, 10))
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_mentions("Taboola", &[mention("a", 0, Sentiment::Negative, "complaint")])
            .await
            .unwrap();
        let replacement = mention("a", 0, Sentiment::Positive, "praise");
        store
            .save_mentions("Taboola", &[replacement.clone()])
            .await
            .unwrap();

        let found = store
            .mentions("Taboola", &MentionFilter::new(30, 10))
            .await
            .unwrap();
        assert_eq!(found, vec![replacement]);
    }

    #[tokio::test]
    async fn test_summary_and_clear() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.summary().await.unwrap(), StoreSummary::default());

        store
            .save_mentions("Taboola", &[mention("a", 0, Sentiment::Neutral, "review")])
            .await
            .unwrap();
        store
            .save_mentions("Realize", &[mention("b", 0, Sentiment::Neutral, "review")])
            .await
            .unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.unique_entities, 2);
        assert!(summary.oldest_item.is_some());
        assert!(summary.oldest_item <= summary.newest_item);

        assert_eq!(store.clear(Some("Realize")).await.unwrap(), 1);
        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert_eq!(store.summary().await.unwrap(), StoreSummary::default());
    }

    #[tokio::test]
    async fn test_campaigns_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_campaign(campaign("c-1", "2025-01-01T00:00:00"))
            .await
            .unwrap();
        store
            .save_campaign(campaign("c-2", "2025-02-01T00:00:00"))
            .await
            .unwrap();

        let campaigns = store.campaigns(1).await.unwrap();
        assert_eq!(campaigns, vec![campaign("c-2", "2025-02-01T00:00:00")]);
        assert_eq!(store.campaigns(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let path = std::env::temp_dir().join(format!("pulse-{}.db", uuid::Uuid::new_v4()));

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .save_mentions("Taboola", &[mention("kept", 2, Sentiment::Negative, "complaint")])
                .await
                .unwrap();
            store
                .save_campaign(campaign("c-1", "2025-01-01T00:00:00"))
                .await
                .unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        let found = reopened
            .mentions("Taboola", &MentionFilter::new(30, 10))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "kept");
        assert_eq!(found[0].topics, vec!["pricing".to_string()]);
        assert_eq!(reopened.campaigns(10).await.unwrap().len(), 1);

        reopened.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
