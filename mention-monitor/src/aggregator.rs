//! Turns a set of classified mentions into the dashboard statistics report.
//!
//! Aggregation is a pure function of its input and the current time: no I/O,
//! no shared state, and every call produces a complete, new report.

use crate::mention::{ClassifiedMention, ResponseStatus, Sentiment};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// How many hot topics and action items a report carries
pub const REPORT_TOP_N: usize = 10;

/// One value per known sentiment label
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentBuckets<T> {
    pub positive: T,
    pub neutral: T,
    pub negative: T,
}

/// The window the caller asked about. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl DateRange {
    pub fn ending_at(end_date: DateTime<Utc>, days_back: u32) -> Self {
        Self {
            start_date: days_before(end_date, days_back),
            end_date,
        }
    }
}

/// `days` days before `end`, clamped to the earliest representable instant
pub(crate) fn days_before(end: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|span| end.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Mean sentiment of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub score: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotTopic {
    pub topic: String,
    pub count: usize,
    pub avg_sentiment: f64,
}

/// A mention that needs a reply, reduced to what the dashboard lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub sentiment: Option<Sentiment>,
    pub category: Option<String>,
    pub topics: Vec<String>,
    pub key_insight: Option<String>,
    pub url: Option<String>,
}

impl From<&ClassifiedMention> for ActionItem {
    fn from(item: &ClassifiedMention) -> Self {
        Self {
            id: item.id.clone(),
            sentiment: item.sentiment,
            category: item.category.clone(),
            topics: item.topics.clone(),
            key_insight: item.key_insight.clone(),
            url: item.url.clone(),
        }
    }
}

/// Count per reply-workflow status. All four buckets are always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStats {
    pub pending: usize,
    pub replied: usize,
    pub in_campaign: usize,
    pub ignored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_mentions: usize,
    pub date_range: DateRange,
    pub sentiment_breakdown: SentimentBuckets<usize>,
    pub sentiment_percentages: SentimentBuckets<f64>,
    pub average_sentiment_score: f64,
    pub average_rating: Option<f64>,
    pub sentiment_trend: Vec<TrendPoint>,
    pub hot_topics: Vec<HotTopic>,
    pub action_required_count: usize,
    pub action_required_items: Vec<ActionItem>,
    pub response_stats: ResponseStats,
    pub category_breakdown: BTreeMap<String, usize>,
    pub platform_breakdown: BTreeMap<String, usize>,
}

impl StatsReport {
    /// Report for an empty input: same shape, everything zero or empty
    pub fn empty(date_range: DateRange) -> Self {
        Self {
            total_mentions: 0,
            date_range,
            sentiment_breakdown: SentimentBuckets::default(),
            sentiment_percentages: SentimentBuckets::default(),
            average_sentiment_score: 0.0,
            average_rating: None,
            sentiment_trend: Vec::new(),
            hot_topics: Vec::new(),
            action_required_count: 0,
            action_required_items: Vec::new(),
            response_stats: ResponseStats::default(),
            category_breakdown: BTreeMap::new(),
            platform_breakdown: BTreeMap::new(),
        }
    }
}

/// Exact halves go to the even neighbour: 0.125 becomes 0.12
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator;

impl StatsAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate `items` into a report whose date range ends now
    pub fn aggregate(&self, items: &[ClassifiedMention], days_back: u32) -> StatsReport {
        self.aggregate_at(items, days_back, Utc::now())
    }

    /// Aggregate `items` into a report whose date range ends at `now`
    pub fn aggregate_at(
        &self,
        items: &[ClassifiedMention],
        days_back: u32,
        now: DateTime<Utc>,
    ) -> StatsReport {
        let date_range = DateRange::ending_at(now, days_back);
        if items.is_empty() {
            return StatsReport::empty(date_range);
        }

        let total = items.len();
        let sentiment_breakdown = Self::sentiment_breakdown(items);
        let percentage = |count: usize| round_to(count as f64 / total as f64 * 100.0, 1);

        let score_sum: f64 = items.iter().map(|item| item.sentiment_score).sum();

        let ratings: Vec<f64> = items
            .iter()
            .filter_map(|item| item.rating.map(f64::from))
            .collect();
        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(round_to(mean(ratings.iter().sum(), ratings.len()), 1))
        };

        let actionable: Vec<&ClassifiedMention> =
            items.iter().filter(|item| item.actionable).collect();

        StatsReport {
            total_mentions: total,
            date_range,
            sentiment_percentages: SentimentBuckets {
                positive: percentage(sentiment_breakdown.positive),
                neutral: percentage(sentiment_breakdown.neutral),
                negative: percentage(sentiment_breakdown.negative),
            },
            sentiment_breakdown,
            average_sentiment_score: round_to(mean(score_sum, total), 2),
            average_rating,
            sentiment_trend: Self::sentiment_trend(items),
            hot_topics: Self::hot_topics(items),
            action_required_count: actionable.len(),
            action_required_items: actionable
                .iter()
                .take(REPORT_TOP_N)
                .map(|item| ActionItem::from(*item))
                .collect(),
            response_stats: Self::response_stats(items),
            category_breakdown: Self::breakdown(items.iter().map(|item| item.category.as_deref())),
            platform_breakdown: Self::breakdown(items.iter().map(|item| item.platform.as_deref())),
        }
    }

    fn sentiment_breakdown(items: &[ClassifiedMention]) -> SentimentBuckets<usize> {
        let mut buckets = SentimentBuckets::default();
        for item in items {
            match item.sentiment {
                Some(Sentiment::Positive) => buckets.positive += 1,
                Some(Sentiment::Neutral) => buckets.neutral += 1,
                Some(Sentiment::Negative) => buckets.negative += 1,
                Some(Sentiment::Unknown) | None => {}
            }
        }
        buckets
    }

    /// One point per calendar day, in the offset each timestamp carries
    fn sentiment_trend(items: &[ClassifiedMention]) -> Vec<TrendPoint> {
        let mut by_date: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for item in items {
            let day = by_date.entry(item.timestamp.date_naive()).or_default();
            day.0 += item.sentiment_score;
            day.1 += 1;
        }

        by_date
            .into_iter()
            .map(|(date, (sum, count))| TrendPoint {
                date: date.format("%Y-%m-%d").to_string(),
                score: round_to(mean(sum, count), 2),
                count,
            })
            .collect()
    }

    /// Most frequent topics; ties keep the order topics were first seen in
    fn hot_topics(items: &[ClassifiedMention]) -> Vec<HotTopic> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut tallies: Vec<(&str, usize, f64)> = Vec::new();

        for item in items {
            for topic in &item.topics {
                let slot = *index.entry(topic.as_str()).or_insert_with(|| {
                    tallies.push((topic.as_str(), 0, 0.0));
                    tallies.len() - 1
                });
                tallies[slot].1 += 1;
                tallies[slot].2 += item.sentiment_score;
            }
        }

        // `sort_by` is stable
        tallies.sort_by(|a, b| b.1.cmp(&a.1));
        tallies
            .into_iter()
            .take(REPORT_TOP_N)
            .map(|(topic, count, sum)| HotTopic {
                topic: topic.to_string(),
                count,
                avg_sentiment: round_to(mean(sum, count), 2),
            })
            .collect()
    }

    fn response_stats(items: &[ClassifiedMention]) -> ResponseStats {
        let mut stats = ResponseStats::default();
        for item in items {
            match item.response_status {
                Some(ResponseStatus::Pending) => stats.pending += 1,
                Some(ResponseStatus::Replied) => stats.replied += 1,
                Some(ResponseStatus::InCampaign) => stats.in_campaign += 1,
                Some(ResponseStatus::Ignored) => stats.ignored += 1,
                Some(ResponseStatus::Unknown) | None => {}
            }
        }
        stats
    }

    fn breakdown<'a>(values: impl Iterator<Item = Option<&'a str>>) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for value in values.flatten() {
            *counts.entry(value.to_string()).or_insert(0) += 1;
        }
        counts
    }
}
