pub mod aggregator;
pub mod analyzer;
pub mod cache;
pub mod collector;
pub mod deduplication;
mod error;
pub mod mention;
mod rate_limit;
pub mod service;
pub mod sqlite_store;
pub mod store;


pub use aggregator::{StatsAggregator, StatsReport};
pub use analyzer::{Analyzer, GeminiAnalyzer};
pub use collector::{Collector, SerpApiCollector};
pub use error::{Error, Result};
pub use mention::{Campaign, CampaignInput, ClassifiedMention, RawMention, ResponseStatus, Sentiment};
pub use rate_limit::RateLimiter;
pub use service::{CollectRequest, MentionQuery, PulseService, ServiceConfig, StatsQuery};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, Store};

// Re-export cache types
pub use cache::{CacheConfig, CacheKey, CacheStats, Lookup, RequestCoalescingCache};
pub use deduplication::CacheError;
