use crate::deduplication::{
    CacheError, Completion, Deregistration, InFlightRegistry, Registration, SharedComputation,
    SharedInFlightRegistry,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::{self, Display};
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Configuration for the cache system
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long a stored result stays valid
    pub ttl: Duration,
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// Whether results are stored at all. Coalescing of in-flight work stays on.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            max_entries: 1000,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            enabled: true,
        }
    }
}

/// Stored result with the moment it was produced
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            created_at: Utc::now(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// A value exactly `ttl` old is already expired.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }
}

/// Key identifying a cached computation.
///
/// The `Display` form is what `clear(Some(pattern))` matches against.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub enum CacheKey {
    Stats {
        entity: String,
        days: u32,
        limit: usize,
    },
    Mentions {
        entity: String,
        sentiment: Option<String>,
        category: Option<String>,
        days: u32,
        limit: usize,
    },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Stats {
                entity,
                days,
                limit,
            } => write!(f, "stats_{}_{}_{}", entity, days, limit),
            CacheKey::Mentions {
                entity,
                sentiment,
                category,
                days,
                limit,
            } => write!(
                f,
                "mentions_{}_{}_{}_{}_{}",
                entity,
                sentiment.as_deref().unwrap_or("any"),
                category.as_deref().unwrap_or("any"),
                days,
                limit
            ),
        }
    }
}

fn minutes<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let minutes = duration.num_milliseconds() as f64 / 60_000.0;
    serializer.serialize_f64((minutes * 10.0).round_ties_even() / 10.0)
}

/// Where the data of a [`Lookup`] came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Origin {
    /// Served from the cache
    Cache {
        cached_at: DateTime<Utc>,
        #[serde(rename = "age_minutes", serialize_with = "minutes")]
        age: Duration,
        #[serde(rename = "expires_in_minutes", serialize_with = "minutes")]
        expires_in: Duration,
    },
    /// Computed by this caller
    Fresh { fresh: bool },
    /// Computed by a concurrent caller this one waited for
    Joined { note: String },
}

/// Result of a cache read or of [`RequestCoalescingCache::get_or_compute`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Lookup<V> {
    pub data: V,
    pub cached: bool,
    #[serde(flatten)]
    pub origin: Origin,
}

impl<V> Lookup<V> {
    fn fresh(data: V) -> Self {
        Self {
            data,
            cached: false,
            origin: Origin::Fresh { fresh: true },
        }
    }

    fn joined(data: V) -> Self {
        Self {
            data,
            cached: false,
            origin: Origin::Joined {
                note: "waited for active request".to_string(),
            },
        }
    }

    pub fn into_data(self) -> V {
        self.data
    }
}

/// What a caller of `get_or_compute` ends up holding for its key
enum Claim<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    Cached(Lookup<V>),
    Joined(SharedComputation<V, E>),
    /// This caller owns the new generation and must publish through `completion`
    Started {
        deregistration: Deregistration<K, V, E>,
        handle: SharedComputation<V, E>,
        completion: Completion<V, E>,
    },
}

/// TTL cache that runs at most one computation per key at a time.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct RequestCoalescingCache<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    entries: Arc<DashMap<K, CacheEntry<V>>>,
    in_flight: SharedInFlightRegistry<K, V, E>,
    pub config: CacheConfig,
}

impl<K, V, E> Clone for RequestCoalescingCache<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            in_flight: Arc::clone(&self.in_flight),
            config: self.config.clone(),
        }
    }
}

impl<K, V, E> RequestCoalescingCache<K, V, E>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(InFlightRegistry::new()),
            config,
        }
    }

    /// Get the stored value if it is younger than the default TTL
    pub fn get(&self, key: &K) -> Option<Lookup<V>> {
        self.get_with_max_age(key, None)
    }

    /// Get the stored value if it is younger than `max_age` (default TTL when `None`)
    pub fn get_with_max_age(&self, key: &K, max_age: Option<Duration>) -> Option<Lookup<V>> {
        if !self.config.enabled {
            return None;
        }

        let ttl = max_age.unwrap_or(self.config.ttl);
        let now = Utc::now();

        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(ttl, now) => {
                log::debug!("Cache hit for key: {}", key);
                let age = entry.age(now);
                return Some(Lookup {
                    data: entry.value.clone(),
                    cached: true,
                    origin: Origin::Cache {
                        cached_at: entry.created_at,
                        age,
                        expires_in: ttl - age,
                    },
                });
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            log::debug!("Cache expired for key: {}", key);
            // Only evict what is stale under the default TTL; a shorter
            // `max_age` must not take the entry away from other readers.
            let default_ttl = self.config.ttl;
            self.entries
                .remove_if(key, |_, entry| !entry.is_fresh(default_ttl, now));
        } else {
            log::debug!("Cache miss for key: {}", key);
        }
        None
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn set(&self, key: K, value: V) {
        Self::store(&self.entries, &self.config, key, value);
    }

    fn store(entries: &DashMap<K, CacheEntry<V>>, config: &CacheConfig, key: K, value: V) {
        if !config.enabled {
            return;
        }

        // Check if we need to evict old entries
        if !entries.contains_key(&key) && entries.len() >= config.max_entries {
            Self::evict_expired_from(entries, config.ttl);

            // If still at capacity, remove oldest entries
            if entries.len() >= config.max_entries {
                Self::evict_oldest_from(entries, config.max_entries);
            }
        }

        log::debug!("Stored in cache with key: {}", key);
        entries.insert(key, CacheEntry::new(value));
    }

    /// Remove every entry, or only those whose key contains `pattern`
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let before = self.entries.len();
        match pattern {
            Some(pattern) => {
                self.entries
                    .retain(|key, _| !key.to_string().contains(pattern));
            }
            None => self.entries.clear(),
        }
        let removed = before.saturating_sub(self.entries.len());
        log::info!(
            "Cache cleared ({} entries, pattern: {:?})",
            removed,
            pattern
        );
        removed
    }

    /// Serve `key` from the cache, or compute it once no matter how many
    /// callers ask concurrently.
    ///
    /// The computation runs on its own task: it completes, stores its value and
    /// releases the key even if every caller stops waiting for it.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: K,
        compute: F,
        force_refresh: bool,
    ) -> Result<Lookup<V>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if !force_refresh {
            if let Some(hit) = self.get(&key) {
                return Ok(hit);
            }
        }

        match self.claim(&key, force_refresh) {
            Claim::Cached(hit) => Ok(hit),
            Claim::Joined(handle) => handle.await.map(Lookup::joined),
            Claim::Started {
                mut deregistration,
                handle,
                completion,
            } => {
                let computation = compute();
                let entries = Arc::clone(&self.entries);
                let config = self.config.clone();

                tokio::spawn(async move {
                    let result = match AssertUnwindSafe(computation).catch_unwind().await {
                        Ok(Ok(value)) => {
                            Self::store(&entries, &config, key, value.clone());
                            Ok(value)
                        }
                        Ok(Err(err)) => Err(CacheError::Compute(err)),
                        Err(_) => {
                            log::warn!("Computation for key {} panicked", key);
                            Err(CacheError::Abandoned)
                        }
                    };
                    // Release the key before publishing, so anyone who sees the
                    // result and asks again starts a new generation.
                    deregistration.release();
                    let _ = completion.send(result);
                });

                handle.await.map(Lookup::fresh)
            }
        }
    }

    /// Join the running generation for `key` or open a new one.
    ///
    /// A previous generation may have stored its value and released the key
    /// after the caller's first read, so a new generation reads the cache once
    /// more before anything is computed.
    fn claim(&self, key: &K, force_refresh: bool) -> Claim<K, V, E> {
        match self.in_flight.register(key) {
            Registration::Joined { handle } => Claim::Joined(handle),
            Registration::Started {
                generation,
                handle,
                completion,
            } => {
                let mut deregistration =
                    Deregistration::new(Arc::clone(&self.in_flight), key.clone(), generation);

                if !force_refresh {
                    if let Some(hit) = self.get(key) {
                        deregistration.release();
                        let _ = completion.send(Ok(hit.data.clone()));
                        return Claim::Cached(hit);
                    }
                }

                Claim::Started {
                    deregistration,
                    handle,
                    completion,
                }
            }
        }
    }

    /// Remove expired entries from cache
    pub fn evict_expired(&self) -> usize {
        Self::evict_expired_from(&self.entries, self.config.ttl)
    }

    fn evict_expired_from(entries: &DashMap<K, CacheEntry<V>>, ttl: Duration) -> usize {
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(ttl, now));
        let expired_count = before.saturating_sub(entries.len());

        log::debug!("Evicted {} expired cache entries", expired_count);
        expired_count
    }

    /// Remove the oldest quarter of entries when at capacity
    fn evict_oldest_from(entries: &DashMap<K, CacheEntry<V>>, max_entries: usize) {
        let mut by_age: Vec<_> = entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();

        // Sort by creation time (oldest first)
        by_age.sort_by_key(|(_, created_at)| *created_at);

        let to_remove = (max_entries / 4).max(1);
        for (key, _) in by_age.into_iter().take(to_remove) {
            entries.remove(&key);
        }

        log::debug!("Evicted {} oldest cache entries", to_remove);
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let total_entries = self.entries.len();
        let expired_entries = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_fresh(self.config.ttl, now))
            .count();

        CacheStats {
            total_entries,
            valid_entries: total_entries.saturating_sub(expired_entries),
            expired_entries,
            in_flight: self.in_flight.len(),
            max_entries: self.config.max_entries,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_at(&self, key: K, value: V, created_at: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, created_at });
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub in_flight: usize,
    pub max_entries: usize,
}

impl std::ops::Add for CacheStats {
    type Output = CacheStats;

    fn add(self, other: CacheStats) -> CacheStats {
        CacheStats {
            total_entries: self.total_entries + other.total_entries,
            valid_entries: self.valid_entries + other.valid_entries,
            expired_entries: self.expired_entries + other.expired_entries,
            in_flight: self.in_flight + other.in_flight,
            max_entries: self.max_entries + other.max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestCache = RequestCoalescingCache<String, u32, String>;

    fn cache_with_ttl(ttl: Duration) -> TestCache {
        RequestCoalescingCache::new(CacheConfig::new(ttl, 100))
    }

    #[test]
    fn test_cache_key_display() {
        let stats = CacheKey::Stats {
            entity: "Taboola".to_string(),
            days: 30,
            limit: 20,
        };
        assert_eq!(stats.to_string(), "stats_Taboola_30_20");

        let mentions = CacheKey::Mentions {
            entity: "Taboola".to_string(),
            sentiment: Some("negative".to_string()),
            category: None,
            days: 7,
            limit: 50,
        };
        assert_eq!(mentions.to_string(), "mentions_Taboola_negative_any_7_50");
    }

    #[test]
    fn test_get_returns_metadata() {
        let cache = cache_with_ttl(Duration::minutes(5));
        cache.set("k1".to_string(), 1);

        let hit = cache.get(&"k1".to_string()).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.data, 1);
        match hit.origin {
            Origin::Cache { age, expires_in, .. } => {
                assert!(age < Duration::seconds(1));
                assert!(expires_in > Duration::minutes(4));
            }
            other => panic!("unexpected origin: {:?}", other),
        }

        let json = serde_json::to_value(cache.get(&"k1".to_string()).unwrap()).unwrap();
        assert_eq!(json["data"], 1);
        assert_eq!(json["cached"], true);
        assert!(json.get("cached_at").is_some());
        assert!(json.get("age_minutes").is_some());
        assert!(json.get("expires_in_minutes").is_some());
    }

    #[test]
    fn test_ttl_boundary_is_exclusive() {
        let cache = cache_with_ttl(Duration::minutes(10));
        let key = "k".to_string();
        let ttl = Duration::seconds(60);

        cache.set_at(key.clone(), 1, Utc::now() - Duration::seconds(50));
        assert!(cache.get_with_max_age(&key, Some(ttl)).is_some());

        cache.set_at(key.clone(), 1, Utc::now() - ttl);
        assert!(cache.get_with_max_age(&key, Some(ttl)).is_none());

        cache.set_at(key.clone(), 1, Utc::now() - Duration::seconds(61));
        assert!(cache.get_with_max_age(&key, Some(ttl)).is_none());
    }

    #[test]
    fn test_short_max_age_does_not_evict() {
        let cache = cache_with_ttl(Duration::minutes(10));
        let key = "k".to_string();
        cache.set_at(key.clone(), 3, Utc::now() - Duration::minutes(2));

        assert!(cache
            .get_with_max_age(&key, Some(Duration::minutes(1)))
            .is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).map(Lookup::into_data), Some(3));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = cache_with_ttl(Duration::minutes(1));
        let key = "k".to_string();
        cache.set_at(key.clone(), 3, Utc::now() - Duration::minutes(2));

        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_overwrites_and_refreshes() {
        let cache = cache_with_ttl(Duration::minutes(1));
        let key = "k".to_string();
        cache.set_at(key.clone(), 1, Utc::now() - Duration::minutes(5));
        cache.set(key.clone(), 2);

        assert_eq!(cache.get(&key).map(Lookup::into_data), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_by_pattern() {
        let cache = cache_with_ttl(Duration::minutes(5));
        cache.set("stats_Taboola_30_20".to_string(), 1);
        cache.set("stats_Realize_30_20".to_string(), 2);
        cache.set("mentions_Taboola_any_any_30_50".to_string(), 3);

        assert_eq!(cache.clear(Some("Taboola")), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"stats_Realize_30_20".to_string()).is_some());

        // Containment is case-sensitive
        assert_eq!(cache.clear(Some("realize")), 0);
        assert_eq!(cache.clear(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut config = CacheConfig::default();
        config.enabled = false;
        let cache: TestCache = RequestCoalescingCache::new(config);

        cache.set("k".to_string(), 1);
        assert!(cache.get(&"k".to_string()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache: TestCache = RequestCoalescingCache::new(CacheConfig::new(Duration::minutes(5), 4));
        for (i, minutes_ago) in [4, 3, 2, 1].iter().enumerate() {
            cache.set_at(
                format!("k{}", i),
                i as u32,
                Utc::now() - Duration::minutes(*minutes_ago),
            );
        }

        cache.set("k4".to_string(), 4);

        assert_eq!(cache.len(), 4);
        assert!(cache.get(&"k0".to_string()).is_none());
        assert!(cache.get(&"k4".to_string()).is_some());
    }

    #[test]
    fn test_new_generation_rechecks_cache() {
        let cache = cache_with_ttl(Duration::minutes(5));
        let key = "stats_Taboola_30_20".to_string();
        // Stored by a generation that finished after this caller's first read
        cache.set(key.clone(), 7);

        match cache.claim(&key, false) {
            Claim::Cached(hit) => {
                assert_eq!(hit.data, 7);
                assert!(hit.cached);
            }
            _ => panic!("expected the stored value"),
        }
        assert_eq!(cache.in_flight(), 0);

        assert!(matches!(cache.claim(&key, true), Claim::Started { .. }));
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_stats_counts_expired() {
        let cache = cache_with_ttl(Duration::minutes(1));
        cache.set("fresh".to_string(), 1);
        cache.set_at("stale".to_string(), 2, Utc::now() - Duration::minutes(3));

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.in_flight, 0);

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
