use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Failure observed by callers of a coalesced computation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError<E> {
    /// The computation itself failed; the value is the computation's own error.
    #[error("{0}")]
    Compute(E),
    /// The computation went away without producing a result (it panicked).
    #[error("computation was abandoned before completing")]
    Abandoned,
}

/// Shared, awaitable handle to the pending result of one generation.
pub type SharedComputation<V, E> = Shared<BoxFuture<'static, Result<V, CacheError<E>>>>;

/// Sending half of a generation. Whoever owns it publishes the result.
pub type Completion<V, E> = oneshot::Sender<Result<V, CacheError<E>>>;

struct Pending<V, E>
where
    V: Clone,
    E: Clone,
{
    generation: u64,
    started_at: DateTime<Utc>,
    handle: SharedComputation<V, E>,
}

/// Outcome of registering interest in a key.
pub enum Registration<V, E>
where
    V: Clone,
    E: Clone,
{
    /// No computation was running; the caller now owns a fresh generation and
    /// must publish its result through `completion`.
    Started {
        generation: u64,
        handle: SharedComputation<V, E>,
        completion: Completion<V, E>,
    },
    /// Another caller's computation is running; await `handle`.
    Joined { handle: SharedComputation<V, E> },
}

/// Registry of computations currently running, at most one per key.
///
/// Registration is a single `entry()` call on the map, so two callers can never
/// both observe "not in flight" for the same key.
pub struct InFlightRegistry<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    pending: DashMap<K, Pending<V, E>>,
    next_generation: AtomicU64,
}

impl<K, V, E> Default for InFlightRegistry<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> InFlightRegistry<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Join the running generation for `key`, or open a new one.
    pub fn register(&self, key: &K) -> Registration<V, E> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                log::debug!(
                    "Joining in-flight computation for key: {} (generation {})",
                    key,
                    entry.get().generation
                );
                Registration::Joined {
                    handle: entry.get().handle.clone(),
                }
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (completion, receiver) = oneshot::channel();
                let handle = receiver
                    .map(|received| match received {
                        Ok(result) => result,
                        Err(_) => Err(CacheError::Abandoned),
                    })
                    .boxed()
                    .shared();

                entry.insert(Pending {
                    generation,
                    started_at: Utc::now(),
                    handle: handle.clone(),
                });
                log::debug!(
                    "Registered computation for key: {} (generation {})",
                    key,
                    generation
                );

                Registration::Started {
                    generation,
                    handle,
                    completion,
                }
            }
        }
    }

    /// Remove the entry for `key` if it still belongs to `generation`.
    ///
    /// Returns whether an entry was removed. Safe to call more than once.
    pub fn deregister(&self, key: &K, generation: u64) -> bool {
        let removed = self
            .pending
            .remove_if(key, |_, pending| pending.generation == generation)
            .is_some();
        if removed {
            log::debug!(
                "Deregistered computation for key: {} (generation {})",
                key,
                generation
            );
        }
        removed
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// When the running computation for `key` was started, if any.
    pub fn started_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.pending.get(key).map(|pending| pending.started_at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Deregisters a generation when dropped, so every exit path of the owning
/// task (including a panic) releases the key.
pub struct Deregistration<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    registry: Arc<InFlightRegistry<K, V, E>>,
    key: K,
    generation: u64,
    released: bool,
}

impl<K, V, E> Deregistration<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(registry: Arc<InFlightRegistry<K, V, E>>, key: K, generation: u64) -> Self {
        Self {
            registry,
            key,
            generation,
            released: false,
        }
    }

    /// Deregister now instead of at drop time.
    pub fn release(&mut self) {
        if !self.released {
            self.registry.deregister(&self.key, self.generation);
            self.released = true;
        }
    }
}

impl<K, V, E> Drop for Deregistration<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.release();
    }
}

/// Thread-safe wrapper for the registry
pub type SharedInFlightRegistry<K, V, E> = Arc<InFlightRegistry<K, V, E>>;
