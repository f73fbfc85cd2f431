//! Bounded memoization of topic classifications.
//!
//! Classification is a pure function of the exact question text, so repeated questions reuse the
//! stored verdict instead of calling the model again. The cache holds at most `capacity` entries
//! and evicts the least recently used one; an optional time-to-live bounds staleness. Time comes
//! from an injectable [`Clock`] so expiry can be tested without sleeping.

use super::{CapabilityError, TopicClassification, TopicClassifier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry {
    classification: TopicClassification,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters of a [`CachedTopicClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups forwarded to the inner classifier.
    pub misses: u64,
    /// Entries currently stored.
    pub entries: usize,
}

/// Decorator that memoizes another [`TopicClassifier`].
pub struct CachedTopicClassifier<C> {
    inner: C,
    capacity: usize,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl<C> CachedTopicClassifier<C> {
    /// Cache up to `capacity` classifications using the system clock and no expiry.
    pub fn new(inner: C, capacity: usize) -> Self {
        Self::with_clock(inner, capacity, None, Arc::new(SystemClock))
    }

    /// Cache with an explicit time-to-live and clock.
    pub fn with_clock(
        inner: C,
        capacity: usize,
        ttl: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner,
            capacity,
            ttl,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // A poisoned cache only loses memoized values; keep serving.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, question: &str) -> Option<TopicClassification> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;

        let expired = state.entries.get(question).map(|entry| {
            self.ttl
                .is_some_and(|ttl| now.saturating_duration_since(entry.stored_at) >= ttl)
        });
        match expired {
            None => {
                state.misses += 1;
                return None;
            }
            Some(true) => {
                state.entries.remove(question);
                state.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        state.hits += 1;
        let entry = state.entries.get_mut(question)?;
        entry.last_used = tick;
        Some(entry.classification.clone())
    }

    fn store(&self, question: &str, classification: &TopicClassification) {
        if self.capacity == 0 {
            return;
        }
        let now = self.clock.now();
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;

        if !state.entries.contains_key(question) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                state.entries.remove(&key);
            }
        }

        state.entries.insert(
            question.to_string(),
            Entry {
                classification: classification.clone(),
                stored_at: now,
                last_used: tick,
            },
        );
    }
}

#[async_trait]
impl<C> TopicClassifier for CachedTopicClassifier<C>
where
    C: TopicClassifier,
{
    async fn classify(&self, question: &str) -> Result<TopicClassification, CapabilityError> {
        if let Some(cached) = self.lookup(question) {
            tracing::debug!("Topic classification served from cache");
            return Ok(cached);
        }
        let classification = self.inner.classify(question).await?;
        self.store(question, &classification);
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TopicVerdict;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TopicClassifier for CountingClassifier {
        async fn classify(&self, question: &str) -> Result<TopicClassification, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let verdict = if question.contains("order") {
                TopicVerdict::Yes
            } else {
                TopicVerdict::No
            };
            Ok(TopicClassification {
                verdict,
                confidence: 0.9,
                reason: String::new(),
            })
        }
    }

    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn repeated_question_hits_cache() {
        let inner = CountingClassifier::default();
        let calls = inner.calls.clone();
        let cache = CachedTopicClassifier::new(inner, 10);

        let first = cache.classify("Where is my order?").await.expect("first");
        let second = cache.classify("Where is my order?").await.expect("second");

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn distinct_questions_do_not_share_entries() {
        let inner = CountingClassifier::default();
        let calls = inner.calls.clone();
        let cache = CachedTopicClassifier::new(inner, 10);

        let on_topic = cache.classify("cancel my order").await.expect("on topic");
        let off_topic = cache.classify("capital of France").await.expect("off topic");

        assert_eq!(on_topic.verdict, TopicVerdict::Yes);
        assert_eq!(off_topic.verdict, TopicVerdict::No);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let inner = CountingClassifier::default();
        let calls = inner.calls.clone();
        let cache = CachedTopicClassifier::new(inner, 2);

        cache.classify("a").await.expect("a");
        cache.classify("b").await.expect("b");
        cache.classify("a").await.expect("a again");
        cache.classify("c").await.expect("c evicts b");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cache.classify("a").await.expect("a still cached");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cache.classify("b").await.expect("b was evicted");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let inner = CountingClassifier::default();
        let calls = inner.calls.clone();
        let clock = Arc::new(ManualClock::new());
        let cache = CachedTopicClassifier::with_clock(
            inner,
            10,
            Some(Duration::from_secs(60)),
            clock.clone(),
        );

        cache.classify("order status").await.expect("first");
        clock.advance(Duration::from_secs(30));
        cache.classify("order status").await.expect("fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(31));
        cache.classify("order status").await.expect("expired");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_capacity_disables_memoization() {
        let inner = CountingClassifier::default();
        let calls = inner.calls.clone();
        let cache = CachedTopicClassifier::new(inner, 0);

        cache.classify("order").await.expect("first");
        cache.classify("order").await.expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
