// Copyright 2026 alcove Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::{Display, Write},
    future::Future,
    hash::BuildHasher,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::Duration,
};

use futures_util::FutureExt;
use hashbrown::{hash_map::Entry as MapEntry, DefaultHashBuilder, HashMap};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error};

use crate::{
    barrier::QuiesceBarrier,
    compute::{ComputeExecutor, Outcome},
    entry::ScoredEntry,
    error::Result,
    Value,
};

/// Default entry-count bound.
pub const DEFAULT_MAX_SIZE: usize = 50_000;

/// Extra drain passes one eviction cycle may run when concurrent inserts that slipped past
/// the closing barrier keep the cache above bound.
const MAX_DRAIN_PASSES: usize = 4;

/// Bound and schedule of the background eviction task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Entry-count ceiling. `None` disables eviction entirely.
    pub max_size: Option<usize>,
    /// Period between eviction cycles.
    pub interval: Duration,
    /// Throttle slept between drain passes of a single cycle.
    pub cooldown: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_size: Some(DEFAULT_MAX_SIZE),
            interval: Duration::from_secs(3600),
            cooldown: Duration::from_secs(3),
        }
    }
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    shards: usize,
    compute_concurrency: usize,
    eviction: EvictionConfig,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            shards: 8,
            compute_concurrency: 2,
            eviction: EvictionConfig::default(),
        }
    }

    /// Set the shard count of the concurrent map. Rounded up to a power of two.
    ///
    /// # Panic
    ///
    /// Panics if `shards` is zero.
    pub fn with_shards(mut self, shards: usize) -> Self {
        assert!(shards > 0, "shards must be positive, given: {shards}");
        self.shards = shards;
        self
    }

    /// Bound the number of concurrently running computations.
    ///
    /// # Panic
    ///
    /// Panics if `concurrency` is zero.
    pub fn with_compute_concurrency(mut self, concurrency: usize) -> Self {
        assert!(concurrency > 0, "compute concurrency must be positive, given: {concurrency}");
        self.compute_concurrency = concurrency;
        self
    }

    /// Replace the eviction bound and schedule.
    pub fn with_eviction_config(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    /// Build the cache, spawning its eviction scheduler when a bound is configured.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Panic
    ///
    /// Panics if `max_size` is `Some(0)`; use `max_size: None` for an unbounded cache.
    pub fn build<V>(self) -> Cache<V>
    where
        V: Value,
    {
        if let Some(max_size) = self.eviction.max_size {
            assert!(max_size > 0, "max_size must be positive; use `max_size: None` to disable eviction");
        }
        let shards = self.shards.next_power_of_two();
        let inner = Arc::new(CacheInner {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            hash_builder: DefaultHashBuilder::default(),
            barrier: QuiesceBarrier::new(),
            executor: ComputeExecutor::new(self.compute_concurrency),
            eviction: self.eviction,
            scheduler: Mutex::new(None),
        });
        if inner.eviction.max_size.is_some() {
            let handle = tokio::spawn(evict_loop(Arc::downgrade(&inner)));
            *inner.scheduler.lock() = Some(handle);
        }
        Cache { inner }
    }
}

/// Process-local, thread-safe cache of asynchronously computed values keyed by strings.
///
/// Cloning shares the same cache. See the crate docs for an example.
pub struct Cache<V>
where
    V: Value,
{
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for Cache<V>
where
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CacheInner<V>
where
    V: Value,
{
    shards: Vec<RwLock<HashMap<String, Arc<ScoredEntry<V>>>>>,
    hash_builder: DefaultHashBuilder,
    barrier: QuiesceBarrier,
    executor: ComputeExecutor,
    eviction: EvictionConfig,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Cache<V>
where
    V: Value,
{
    /// Install `value` under `key`, replacing and cancelling any prior entry.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        self.put_with(key, std::future::ready(Ok(value))).await;
    }

    /// Install a computation under `key`, replacing and cancelling any prior entry.
    ///
    /// Returns as soon as the computation is submitted; [`Cache::get`] awaits its result.
    pub async fn put_with<F>(&self, key: impl Into<String>, future: F)
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        self.inner.barrier.wait().await;
        let key = key.into();
        let handle = self.inner.executor.submit(future);
        let entry = Arc::new(ScoredEntry::new(key.clone(), handle));
        let prior = self.inner.shard(&key).write().insert(key, entry);
        if let Some(prior) = prior {
            prior.handle().cancel();
        }
    }

    /// Install `value` under `key` only if the key is absent.
    pub async fn put_if_absent(&self, key: impl Into<String>, value: V) {
        self.put_if_absent_with(key, std::future::ready(Ok(value))).await;
    }

    /// Install a computation under `key` only if the key is absent.
    ///
    /// Decided under the shard write lock: with racing calls for the same key exactly one
    /// computation is submitted, and the losers' futures are dropped unsubmitted.
    pub async fn put_if_absent_with<F>(&self, key: impl Into<String>, future: F)
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        self.inner.barrier.wait().await;
        let key = key.into();
        let mut shard = self.inner.shard(&key).write();
        match shard.entry(key) {
            MapEntry::Occupied(_) => {}
            MapEntry::Vacant(vacant) => {
                let handle = self.inner.executor.submit(future);
                let entry = Arc::new(ScoredEntry::new(vacant.key().clone(), handle));
                vacant.insert(entry);
            }
        }
    }

    /// Look up `key`, awaiting its computation if it is still running.
    ///
    /// Returns `None` when the key is absent or its computation failed or was cancelled.
    /// A present entry is touched exactly once either way.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.barrier.wait().await;
        let entry = self.inner.shard(key).read().get(key).cloned()?;
        entry.touch();
        match entry.handle().outcome().await {
            Outcome::Completed(value) => Some(value),
            Outcome::Failed(_) | Outcome::Cancelled => None,
        }
    }

    /// Current entry count. Point-in-time only; concurrent mutation may be missed.
    pub async fn size(&self) -> usize {
        self.inner.barrier.wait().await;
        self.inner.len()
    }

    /// Stop the eviction scheduler and the compute pool, cancel in-flight computations,
    /// and release every barrier waiter. Idempotent; never leaves a caller blocked.
    pub fn shutdown(&self) {
        if let Some(scheduler) = self.inner.scheduler.lock().take() {
            scheduler.abort();
        }
        self.inner.executor.shutdown();
        for entry in self.inner.entries() {
            entry.handle().cancel();
        }
        self.inner.barrier.force_terminate();
        debug!("cache shut down");
    }
}

impl<V> Cache<V>
where
    V: Value + Display,
{
    /// Write one `key:value(accesses)` line per entry to `sink`.
    ///
    /// Entries whose computation failed render as `key:null`; cancelled entries are
    /// omitted. Listing does not touch access metadata.
    pub async fn snapshot<W>(&self, sink: &mut W) -> Result<()>
    where
        W: Write,
    {
        self.inner.barrier.wait().await;
        for entry in self.inner.entries() {
            match entry.handle().outcome().await {
                Outcome::Completed(value) => {
                    writeln!(sink, "{}:{}({})", entry.key(), value, entry.accesses())?;
                }
                Outcome::Failed(_) => writeln!(sink, "{}:null", entry.key())?,
                Outcome::Cancelled => {}
            }
        }
        Ok(())
    }
}

impl<V> CacheInner<V>
where
    V: Value,
{
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Arc<ScoredEntry<V>>>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize & (self.shards.len() - 1)]
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    fn entries(&self) -> Vec<Arc<ScoredEntry<V>>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    async fn evict_once(&self) {
        let Some(max_size) = self.eviction.max_size else { return };
        if self.len() <= max_size {
            return;
        }
        self.barrier.close();
        if let Err(panic) = AssertUnwindSafe(self.drain(max_size)).catch_unwind().await {
            let reason = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            error!("eviction cycle aborted: {reason}");
        }
        // The barrier reopens on every path, panicking drains included.
        self.barrier.open();
    }

    async fn drain(&self, max_size: usize) {
        for pass in 0..MAX_DRAIN_PASSES {
            let excess = self.len().saturating_sub(max_size);
            if excess == 0 {
                return;
            }
            if pass > 0 {
                // Inserts that passed the barrier as it closed may keep the cache above
                // bound; throttle instead of spinning on the live size.
                tokio::time::sleep(self.eviction.cooldown).await;
            }

            let entries = self.entries();
            let max_last_access_ms = entries.iter().map(|entry| entry.last_access_ms()).max().unwrap_or(0);
            let mut ranked: Vec<_> = entries
                .into_iter()
                .map(|entry| (entry.score(max_last_access_ms), entry))
                .collect();
            // One ranking per pass; no per-removal rebuild.
            ranked.sort_by(|(left, _), (right, _)| left.total_cmp(right));
            for (_, entry) in ranked.into_iter().take(excess) {
                self.shard(entry.key()).write().remove(entry.key());
            }
            debug!(pass, excess, "eviction drain pass");
        }
    }
}

async fn evict_loop<V>(inner: Weak<CacheInner<V>>)
where
    V: Value,
{
    let period = match inner.upgrade() {
        Some(inner) => inner.eviction.interval,
        None => return,
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        // The scheduler holds only a weak reference so a cache dropped without an
        // explicit shutdown can still be reclaimed.
        let Some(inner) = inner.upgrade() else { return };
        inner.evict_once().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures_util::future::join_all;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tokio::time::timeout;

    use super::*;
    use crate::error::Error;

    fn unbounded() -> CacheBuilder {
        CacheBuilder::new().with_eviction_config(EvictionConfig {
            max_size: None,
            ..Default::default()
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_get_missing_key() {
        let cache: Cache<String> = unbounded().build();
        assert_eq!(cache.get("missing").await, None);
        assert_eq!(cache.size().await, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_put_then_get() {
        let cache = unbounded().build();
        cache.put("one", "A".to_string()).await;
        assert_eq!(cache.get("one").await.as_deref(), Some("A"));
        assert_eq!(cache.size().await, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_awaits_running_computation() {
        let cache = unbounded().build();
        cache
            .put_with("slow", async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("done".to_string())
            })
            .await;
        assert_eq!(cache.get("slow").await.as_deref(), Some("done"));
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_computation_is_absent_but_entry_remains() {
        let cache: Cache<String> = unbounded().build();
        cache.put_with("bad", async { Err(Error::compute("boom")) }).await;

        assert_eq!(cache.get("bad").await, None);
        assert_eq!(cache.size().await, 1);

        let mut listing = String::new();
        cache.snapshot(&mut listing).await.unwrap();
        assert_eq!(listing.trim(), "bad:null");
    }

    #[test_log::test(tokio::test)]
    async fn test_snapshot_omits_cancelled_entries() {
        let cache: Cache<String> = unbounded().build();
        cache.put("done", "A".to_string()).await;
        assert_eq!(cache.get("done").await.as_deref(), Some("A"));
        cache
            .put_with("pending", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("never".to_string())
            })
            .await;

        // Cancels the pending computation; the entry itself stays in the map.
        cache.shutdown();

        assert_eq!(cache.size().await, 2);
        let mut listing = String::new();
        cache.snapshot(&mut listing).await.unwrap();
        assert_eq!(listing.trim(), "done:A(2)");
    }

    #[test]
    #[should_panic(expected = "compute concurrency must be positive")]
    fn test_builder_rejects_zero_compute_concurrency() {
        let _ = CacheBuilder::new().with_compute_concurrency(0);
    }

    #[test_log::test(tokio::test)]
    async fn test_overwrite_cancels_prior_computation() {
        let cache = unbounded().build();
        let first_ran = Arc::new(AtomicBool::new(false));
        cache
            .put_with("k", {
                let first_ran = first_ran.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    first_ran.store(true, Ordering::SeqCst);
                    Ok("v1".to_string())
                }
            })
            .await;
        cache.put("k", "v2".to_string()).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!first_ran.load(Ordering::SeqCst));
    }

    #[test_log::test(tokio::test)]
    async fn test_put_if_absent_races_submit_exactly_once() {
        let cache: Cache<u64> = unbounded().build();
        let submissions = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let submissions = submissions.clone();
                tokio::spawn(async move {
                    cache
                        .put_if_absent_with("k", async move {
                            submissions.fetch_add(1, Ordering::SeqCst);
                            Ok(i)
                        })
                        .await;
                })
            })
            .collect();
        for call in join_all(calls).await {
            call.unwrap();
        }

        let value = cache.get("k").await.unwrap();
        assert_eq!(submissions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size().await, 1);
        // Every caller observes the winner's value.
        assert_eq!(cache.get("k").await, Some(value));
    }

    #[test_log::test(tokio::test)]
    async fn test_snapshot_listing() {
        let cache = unbounded().build();
        cache.put("one", "A".to_string()).await;
        cache.put("two", "B".to_string()).await;
        cache.put("three", "C".to_string()).await;
        assert_eq!(cache.get("two").await.as_deref(), Some("B"));

        let mut listing = String::new();
        cache.snapshot(&mut listing).await.unwrap();
        let mut lines: Vec<_> = listing.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["one:A(1)", "three:C(1)", "two:B(2)"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_eviction_drains_to_bound_and_keeps_high_scores() {
        let cache: Cache<u64> = CacheBuilder::new()
            .with_eviction_config(EvictionConfig {
                max_size: Some(5),
                interval: Duration::from_millis(200),
                cooldown: Duration::from_millis(10),
            })
            .build();

        for i in 0..100u64 {
            cache.put_if_absent(format!("key-{i:03}"), i).await;
        }
        // Make the last five both recent and popular.
        for i in 95..100u64 {
            for _ in 0..5 {
                assert_eq!(cache.get(&format!("key-{i:03}")).await, Some(i));
            }
        }

        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(cache.size().await, 5);
        for i in 95..100u64 {
            assert_eq!(cache.get(&format!("key-{i:03}")).await, Some(i));
        }
        cache.shutdown();
    }

    #[test_log::test(tokio::test)]
    async fn test_unbounded_cache_never_evicts() {
        let cache: Cache<u64> = unbounded()
            .with_eviction_config(EvictionConfig {
                max_size: None,
                interval: Duration::from_millis(50),
                cooldown: Duration::from_millis(10),
            })
            .build();
        for i in 0..100u64 {
            cache.put(format!("key-{i}"), i).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.size().await, 100);
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_releases_blocked_callers() {
        let cache: Cache<u64> = unbounded().build();
        cache
            .put_with("pending", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            })
            .await;

        let blocked = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("pending").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        cache.shutdown();
        let got = timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
        assert_eq!(got, None);

        // Operations after shutdown return immediately instead of hanging.
        assert_eq!(timeout(Duration::from_secs(1), cache.get("pending")).await.unwrap(), None);
        cache.shutdown();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_concurrent_random_operations() {
        let cache: Cache<u64> = CacheBuilder::new()
            .with_shards(4)
            .with_compute_concurrency(4)
            .with_eviction_config(EvictionConfig {
                max_size: Some(32),
                interval: Duration::from_millis(50),
                cooldown: Duration::from_millis(1),
            })
            .build();

        let tasks: Vec<_> = (0..8)
            .map(|seed| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..1000 {
                        let i = rng.random_range(0..64u64);
                        let key = format!("key-{i}");
                        match rng.random_range(0..3) {
                            0 => cache.put(key, i).await,
                            1 => cache.put_if_absent(key, i).await,
                            2 => {
                                if let Some(value) = cache.get(&key).await {
                                    assert_eq!(value, i);
                                }
                            }
                            _ => unreachable!(),
                        }
                    }
                })
            })
            .collect();
        for task in join_all(tasks).await {
            task.unwrap();
        }
        cache.shutdown();
    }
}
