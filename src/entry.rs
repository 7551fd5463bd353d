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
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::compute::TaskHandle;

/// One cache slot: the handle of the computation currently associated with a key, plus the
/// access metadata that feeds the eviction score.
///
/// Entries are never mutated in place beyond their atomic counters; overwriting a key
/// swaps a whole new entry into the map and cancels the old entry's handle.
pub struct ScoredEntry<V> {
    key: String,
    handle: TaskHandle<V>,
    accesses: AtomicU64,
    last_access_ms: AtomicU64,
}

impl<V> ScoredEntry<V> {
    pub(crate) fn new(key: String, handle: TaskHandle<V>) -> Self {
        Self {
            key,
            handle,
            accesses: AtomicU64::new(1),
            last_access_ms: AtomicU64::new(unix_now_ms()),
        }
    }

    /// Key this entry is indexed by.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Handle of the entry's computation.
    pub fn handle(&self) -> &TaskHandle<V> {
        &self.handle
    }

    /// Times the entry has been looked up, counting its insertion.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Unix-epoch milliseconds of the most recent lookup.
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    /// Record a lookup: bump the counter and refresh the timestamp.
    pub fn touch(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        self.last_access_ms.store(unix_now_ms(), Ordering::Relaxed);
    }

    /// Eviction rank: recency normalized against the newest timestamp in the candidate
    /// set, weighted by raw access frequency. Lowest goes first.
    ///
    /// A single-entry candidate set normalizes to weight 1, and an entry accessed often
    /// long ago can outrank a freshly created, never-read one.
    pub fn score(&self, max_last_access_ms: u64) -> f64 {
        let recency = self.last_access_ms() as f64 / max_last_access_ms.max(1) as f64;
        recency * self.accesses() as f64
    }

    #[cfg(test)]
    pub(crate) fn set_last_access_ms(&self, ms: u64) {
        self.last_access_ms.store(ms, Ordering::Relaxed);
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeExecutor;

    fn entry(executor: &ComputeExecutor, key: &str) -> ScoredEntry<u64> {
        ScoredEntry::new(key.to_string(), executor.submit(async { Ok(0) }))
    }

    #[tokio::test]
    async fn test_touch_updates_count_and_timestamp() {
        let executor = ComputeExecutor::new(2);
        let e = entry(&executor, "k");
        assert_eq!(e.accesses(), 1);

        let before = e.last_access_ms();
        e.touch();
        assert_eq!(e.accesses(), 2);
        assert!(e.last_access_ms() >= before);
    }

    #[tokio::test]
    async fn test_score_orders_old_and_rare_first() {
        let executor = ComputeExecutor::new(2);
        let old_rare = entry(&executor, "old");
        let fresh = entry(&executor, "fresh");
        let old_popular = entry(&executor, "popular");

        for _ in 0..100 {
            old_popular.touch();
        }
        old_rare.set_last_access_ms(1_000);
        old_popular.set_last_access_ms(1_000);
        fresh.set_last_access_ms(2_000);

        let max = 2_000;
        assert!(old_rare.score(max) < fresh.score(max));
        // Heavily used long ago still beats fresh but never read.
        assert!(old_popular.score(max) > fresh.score(max));
    }

    #[tokio::test]
    async fn test_single_candidate_normalizes_to_one() {
        let executor = ComputeExecutor::new(2);
        let e = entry(&executor, "only");
        let score = e.score(e.last_access_ms());
        assert!((score - e.accesses() as f64).abs() < f64::EPSILON);
    }
}
