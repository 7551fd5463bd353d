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

//! alcove is a self-pruning, process-local cache for asynchronously computed values.
//!
//! Callers submit string keys paired with a ready value or an async computation. The
//! computation runs on a bounded pool and [`Cache::get`] awaits its result. Once the entry
//! count exceeds the configured bound, a background task evicts the lowest-scoring entries
//! (normalized recency × access frequency), pausing all cache operations behind a
//! [`QuiesceBarrier`] while it drains so no caller observes the map mid-scan.
//!
//! # Example
//!
//! ```
//! use alcove::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: Cache<String> = CacheBuilder::new().build();
//!
//! cache.put("greeting", "hello".to_string()).await;
//! cache
//!     .put_if_absent_with("answer", async { Ok(6u32.to_string()) })
//!     .await;
//!
//! assert_eq!(cache.get("greeting").await.as_deref(), Some("hello"));
//! assert_eq!(cache.get("answer").await.as_deref(), Some("6"));
//!
//! cache.shutdown();
//! # }
//! ```

mod barrier;
mod cache;
mod compute;
mod entry;
mod error;

pub mod prelude;

pub use barrier::QuiesceBarrier;
pub use cache::{Cache, CacheBuilder, EvictionConfig, DEFAULT_MAX_SIZE};
pub use compute::{ComputeExecutor, Outcome, TaskHandle};
pub use entry::ScoredEntry;
pub use error::{Error, Result};

/// Requirements on cached values.
///
/// Values are cloned out of the cache on lookup and cross task boundaries on the compute
/// pool, so they are expected to be cheap to clone (or wrapped in an `Arc`).
pub trait Value: Send + Sync + Clone + 'static {}
impl<T> Value for T where T: Send + Sync + Clone + 'static {}
