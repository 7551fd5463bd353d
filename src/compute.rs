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

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{watch, Semaphore},
    task::AbortHandle,
};
use tracing::warn;

use crate::{
    error::{Error, Result},
    Value,
};

/// Completion state of a submitted computation.
#[derive(Clone)]
pub enum Outcome<V> {
    /// The computation ran to completion and produced a value.
    Completed(V),
    /// The computation returned an error.
    Failed(Arc<Error>),
    /// The computation was cancelled before it could publish a value.
    Cancelled,
}

/// Handle to an in-flight or finished computation.
///
/// Cloning is cheap and all clones observe the same outcome.
#[derive(Clone)]
pub struct TaskHandle<V> {
    outcome: watch::Receiver<Option<Outcome<V>>>,
    abort: AbortHandle,
}

impl<V> TaskHandle<V>
where
    V: Value,
{
    /// Await the computation's outcome.
    ///
    /// A channel that closes before anything was published means the wrapper task was
    /// aborted, which is reported as [`Outcome::Cancelled`].
    pub async fn outcome(&self) -> Outcome<V> {
        let mut rx = self.outcome.clone();
        let published = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(published) => published.as_ref().cloned(),
            Err(_) => None,
        };
        published.unwrap_or(Outcome::Cancelled)
    }

    /// Request cancellation.
    ///
    /// Best-effort and non-blocking: the task may still be running when this returns, but
    /// a task aborted before publishing resolves as [`Outcome::Cancelled`] for every
    /// waiter.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// Bounded pool executing submitted computations as tokio tasks.
pub struct ComputeExecutor {
    permits: Arc<Semaphore>,
}

impl ComputeExecutor {
    /// Create a pool running at most `concurrency` computations at once.
    ///
    /// # Panic
    ///
    /// Panics if `concurrency` is zero.
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency > 0, "compute concurrency must be positive, given: {concurrency}");
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Spawn `future` onto the pool and return a handle to its outcome.
    ///
    /// Must be called within a tokio runtime.
    pub fn submit<V, F>(&self, future: F) -> TaskHandle<V>
    where
        V: Value,
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let permits = self.permits.clone();
        let task = tokio::spawn(async move {
            // A closed pool rejects computations still queued for a permit; dropping `tx`
            // without publishing resolves their waiters as cancelled.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let outcome = match future.await {
                Ok(value) => Outcome::Completed(value),
                Err(e) => {
                    warn!("compute task failed: {e}");
                    Outcome::Failed(Arc::new(e))
                }
            };
            let _ = tx.send(Some(outcome));
        });
        TaskHandle {
            outcome: rx,
            abort: task.abort_handle(),
        }
    }

    /// Close the pool.
    ///
    /// Computations still waiting for a permit resolve as cancelled. Running ones are left
    /// to the per-entry cancellation performed by the cache on shutdown.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}
