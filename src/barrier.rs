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

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Closed,
    Terminated,
}

/// Cooperative pause gate that lets the eviction task suspend every cache operation,
/// drain the map, and release all waiters atomically.
///
/// Built on a watch channel rather than a boolean flag: the channel versions each state
/// transition, so a caller racing [`QuiesceBarrier::open`] either sees the open state
/// before parking or is woken by the transition. A plain flag can be reset before a
/// late-arriving waiter rechecks it, leaving the waiter parked forever.
#[derive(Debug)]
pub struct QuiesceBarrier {
    gate: watch::Sender<Gate>,
}

impl Default for QuiesceBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiesceBarrier {
    /// Create an open barrier.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(Gate::Open);
        Self { gate }
    }

    /// Suspend while the barrier is closed; return immediately otherwise.
    pub async fn wait(&self) {
        let mut rx = self.gate.subscribe();
        // `wait_for` inspects the current value before parking.
        let _ = rx.wait_for(|gate| *gate != Gate::Closed).await;
    }

    /// Close the gate. Idempotent, and a no-op once terminated.
    pub fn close(&self) {
        self.gate.send_if_modified(|gate| match gate {
            Gate::Open => {
                *gate = Gate::Closed;
                true
            }
            Gate::Closed | Gate::Terminated => false,
        });
    }

    /// Reopen the gate, releasing every current waiter as one atomic advance. Waiters
    /// arriving afterwards observe the open state and pass through immediately.
    pub fn open(&self) {
        self.gate.send_if_modified(|gate| match gate {
            Gate::Closed => {
                *gate = Gate::Open;
                true
            }
            Gate::Open | Gate::Terminated => false,
        });
    }

    /// Unconditionally release all waiters, present and future. Used on shutdown; the
    /// barrier never closes again afterwards.
    pub fn force_terminate(&self) {
        self.gate.send_replace(Gate::Terminated);
    }

    /// Whether the gate is currently closed.
    pub(crate) fn is_closed(&self) -> bool {
        *self.gate.borrow() == Gate::Closed
    }
}
