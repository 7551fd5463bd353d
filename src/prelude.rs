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

//! Flat re-export of the crate's public API.

pub use crate::{
    barrier::QuiesceBarrier,
    cache::{Cache, CacheBuilder, EvictionConfig, DEFAULT_MAX_SIZE},
    compute::{ComputeExecutor, Outcome, TaskHandle},
    entry::ScoredEntry,
    error::{Error, Result},
    Value,
};
