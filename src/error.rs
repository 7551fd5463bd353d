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

/// Cache error.
///
/// Normal operations never raise one of these to the caller: a failed or cancelled
/// computation surfaces as an absent value. Errors appear only as the payload of
/// [`Outcome::Failed`](crate::Outcome::Failed) and from the snapshot sink.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A submitted computation returned an error.
    #[error("compute task failed: {0}")]
    Compute(Box<dyn std::error::Error + Send + Sync>),
    /// Writing the snapshot listing to its sink failed.
    #[error("snapshot sink error: {0}")]
    Sink(#[from] std::fmt::Error),
}

impl Error {
    /// Wrap an arbitrary computation error.
    pub fn compute(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Compute(err.into())
    }
}

/// Cache result.
pub type Result<T> = std::result::Result<T, Error>;
