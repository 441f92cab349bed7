// Copyright 2024 RustFS Team
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

//! Logical-flow identity for re-entrancy detection.
//!
//! Re-entrancy is keyed by logical caller, not by OS thread: nested
//! acquisitions on the same flow observe the held lock, unrelated flows do
//! not. Each thread carries an ambient [`ContextId`], materialized on first
//! read. A flow that hands work to another thread propagates its identity
//! explicitly with [`ContextScope`]; a flow that spawns independent work
//! isolates it with [`ContextId::barrier`].

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use uuid::Uuid;

thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Opaque 128-bit identity of a logical execution flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// The ambient identity of the current flow, materializing one on first read
    pub fn current() -> Self {
        CURRENT.with(|cell| match cell.get() {
            Some(id) => id,
            None => {
                let id = Self::fresh();
                cell.set(Some(id));
                id
            }
        })
    }

    /// Install a fresh identity in the current flow only and return it.
    ///
    /// Call this at the entry of work that must not inherit the spawning
    /// flow's lock ownership.
    pub fn barrier() -> Self {
        let id = Self::fresh();
        CURRENT.with(|cell| cell.set(Some(id)));
        id
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guard that installs a given flow identity on the current thread and
/// restores the previous one on drop.
///
/// This is how a flow is carried into a worker thread so that nested
/// acquisitions there are recognized as re-entrant:
///
/// ```
/// use turnlock::{ContextId, ContextScope};
///
/// let flow = ContextId::current();
/// std::thread::spawn(move || {
///     let _scope = ContextScope::enter(flow);
///     assert_eq!(ContextId::current(), flow);
/// })
/// .join()
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct ContextScope {
    previous: Option<ContextId>,
}

impl ContextScope {
    /// Install `id` as the current flow identity
    pub fn enter(id: ContextId) -> Self {
        let previous = CURRENT.with(|cell| cell.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        let previous = self.previous;
        CURRENT.with(|cell| cell.set(previous));
    }
}
