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

//! Re-entrant named advisory locks across processes.
//!
//! Cooperating processes serialize access to named resources through a
//! pluggable external facility; within a process, a fair queue multiplexes
//! the single external token across all requesters of a name.
//!
//! ## Core Features
//!
//! 1. **Two-tier locking** - an in-process FIFO on top of one external
//!    exclusive token, so same-process contention costs no provider traffic
//! 2. **Re-entrancy by flow** - nested acquisitions on the same logical
//!    [`ContextId`] are granted immediately as secondaries of the held lock
//! 3. **Cross-process liveness** - waiters publish a shared request marker;
//!    a releasing holder that sees one hands the token off and backs off
//!    before reacquiring
//! 4. **Cancellation and timeouts** - every acquisition runs under a
//!    [`CancelToken`]; a seconds budget is sugar for a deadline token and a
//!    zero budget is a single try
//! 5. **RAII holds** - a granted [`LockHandle`] releases on drop, panic
//!    included
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnlock::{LockManager, providers::fs::FsLockProvider};
//!
//! let provider = Arc::new(FsLockProvider::new("/var/lock/myapp")?);
//! let manager = LockManager::new(provider);
//!
//! let handle = manager.acquire("indexer", "jobs/reindex", 30u64)?;
//! // ... critical section ...
//! drop(handle);
//! # Ok::<(), turnlock::LockError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod manager;
pub mod provider;
pub mod providers;
pub mod proxy;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::LockConfig;
pub use context::{ContextId, ContextScope};
pub use error::{LockError, Result};
pub use handle::LockHandle;
pub use manager::LockManager;
pub use provider::{BoxedToken, ExternalLockProvider, LockToken};
pub use proxy::LockProxy;
pub use types::{CancelToken, HandleInfo, WaitLimit};

/// Delay between provider acquisition attempts
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(16);

/// Window after a cross-process handoff during which reacquisition is suppressed
pub const BACKOFF_DELAY: std::time::Duration = std::time::Duration::from_millis(48);
