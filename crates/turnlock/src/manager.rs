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

use crate::config::LockConfig;
use crate::context::ContextId;
use crate::error::{LockError, Result};
use crate::handle::{HandleCore, LockHandle};
use crate::provider::ExternalLockProvider;
use crate::proxy::{CheckTurn, LockProxy};
use crate::types::WaitLimit;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

/// Concurrent name-to-coordinator mapping, keyed case-insensitively.
///
/// Removal is by value identity: a coordinator retiring itself only takes
/// the entry out if the map still points at that very coordinator, so a
/// racing recreation of the name is left alone.
pub(crate) struct ProxyRegistry {
    proxies: DashMap<String, Arc<LockProxy>>,
}

impl ProxyRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self { proxies: DashMap::new() })
    }

    fn get_or_create(
        self: &Arc<Self>,
        name: &str,
        provider: &Arc<dyn ExternalLockProvider>,
        config: &LockConfig,
    ) -> Arc<LockProxy> {
        let key = name.to_ascii_lowercase();
        loop {
            let proxy = self
                .proxies
                .entry(key.clone())
                .or_insert_with(|| {
                    LockProxy::new(
                        Arc::from(name),
                        key.clone(),
                        provider.clone(),
                        config.clone(),
                        Arc::downgrade(self),
                    )
                })
                .clone();

            if !proxy.is_disposed() {
                return proxy;
            }
            // A retired coordinator may linger briefly between its disposal
            // and its registry removal; clear it and build a fresh one.
            self.proxies.remove_if(&key, |_, value| Arc::ptr_eq(value, &proxy));
        }
    }

    pub(crate) fn remove_value(&self, key: &str, proxy: &Arc<LockProxy>) {
        self.proxies.remove_if(key, |_, value| Arc::ptr_eq(value, proxy));
    }

    fn len(&self) -> usize {
        self.proxies.len()
    }
}

/// Public entry point of the lock service.
///
/// A manager serializes acquisitions of each name across flows, threads and
/// (through the provider) processes. Re-entrant acquisitions on the same
/// logical flow are granted immediately as secondaries of the current hold.
///
/// ```no_run
/// use std::sync::Arc;
/// use turnlock::{LockManager, providers::memory::MemoryLockProvider};
///
/// let manager = LockManager::new(Arc::new(MemoryLockProvider::new()));
/// let handle = manager.acquire("indexer", "jobs/reindex", 60u64)?;
/// // ... critical section ...
/// drop(handle);
/// # Ok::<(), turnlock::LockError>(())
/// ```
pub struct LockManager {
    provider: Arc<dyn ExternalLockProvider>,
    config: LockConfig,
    registry: Arc<ProxyRegistry>,
}

impl LockManager {
    /// Create a manager over `provider` with the default configuration
    pub fn new(provider: Arc<dyn ExternalLockProvider>) -> Self {
        Self::with_config(provider, LockConfig::default())
    }

    /// Create a manager with a custom configuration
    pub fn with_config(provider: Arc<dyn ExternalLockProvider>, config: LockConfig) -> Self {
        Self {
            provider,
            config,
            registry: ProxyRegistry::new(),
        }
    }

    /// Provider identity, used in timeout errors
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Acquire the named lock, waiting up to `limit`.
    ///
    /// `limit` is a seconds budget (`0` = try-once), a `Duration`, or a
    /// [`CancelToken`](crate::CancelToken). Failure to acquire within the
    /// window is [`LockError::Timeout`]; cancellation after the grant has no
    /// effect on the hold.
    pub fn acquire(&self, owner: impl Into<Arc<str>>, name: &str, limit: impl Into<WaitLimit>) -> Result<LockHandle> {
        self.acquire_inner(owner.into(), name, limit.into())
    }

    /// Like [`LockManager::acquire`], but reports failure to acquire within
    /// the window as `Ok(None)` instead of an error. Usage errors still
    /// surface as `Err`.
    pub fn try_acquire(
        &self,
        owner: impl Into<Arc<str>>,
        name: &str,
        limit: impl Into<WaitLimit>,
    ) -> Result<Option<LockHandle>> {
        match self.acquire_inner(owner.into(), name, limit.into()) {
            Ok(handle) => Ok(Some(handle)),
            Err(LockError::Timeout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Install a fresh [`ContextId`] for the current flow.
    ///
    /// Work that must not inherit the spawning flow's lock ownership calls
    /// this at entry.
    pub fn barrier(&self) -> ContextId {
        ContextId::barrier()
    }

    /// The ambient flow identity, materializing one on first read
    pub fn current_context_id(&self) -> ContextId {
        ContextId::current()
    }

    fn acquire_inner(&self, owner: Arc<str>, name: &str, limit: WaitLimit) -> Result<LockHandle> {
        if name.trim().is_empty() {
            return Err(LockError::invalid_name("lock name must not be empty"));
        }

        let cancel = limit.into_token();
        let started = Instant::now();

        loop {
            let proxy = self.registry.get_or_create(name, &self.provider, &self.config);
            let core = HandleCore::new(
                Arc::from(name),
                owner.clone(),
                ContextId::current(),
                cancel.clone(),
                self.config.dispose_idle_proxies,
            );

            match proxy.check_current_turn(&core) {
                Ok(CheckTurn::GrantedSecondary) => {
                    return Ok(LockHandle::new(core, proxy));
                }
                Ok(CheckTurn::Rejected) => {
                    return Err(LockError::timeout(self.provider.name(), name, started.elapsed()));
                }
                Ok(CheckTurn::Enqueued) => {
                    if proxy.await_turn_or_timeout(&core) {
                        return Ok(LockHandle::new(core, proxy));
                    }
                    return Err(LockError::timeout(self.provider.name(), name, started.elapsed()));
                }
                // The coordinator retired between lookup and enqueue; go
                // again with a fresh registry entry.
                Err(LockError::ProxyRetired { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Number of live per-name coordinators (diagnostic)
    pub fn proxy_count(&self) -> usize {
        self.registry.len()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("provider", &self.provider.name())
            .field("proxies", &self.registry.len())
            .finish()
    }
}
