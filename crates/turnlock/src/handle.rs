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

use crate::context::ContextId;
use crate::error::{LockError, Result};
use crate::proxy::LockProxy;
use crate::types::{CancelToken, HandleInfo};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct HandleState {
    /// Set by the coordinator when this handle reaches the head of the queue
    my_turn: bool,
    /// Set when the handle holds the lock (directly or via a primary)
    granted: bool,
    /// Whether the grant shares another handle's hold
    secondary: bool,
    /// Terminal; once set, `granted` reads false to all observers
    disposed: bool,
    /// Primary holder this handle shares, when secondary
    primary: Option<Arc<HandleCore>>,
}

/// Shared state of one acquisition request.
///
/// The caller-facing wrapper is [`LockHandle`]; the coordinator keeps cores
/// in its wait queue. Each core has its own monitor and a single condition
/// used both for turn signalling and for dispose wake-ups.
pub struct HandleCore {
    name: Arc<str>,
    owner: Arc<str>,
    context_id: ContextId,
    cancel: CancelToken,
    dispose_proxy_on_close: AtomicBool,
    state: Mutex<HandleState>,
    turn: Condvar,
}

impl HandleCore {
    pub(crate) fn new(
        name: Arc<str>,
        owner: Arc<str>,
        context_id: ContextId,
        cancel: CancelToken,
        dispose_proxy_on_close: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            owner,
            context_id,
            cancel,
            dispose_proxy_on_close: AtomicBool::new(dispose_proxy_on_close),
            state: Mutex::new(HandleState::default()),
            turn: Condvar::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn dispose_proxy_on_close(&self) -> bool {
        self.dispose_proxy_on_close.load(Ordering::SeqCst)
    }

    pub(crate) fn set_dispose_proxy_on_close(&self, dispose: bool) {
        self.dispose_proxy_on_close.store(dispose, Ordering::SeqCst);
    }

    pub(crate) fn is_granted(&self) -> bool {
        let state = self.state.lock();
        state.granted && !state.disposed
    }

    pub(crate) fn is_secondary(&self) -> bool {
        self.state.lock().secondary
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Whether both handles observe the same primary hold
    pub(crate) fn shares_hold_with(&self, other: &Arc<HandleCore>) -> bool {
        let primary = match &self.state.lock().primary {
            Some(primary) => primary.clone(),
            None => return false,
        };
        Arc::ptr_eq(&primary, other)
    }

    /// Take direct ownership of the external token
    pub(crate) fn grant_primary(&self) {
        let mut state = self.state.lock();
        state.granted = true;
        state.secondary = false;
        state.primary = None;
    }

    /// Share `primary`'s hold.
    ///
    /// Fails when the primary's dispose is already observable, when the
    /// candidate belongs to a different flow, or when the names disagree:
    /// a secondary must never outlive the grant it shares at birth.
    pub(crate) fn grant_secondary_of(&self, primary: &Arc<HandleCore>) -> Result<()> {
        if self.context_id != primary.context_id {
            return Err(LockError::ContextMismatch {
                expected: primary.context_id,
                actual: self.context_id,
            });
        }
        if !self.name.eq_ignore_ascii_case(&primary.name) {
            return Err(LockError::NameMismatch {
                expected: primary.name.to_string(),
                actual: self.name.to_string(),
            });
        }

        let primary_state = primary.state.lock();
        if primary_state.disposed || !primary_state.granted {
            return Err(LockError::handle_disposed(primary.name.to_string()));
        }

        // The primary monitor stays held while the secondary is published so
        // the primary cannot dispose in between.
        let mut state = self.state.lock();
        state.granted = true;
        state.secondary = true;
        state.primary = Some(primary.clone());
        Ok(())
    }

    /// Mark this handle as head of the queue and wake its waiter
    pub(crate) fn signal_turn(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.my_turn = true;
        self.turn.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn has_turn(&self) -> bool {
        self.state.lock().my_turn
    }

    /// Block until this handle's turn arrives, it is disposed, or its
    /// cancellation fires. Returns whether the turn arrived.
    ///
    /// External cancellation carries no wake-up of its own, so the wait is
    /// sliced at `poll` granularity and the token re-checked on each wake.
    pub(crate) fn await_turn(&self, poll: Duration) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.my_turn {
                return true;
            }
            if state.disposed || self.cancel.is_cancelled() {
                return false;
            }

            let mut wait = poll;
            if let Some(deadline) = self.cancel.deadline() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < wait {
                    wait = remaining;
                }
            }
            let _ = self.turn.wait_for(&mut state, wait);
        }
    }

    /// First-dispose transition. Returns false when already disposed.
    ///
    /// Unblocks every waiter on this core's condition.
    pub(crate) fn mark_disposed(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return false;
        }
        state.disposed = true;
        state.primary = None;
        self.turn.notify_all();
        true
    }

    pub(crate) fn info(&self) -> HandleInfo {
        let state = self.state.lock();
        HandleInfo {
            name: self.name.to_string(),
            owner: self.owner.to_string(),
            context_id: self.context_id,
            granted: state.granted && !state.disposed,
            secondary: state.secondary,
            disposed: state.disposed,
        }
    }
}

impl std::fmt::Debug for HandleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleCore")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("context_id", &self.context_id)
            .field("granted", &state.granted)
            .field("secondary", &state.secondary)
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// One acquisition of a named lock.
///
/// A granted handle holds the lock until disposed. Dispose is idempotent
/// and also runs on drop, so a handle cannot leak its hold across panics.
/// Disposing a primary triggers the coordinator's release pathway;
/// disposing a secondary only retires that handle, the shared hold stays
/// with the primary.
pub struct LockHandle {
    core: Arc<HandleCore>,
    proxy: Arc<LockProxy>,
}

impl LockHandle {
    pub(crate) fn new(core: Arc<HandleCore>, proxy: Arc<LockProxy>) -> Self {
        Self { core, proxy }
    }

    /// Lock name this handle was acquired under
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Caller-supplied owner tag (diagnostic only)
    pub fn owner(&self) -> &str {
        self.core.owner()
    }

    /// Logical flow the handle belongs to
    pub fn owning_context_id(&self) -> ContextId {
        self.core.context_id()
    }

    /// Whether this handle currently holds the lock
    pub fn is_granted(&self) -> bool {
        self.core.is_granted()
    }

    /// Whether this handle shares a primary holder's grant
    pub fn is_secondary(&self) -> bool {
        self.core.is_secondary()
    }

    /// Whether this handle has been disposed
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Whether the coordinator is retired once this release leaves it idle
    pub fn dispose_proxy_on_close(&self) -> bool {
        self.core.dispose_proxy_on_close()
    }

    /// Control coordinator retirement on release (see [`LockConfig::dispose_idle_proxies`](crate::LockConfig))
    pub fn set_dispose_proxy_on_close(&self, dispose: bool) {
        self.core.set_dispose_proxy_on_close(dispose);
    }

    /// Diagnostic snapshot
    pub fn info(&self) -> HandleInfo {
        self.core.info()
    }

    /// Whether this handle is a secondary sharing `primary`'s hold
    pub fn shares_hold_with(&self, primary: &LockHandle) -> bool {
        self.core.shares_hold_with(primary.core())
    }

    /// Release this handle. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        if self.core.mark_disposed() {
            self.proxy.on_core_disposed(&self.core);
            tracing::debug!("lock handle disposed: name={}, owner={}", self.core.name(), self.core.owner());
        }
    }

    pub(crate) fn core(&self) -> &Arc<HandleCore> {
        &self.core
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle").field("core", &self.core).finish()
    }
}
