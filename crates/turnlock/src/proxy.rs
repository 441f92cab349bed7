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

//! Per-name lock coordinator.
//!
//! A proxy multiplexes one externally held lock token across all in-process
//! requesters of a name. Waiters are served in FIFO order from a queue; the
//! external token is taken once and kept across in-process handoffs, so
//! uncontended same-process turnover costs no provider round-trips. A second,
//! shared "request" channel signals cross-process demand: the holder probes
//! it on release and, when another process is waiting, gives the token up and
//! suppresses reacquisition for a back-off window.

use crate::config::LockConfig;
use crate::context::ContextId;
use crate::error::{LockError, Result};
use crate::handle::HandleCore;
use crate::manager::ProxyRegistry;
use crate::provider::{BoxedToken, ExternalLockProvider};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Outcome of offering a candidate to the coordinator
#[derive(Debug)]
pub(crate) enum CheckTurn {
    /// Re-entrant fast path: the candidate now shares the current holder's grant
    GrantedSecondary,
    /// The candidate joined the wait queue
    Enqueued,
    /// The lock is held by a foreign flow and the candidate cannot wait
    Rejected,
}

#[derive(Debug)]
struct ProxyState {
    /// FIFO of pending acquisitions; disposed entries are skipped on pop
    queue: VecDeque<Arc<HandleCore>>,
    /// Handle whose turn it is, granted or about to be
    current_turn: Option<Arc<HandleCore>>,
    /// External token, held on behalf of `current_turn`
    external: Option<BoxedToken>,
    /// Outstanding cross-process demand marker, held only while waiting
    request_marker: Option<BoxedToken>,
    /// Earliest wall-clock time of the next provider acquisition attempt
    min_next_acquire_at: Instant,
    disposed: bool,
}

/// Per-name coordinator: owns the external token and serializes in-process
/// waiters. One per (provider, name); all field mutations happen under the
/// single monitor, provider calls never do.
pub struct LockProxy {
    name: Arc<str>,
    key: String,
    provider: Arc<dyn ExternalLockProvider>,
    config: LockConfig,
    registry: Weak<ProxyRegistry>,
    state: Mutex<ProxyState>,
}

impl LockProxy {
    pub(crate) fn new(
        name: Arc<str>,
        key: String,
        provider: Arc<dyn ExternalLockProvider>,
        config: LockConfig,
        registry: Weak<ProxyRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            key,
            provider,
            config,
            registry,
            state: Mutex::new(ProxyState {
                queue: VecDeque::new(),
                current_turn: None,
                external: None,
                request_marker: None,
                min_next_acquire_at: Instant::now(),
                disposed: false,
            }),
        })
    }

    /// Lock name served by this coordinator
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Offer `candidate` to the coordinator.
    ///
    /// The re-entrant fast path grants a secondary immediately when the
    /// current turn is a granted handle of the same flow; it never waits.
    /// A candidate whose cancellation already fired is rejected without
    /// queueing when a holder exists. Everything else is enqueued.
    pub(crate) fn check_current_turn(&self, candidate: &Arc<HandleCore>) -> Result<CheckTurn> {
        let ambient = ContextId::current();
        if candidate.context_id() != ambient {
            return Err(LockError::ContextMismatch {
                expected: candidate.context_id(),
                actual: ambient,
            });
        }
        if !candidate.name().eq_ignore_ascii_case(&self.name) {
            return Err(LockError::NameMismatch {
                expected: self.name.to_string(),
                actual: candidate.name().to_string(),
            });
        }

        let mut state = self.state.lock();
        if state.disposed {
            return Err(LockError::proxy_retired(self.name.to_string()));
        }

        if let Some(current) = state.current_turn.clone() {
            if current.context_id() == candidate.context_id() && current.is_granted() {
                // A primary racing into dispose fails the grant here and the
                // candidate falls through to the queue like any other waiter.
                match candidate.grant_secondary_of(&current) {
                    Ok(()) => return Ok(CheckTurn::GrantedSecondary),
                    Err(err) => {
                        tracing::debug!("re-entrant grant on '{}' failed: {}", self.name, err);
                    }
                }
            }
            if candidate.cancel().is_cancelled() {
                return Ok(CheckTurn::Rejected);
            }
        }

        state.queue.push_back(candidate.clone());
        Ok(CheckTurn::Enqueued)
    }

    /// Wait for `candidate`'s turn and obtain the external token.
    ///
    /// Returns whether the candidate ended up granted as primary. On any
    /// failure the candidate is disposed here and the next waiter popped, so
    /// a cancellation firing exactly at the head of the queue never stalls
    /// the line behind it.
    pub(crate) fn await_turn_or_timeout(self: &Arc<Self>, candidate: &Arc<HandleCore>) -> bool {
        {
            let mut state = self.state.lock();
            if state.disposed {
                drop(state);
                self.retire_core(candidate);
                return false;
            }
            if state.current_turn.is_none() {
                let mut released = Vec::new();
                self.pop_next_locked(&mut state, &mut released);
                drop(state);
                drop(released);
            }
        }

        if !candidate.await_turn(self.config.poll_interval) {
            self.retire_core(candidate);
            return false;
        }

        if self.try_get_lock(candidate) {
            true
        } else {
            self.retire_core(candidate);
            false
        }
    }

    /// Acquisition loop for the head of the queue.
    ///
    /// A token still held from the previous in-process turn grants
    /// immediately. Otherwise the provider is polled on the configured
    /// cadence, gated by the back-off window after a cross-process handoff;
    /// while waiting, a request marker is published so the foreign holder
    /// knows demand exists. Even an already-cancelled candidate gets one
    /// attempt, which is what makes a zero budget a meaningful try-once.
    fn try_get_lock(self: &Arc<Self>, candidate: &Arc<HandleCore>) -> bool {
        loop {
            let gate = {
                let mut state = self.state.lock();
                if state.disposed {
                    return false;
                }
                if state.external.is_some() {
                    let marker = state.request_marker.take();
                    candidate.grant_primary();
                    drop(state);
                    drop(marker);
                    tracing::debug!("granted '{}' to {} from the held token", self.name, candidate.owner());
                    return true;
                }
                state.min_next_acquire_at
            };

            let now = Instant::now();
            if now < gate {
                if candidate.cancel().is_cancelled() {
                    return false;
                }
                std::thread::sleep((gate - now).min(self.config.poll_interval));
                continue;
            }

            match self.provider.get_lock(&self.name) {
                Ok(Some(token)) => {
                    let mut state = self.state.lock();
                    if state.disposed || candidate.is_disposed() {
                        drop(state);
                        drop(token);
                        return false;
                    }
                    state.external = Some(token);
                    let marker = state.request_marker.take();
                    candidate.grant_primary();
                    drop(state);
                    drop(marker);
                    tracing::debug!("acquired '{}' for {}", self.name, candidate.owner());
                    return true;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("provider failed acquiring '{}': {}", self.name, err);
                }
            }

            if candidate.cancel().is_cancelled() {
                return false;
            }

            self.publish_demand();
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Publish a request marker once per waiting episode
    fn publish_demand(&self) {
        let wants_marker = {
            let state = self.state.lock();
            !state.disposed && state.request_marker.is_none()
        };
        if !wants_marker {
            return;
        }

        match self.provider.get_lock_request(&self.name) {
            Ok(Some(marker)) => {
                let mut state = self.state.lock();
                if state.disposed || state.request_marker.is_some() {
                    drop(state);
                    drop(marker);
                } else {
                    state.request_marker = Some(marker);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("provider failed publishing request for '{}': {}", self.name, err);
            }
        }
    }

    /// Release pathway, driven by handle disposal.
    ///
    /// Only the current turn matters here: queued cores that were disposed
    /// while waiting are skipped lazily by the next pop. When the released
    /// holder leaves the queue empty and asked for it, the coordinator
    /// retires itself from the registry.
    pub(crate) fn on_core_disposed(self: &Arc<Self>, core: &Arc<HandleCore>) {
        {
            let state = self.state.lock();
            if state.disposed {
                return;
            }
            let is_current = state.current_turn.as_ref().is_some_and(|current| Arc::ptr_eq(current, core));
            if !is_current {
                return;
            }
        }

        // Probe cross-process demand outside the monitor. The holder must
        // hand the token off whenever another process is waiting, even with
        // in-process work still queued behind it.
        let handoff = {
            let held = self.state.lock().external.is_some();
            held && self.probe_demand()
        };

        let mut released: Vec<BoxedToken> = Vec::new();
        let mut retire = false;
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            if !state.current_turn.as_ref().is_some_and(|current| Arc::ptr_eq(current, core)) {
                return;
            }

            if handoff && state.external.is_some() {
                state.min_next_acquire_at = Instant::now() + self.config.backoff_delay;
                released.extend(state.external.take());
                tracing::debug!(
                    "handing '{}' off to a requesting process, backing off {:?}",
                    self.name,
                    self.config.backoff_delay
                );
            }

            state.current_turn = None;
            self.pop_next_locked(&mut state, &mut released);

            if state.current_turn.is_none() && state.queue.is_empty() && core.dispose_proxy_on_close() {
                state.disposed = true;
                released.extend(state.external.take());
                released.extend(state.request_marker.take());
                retire = true;
            }
        }

        drop(released);
        if retire {
            self.remove_from_registry();
            tracing::debug!("retired idle lock coordinator for '{}'", self.name);
        }
    }

    /// Pop the next live waiter and signal its turn. With the queue
    /// exhausted the coordinator goes idle and gives up external tokens;
    /// they are collected into `released` and dropped outside the monitor.
    fn pop_next_locked(&self, state: &mut ProxyState, released: &mut Vec<BoxedToken>) {
        while let Some(next) = state.queue.pop_front() {
            if next.is_disposed() {
                continue;
            }
            next.signal_turn();
            state.current_turn = Some(next);
            return;
        }

        state.current_turn = None;
        released.extend(state.external.take());
        released.extend(state.request_marker.take());
    }

    fn probe_demand(&self) -> bool {
        match self.provider.check_lock_request(&self.name) {
            Ok(demand) => demand,
            Err(err) => {
                tracing::warn!("provider failed probing requests for '{}': {}", self.name, err);
                false
            }
        }
    }

    fn retire_core(self: &Arc<Self>, core: &Arc<HandleCore>) {
        if core.mark_disposed() {
            self.on_core_disposed(core);
        }
    }

    /// Tear the coordinator down: every waiter unblocks, tokens are
    /// released, and the registry entry is removed if it still points here.
    pub fn dispose(self: &Arc<Self>) {
        let mut released: Vec<BoxedToken> = Vec::new();
        let mut cores: Vec<Arc<HandleCore>> = Vec::new();
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            if let Some(current) = state.current_turn.take() {
                cores.push(current);
            }
            cores.extend(state.queue.drain(..));
            released.extend(state.external.take());
            released.extend(state.request_marker.take());
        }

        for core in &cores {
            core.mark_disposed();
        }
        drop(released);
        self.remove_from_registry();
        tracing::debug!("lock coordinator for '{}' disposed", self.name);
    }

    fn remove_from_registry(self: &Arc<Self>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_value(&self.key, self);
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[cfg(test)]
    pub(crate) fn holds_external(&self) -> bool {
        self.state.lock().external.is_some()
    }
}

impl std::fmt::Debug for LockProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LockProxy")
            .field("name", &self.name)
            .field("queued", &state.queue.len())
            .field("has_turn", &state.current_turn.is_some())
            .field("holds_external", &state.external.is_some())
            .field("waiting_marker", &state.request_marker.is_some())
            .field("disposed", &state.disposed)
            .finish()
    }
}
