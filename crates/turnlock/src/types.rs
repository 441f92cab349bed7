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
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation signal governing one acquisition.
///
/// A token combines an externally cancellable flag with an optional
/// deadline. Acquisition code observes the token at every suspension
/// point; cancellation applies to acquisition only, never to a hold
/// that has already been granted.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Token that never fires on its own (cancellable only via [`CancelToken::cancel`])
    pub fn never() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Token that is already fired; acquisition becomes a single try
    pub fn expired() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
            deadline: None,
        }
    }

    /// Token that auto-fires once `timeout` has elapsed
    pub fn after(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Fire the token. Clones share the flag, so any clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired (explicitly or by deadline)
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Deadline, if this token carries one
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// How long an acquisition may wait: a seconds budget, a duration, or an
/// externally supplied [`CancelToken`]. A zero budget means try-once.
#[derive(Debug, Clone)]
pub enum WaitLimit {
    Seconds(u64),
    Duration(Duration),
    Token(CancelToken),
}

impl WaitLimit {
    /// Try-once limit: a single acquisition attempt, no waiting
    pub fn try_once() -> Self {
        Self::Seconds(0)
    }

    /// Resolve the limit into the cancellation token acquisition runs under
    pub fn into_token(self) -> CancelToken {
        match self {
            Self::Seconds(0) => CancelToken::expired(),
            Self::Seconds(secs) => CancelToken::after(Duration::from_secs(secs)),
            Self::Duration(d) if d.is_zero() => CancelToken::expired(),
            Self::Duration(d) => CancelToken::after(d),
            Self::Token(token) => token,
        }
    }
}

impl From<u64> for WaitLimit {
    fn from(secs: u64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<u32> for WaitLimit {
    fn from(secs: u32) -> Self {
        Self::Seconds(secs as u64)
    }
}

impl From<Duration> for WaitLimit {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl From<CancelToken> for WaitLimit {
    fn from(token: CancelToken) -> Self {
        Self::Token(token)
    }
}

/// Diagnostic snapshot of a lock handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleInfo {
    /// Lock name
    pub name: String,
    /// Caller-supplied owner tag
    pub owner: String,
    /// Logical flow the handle belongs to
    pub context_id: ContextId,
    /// Whether the handle currently holds the lock
    pub granted: bool,
    /// Whether the handle shares a primary holder's grant
    pub secondary: bool,
    /// Whether the handle has been disposed
    pub disposed: bool,
}
