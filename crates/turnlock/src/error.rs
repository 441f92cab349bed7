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
use std::time::Duration;
use thiserror::Error;

/// Lock operation related error types
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock acquisition timed out or was cancelled before a grant
    #[error("lock '{name}' not acquired from provider '{provider}' within {waited:?}")]
    Timeout {
        provider: String,
        name: String,
        waited: Duration,
    },

    /// Lock name is empty or otherwise unusable
    #[error("invalid lock name: {reason}")]
    InvalidName { reason: String },

    /// A handle was used from a logical context other than the one it was created on
    #[error("lock context mismatch: handle belongs to {expected}, current flow is {actual}")]
    ContextMismatch { expected: ContextId, actual: ContextId },

    /// A handle was offered to a coordinator serving a different lock name
    #[error("lock name mismatch: expected '{expected}', got '{actual}'")]
    NameMismatch { expected: String, actual: String },

    /// Operation on a handle that is already disposed
    #[error("lock handle for '{name}' is already disposed")]
    HandleDisposed { name: String },

    /// The per-name coordinator was retired while the operation was in flight
    #[error("lock coordinator for '{name}' was retired")]
    ProxyRetired { name: String },

    /// Provider-side failure
    #[error("lock provider error: {message}")]
    Provider {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LockError {
    /// Create timeout error
    pub fn timeout(provider: impl Into<String>, name: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            name: name.into(),
            waited,
        }
    }

    /// Create invalid name error
    pub fn invalid_name(reason: impl Into<String>) -> Self {
        Self::InvalidName { reason: reason.into() }
    }

    /// Create handle disposed error
    pub fn handle_disposed(name: impl Into<String>) -> Self {
        Self::HandleDisposed { name: name.into() }
    }

    /// Create proxy retired error
    pub fn proxy_retired(name: impl Into<String>) -> Self {
        Self::ProxyRetired { name: name.into() }
    }

    /// Create provider error
    pub fn provider(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Provider {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this is an acquisition timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the failed operation may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ProxyRetired { .. } | Self::Provider { .. })
    }

    /// Check if this is a caller-side usage error
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidName { .. } | Self::ContextMismatch { .. } | Self::NameMismatch { .. }
        )
    }
}

/// Lock operation Result type
pub type Result<T> = std::result::Result<T, LockError>;

/// Convert from std::io::Error
impl From<std::io::Error> for LockError {
    fn from(err: std::io::Error) -> Self {
        Self::Provider {
            message: err.to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        Self::Provider {
            message: format!("metadata serialization error: {err}"),
            source: Box::new(err),
        }
    }
}
