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

use crate::error::Result;
use crate::provider::{BoxedToken, ExternalLockProvider, LockToken};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process realization of the external lock facility.
///
/// Exclusive slots and request-marker counts live in shared maps; clones of
/// a provider (and managers holding the same `Arc`) observe one facility,
/// so several managers over one `MemoryLockProvider` coordinate exactly
/// like several processes over a shared facility.
#[derive(Debug, Clone)]
pub struct MemoryLockProvider {
    label: Arc<str>,
    facility: Arc<MemoryFacility>,
}

#[derive(Debug, Default)]
struct MemoryFacility {
    /// Exclusive slot per name; the value identifies the outstanding grant
    exclusive: DashMap<String, u64>,
    /// Outstanding request markers per name
    requests: DashMap<String, usize>,
    next_grant: AtomicU64,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::with_label("memory")
    }

    /// Provider with a custom identity label (shows up in timeout errors)
    pub fn with_label(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            facility: Arc::new(MemoryFacility::default()),
        }
    }

    fn canonical(name: &str) -> String {
        name.to_ascii_lowercase()
    }
}

impl Default for MemoryLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalLockProvider for MemoryLockProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn get_lock(&self, name: &str) -> Result<Option<BoxedToken>> {
        let key = Self::canonical(name);
        match self.facility.exclusive.entry(key.clone()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let grant = self.facility.next_grant.fetch_add(1, Ordering::Relaxed);
                slot.insert(grant);
                Ok(Some(Box::new(ExclusiveGrant {
                    facility: self.facility.clone(),
                    key,
                    grant,
                })))
            }
        }
    }

    fn get_lock_request(&self, name: &str) -> Result<Option<BoxedToken>> {
        let key = Self::canonical(name);
        *self.facility.requests.entry(key.clone()).or_insert(0) += 1;
        Ok(Some(Box::new(RequestMarker {
            facility: self.facility.clone(),
            key,
        })))
    }

    fn check_lock_request(&self, name: &str) -> Result<bool> {
        let key = Self::canonical(name);
        Ok(self.facility.requests.get(&key).is_some_and(|count| *count > 0))
    }
}

#[derive(Debug)]
struct ExclusiveGrant {
    facility: Arc<MemoryFacility>,
    key: String,
    grant: u64,
}

impl LockToken for ExclusiveGrant {}

impl Drop for ExclusiveGrant {
    fn drop(&mut self) {
        self.facility.exclusive.remove_if(&self.key, |_, held| *held == self.grant);
    }
}

#[derive(Debug)]
struct RequestMarker {
    facility: Arc<MemoryFacility>,
    key: String,
}

impl LockToken for RequestMarker {}

impl Drop for RequestMarker {
    fn drop(&mut self) {
        let drained = match self.facility.requests.get_mut(&self.key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if drained {
            self.facility.requests.remove_if(&self.key, |_, count| *count == 0);
        }
    }
}
