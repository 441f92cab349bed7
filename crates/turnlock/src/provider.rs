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
use std::fmt;

/// A grant handed out by a provider. Dropping the token releases the
/// underlying facility entry; tokens never outlive the owning process.
pub trait LockToken: Send + fmt::Debug {}

/// Boxed provider grant
pub type BoxedToken = Box<dyn LockToken>;

/// Cross-process lock facility.
///
/// All three operations are keyed by lock name and treat it
/// case-insensitively. `get_lock` and `get_lock_request` on the same name
/// from the same provider are independent: holding one never precludes the
/// other for the same caller.
///
/// Transient unavailability is reported as `Ok(None)` and the caller keeps
/// polling; a persistent failure is reported as `Err` and counts as a failed
/// attempt with no state change.
pub trait ExternalLockProvider: Send + Sync {
    /// Short human-readable identity of this provider (used in errors)
    fn name(&self) -> &str;

    /// Try once to take the exclusive cross-process lock for `name`.
    ///
    /// Never blocks beyond the facility round-trip. Distinct names are
    /// independent and may be locked concurrently.
    fn get_lock(&self, name: &str) -> Result<Option<BoxedToken>>;

    /// Publish a shared "I want the exclusive lock" marker for `name`.
    ///
    /// Any number of parties may hold a marker for the same name at once.
    fn get_lock_request(&self, name: &str) -> Result<Option<BoxedToken>>;

    /// Probe whether any other party currently holds a request marker for
    /// `name`. Must not block meaningfully.
    fn check_lock_request(&self, name: &str) -> Result<bool>;
}
