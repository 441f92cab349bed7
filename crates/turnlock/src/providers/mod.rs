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

//! Bundled [`ExternalLockProvider`](crate::ExternalLockProvider) implementations.
//!
//! - [`memory`] keeps the whole facility in process memory; managers sharing
//!   one instance behave like separate processes sharing a facility, which
//!   is also what the concurrency tests run against.
//! - [`fs`] coordinates processes on one host through lock and marker files
//!   in a shared directory.

pub mod fs;
pub mod memory;

pub use fs::FsLockProvider;
pub use memory::MemoryLockProvider;
