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

//! File-system lock provider.
//!
//! Coordinates cooperating processes on one host (or a shared file system)
//! through a lock directory:
//!
//! - the exclusive lock for a name is a `<key>.lock` file created with
//!   create-new semantics, carrying JSON metadata about the holder;
//! - a request marker is a `<key>.req-<instance>-<seq>` file, one per
//!   waiter, so markers from several processes coexist;
//! - probing reads the directory and ignores this instance's own markers.
//!
//! Tokens delete their file on drop. A lock file left behind by a crashed
//! process is not broken automatically; its metadata identifies the holder
//! for an operator to clear.

use crate::error::Result;
use crate::provider::{BoxedToken, ExternalLockProvider, LockToken};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Lock provider backed by files in a shared directory
#[derive(Debug)]
pub struct FsLockProvider {
    label: String,
    dir: PathBuf,
    instance: String,
    next_marker: AtomicU64,
}

/// Holder metadata written into a lock file
#[derive(Debug, Serialize, Deserialize)]
pub struct FsLockMetadata {
    pub pid: u32,
    pub instance: String,
    pub acquired_at: u64,
}

impl FsLockMetadata {
    fn new(instance: &str) -> Self {
        Self {
            pid: std::process::id(),
            instance: instance.to_string(),
            acquired_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

impl FsLockProvider {
    /// Create a provider over `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            label: format!("fs:{}", dir.display()),
            instance: Uuid::new_v4().simple().to_string(),
            dir,
            next_marker: AtomicU64::new(0),
        })
    }

    /// Directory holding the lock and marker files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Escape a lock name into a file-name key.
    ///
    /// Case-insensitive (lowercased first) and injective: anything outside
    /// `[a-z0-9_-]` becomes `%XX` per byte, so distinct names can never
    /// collide and keys never contain the `.` that separates the suffixes.
    fn encode(name: &str) -> String {
        let lowered = name.to_ascii_lowercase();
        let mut key = String::with_capacity(lowered.len());
        for byte in lowered.bytes() {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => key.push(byte as char),
                _ => {
                    let _ = write!(key, "%{byte:02X}");
                }
            }
        }
        key
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", Self::encode(name)))
    }

    fn create_token_file(&self, path: &Path) -> Result<Option<BoxedToken>> {
        let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let metadata = FsLockMetadata::new(&self.instance);
        let json = match serde_json::to_vec(&metadata) {
            Ok(json) => json,
            Err(err) => {
                let _ = std::fs::remove_file(path);
                return Err(err.into());
            }
        };
        if let Err(err) = file.write_all(&json).and_then(|()| file.sync_all()) {
            let _ = std::fs::remove_file(path);
            return Err(err.into());
        }

        Ok(Some(Box::new(FsToken { path: path.to_path_buf() })))
    }
}

impl ExternalLockProvider for FsLockProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn get_lock(&self, name: &str) -> Result<Option<BoxedToken>> {
        self.create_token_file(&self.lock_path(name))
    }

    fn get_lock_request(&self, name: &str) -> Result<Option<BoxedToken>> {
        let seq = self.next_marker.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("{}.req-{}-{}", Self::encode(name), self.instance, seq));
        self.create_token_file(&path)
    }

    fn check_lock_request(&self, name: &str) -> Result<bool> {
        let prefix = format!("{}.req-", Self::encode(name));
        let own = format!("{}.req-{}-", Self::encode(name), self.instance);

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if file_name.starts_with(&prefix) && !file_name.starts_with(&own) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug)]
struct FsToken {
    path: PathBuf,
}

impl LockToken for FsToken {}

impl Drop for FsToken {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to release lock file '{}': {}", self.path.display(), err);
        }
    }
}
