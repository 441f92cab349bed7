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

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Delay between provider acquisition attempts
    pub poll_interval: Duration,
    /// Window after a cross-process handoff during which reacquisition is suppressed
    pub backoff_delay: Duration,
    /// Whether an idle per-name coordinator is retired when its last handle goes away
    pub dispose_idle_proxies: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: crate::POLL_INTERVAL,
            backoff_delay: crate::BACKOFF_DELAY,
            dispose_idle_proxies: true,
        }
    }
}

impl LockConfig {
    /// Create new lock configuration with the default polling cadence
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the polling interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the handoff back-off window
    pub fn with_backoff_delay(mut self, backoff_delay: Duration) -> Self {
        self.backoff_delay = backoff_delay;
        self
    }

    /// Keep idle coordinators registered instead of retiring them
    pub fn with_dispose_idle_proxies(mut self, dispose: bool) -> Self {
        self.dispose_idle_proxies = dispose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LockConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(16));
        assert_eq!(config.backoff_delay, Duration::from_millis(48));
        assert!(config.dispose_idle_proxies);
    }

    #[test]
    fn test_config_builders() {
        let config = LockConfig::new()
            .with_poll_interval(Duration::from_millis(5))
            .with_backoff_delay(Duration::from_millis(20))
            .with_dispose_idle_proxies(false);

        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.backoff_delay, Duration::from_millis(20));
        assert!(!config.dispose_idle_proxies);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = LockConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.poll_interval, config.poll_interval);
        assert_eq!(parsed.backoff_delay, config.backoff_delay);
    }
}
