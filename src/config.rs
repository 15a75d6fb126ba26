// Copyright 2021 Datafuse Labs
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

//! Tunables of the sweep scanner, the transaction manager and the in-memory store.
//!
//! All structs deserialize with defaults for missing fields, so a partial config section is
//! enough.

use serde::Deserialize;
use serde::Serialize;

/// Default `batch_size_hint` of a candidate request that does not set one.
pub const DEFAULT_CANDIDATE_BATCH_HINT: usize = 128;

/// Default number of attempts of a retryable transaction.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default number of entries read per page by the in-memory history scan.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sweep: SweepConfig,
    pub transaction: TransactionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Number of examined `(cell, timestamp)` pairs after which a candidate batch is closed.
    /// `0` is treated as `1`.
    pub candidate_batch_hint: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            candidate_batch_hint: DEFAULT_CANDIDATE_BATCH_HINT,
        }
    }
}

impl SweepConfig {
    #[must_use]
    pub fn with_candidate_batch_hint(mut self, hint: usize) -> Self {
        self.candidate_batch_hint = hint;
        self
    }

    pub(crate) fn effective_candidate_batch_hint(&self) -> usize {
        self.candidate_batch_hint.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Attempts of a retryable transaction before giving up. `0` is treated as `1`.
    pub max_attempts: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl TransactionConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub(crate) fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Entries read under one lock acquisition by a history scan. `0` is treated as `1`.
    pub scan_page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size;
        self
    }

    pub(crate) fn effective_scan_page_size(&self) -> usize {
        self.scan_page_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let c = Config::default();
        assert_eq!(c.sweep.candidate_batch_hint, DEFAULT_CANDIDATE_BATCH_HINT);
        assert_eq!(c.transaction.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(c.storage.scan_page_size, DEFAULT_SCAN_PAGE_SIZE);
    }

    #[test]
    fn test_config_partial_json() -> anyhow::Result<()> {
        let c: Config = serde_json::from_str(r#"{"transaction": {"max_attempts": 3}}"#)?;

        assert_eq!(c.transaction.max_attempts, 3);
        assert_eq!(c.sweep, SweepConfig::default());
        assert_eq!(c.storage, StorageConfig::default());

        let c: Config = serde_json::from_str("{}")?;
        assert_eq!(c, Config::default());
        Ok(())
    }

    #[test]
    fn test_zero_values_are_clamped() {
        assert_eq!(
            TransactionConfig::default()
                .with_max_attempts(0)
                .effective_max_attempts(),
            1
        );
        assert_eq!(
            StorageConfig::default()
                .with_scan_page_size(0)
                .effective_scan_page_size(),
            1
        );
    }
}
