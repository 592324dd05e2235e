// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Trigger fraction for `PricedHeap` rebuild: once stale entries exceed `1/STALE_RATIO`
/// of the heap, the heap is rebuilt from the live set. Hardcoded per spec §6, not a
/// config knob.
pub const STALE_RATIO: usize = 4;

/// Replay batch size for `TxJournal::load`: transactions are handed to the caller in
/// batches of this size rather than one at a time. Hardcoded per spec §6.
pub const JOURNAL_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum percentage by which a replacement transaction's gas price must exceed
    /// the incumbent's to be accepted.
    pub price_bump_percent: u64,

    /// Path to the local-transaction journal. `None` disables journaling entirely.
    pub journal_path: Option<PathBuf>,

    /// Max number of executable (strict) transactions kept per account.
    pub account_slots: u64,
    /// Max number of non-executable (future) transactions kept per account.
    pub account_queue: u64,
    /// Max number of executable transactions kept across all accounts.
    pub global_slots: u64,
    /// Max number of non-executable transactions kept across all accounts.
    pub global_queue: u64,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            price_bump_percent: 10,
            journal_path: None,
            account_slots: 16,
            account_queue: 64,
            global_slots: 4096,
            global_queue: 1024,
        }
    }
}

impl PoolConfig {
    /// Load a configuration from a TOML file, falling back to `Default` for any field
    /// the file omits.
    pub fn from_toml_str(contents: &str) -> Result<PoolConfig, toml::de::Error> {
        toml::from_str(contents)
    }
}
