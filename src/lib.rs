// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Per-account transaction queue and global price index for a pending-transaction
//! pool core: nonce-ordered account lists, a lazily-cleaned priced heap, and a
//! crash-consistent journal of local transactions, wired together by [`TxPool`].
//!
//! This crate is single-threaded and owns no I/O loop, network client or signature
//! check: it is the data structure a pool service builds on, not the service itself.

pub mod account_list;
pub mod config;
pub mod error;
pub mod journal;
pub mod nonce_map;
pub mod pool;
pub mod priced_heap;
pub mod types;

pub use account_list::AccountTxList;
pub use config::{PoolConfig, JOURNAL_BATCH_SIZE, STALE_RATIO};
pub use error::{Error, Result};
pub use journal::{JournalStats, TxJournal};
pub use nonce_map::NonceSortedMap;
pub use pool::{InsertOutcome, TxPool};
pub use priced_heap::PricedHeap;
pub use types::{LocalSet, NoLocals, PooledTransaction, TxRef};
