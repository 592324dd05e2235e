// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors the pool core can report.
///
/// `NonceSortedMap`, `AccountTxList` and `PricedHeap` are total: every "nothing to do"
/// case is a sentinel return (empty vec, `false`, `None`), never an `Err`. Only the
/// journal and the admission path on `TxPool` are fallible.
#[derive(Debug, Error)]
pub enum Error {
    /// `TxJournal::insert` was called while no writer is open (usually because the
    /// journal is mid-`load`, or was never configured). Callers during replay should
    /// ignore this.
    #[error("no active transaction journal")]
    NoActiveJournal,

    /// An underlying filesystem operation on the journal failed.
    #[error("transaction journal I/O error: {0}")]
    JournalIo(#[from] std::io::Error),

    /// A record in the journal could not be decoded. Any transactions already decoded
    /// earlier in the stream were still handed to the caller before this is returned.
    #[error("transaction journal decode error: {0}")]
    JournalDecode(String),

    /// `tx.nonce` is below the account's current on-chain nonce.
    #[error("nonce too low: tx nonce {tx_nonce} < account nonce {account_nonce}")]
    NonceTooLow { tx_nonce: u64, account_nonce: u64 },

    /// The pool is full and `tx` does not clear the current cheapest pooled price.
    #[error("transaction underpriced")]
    Underpriced,

    /// The account's pending+queued transaction count is already at its configured cap.
    #[error("account transaction limit reached")]
    AccountLimitReached,

    /// The pool is already at its configured global cap and every transaction cheap
    /// enough to evict in `tx`'s place turned out to be local-protected, so `tx` itself
    /// was admitted and then evicted straight back out.
    #[error("pool transaction limit reached")]
    PoolLimitReached,
}

pub type Result<T> = std::result::Result<T, Error>;
