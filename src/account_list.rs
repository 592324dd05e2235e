// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Per-account transaction list: fee-bump replacement, strict/future semantics, and
//! cost/gas caps that let balance sweeps short-circuit on unaffected accounts.

use crate::nonce_map::NonceSortedMap;
use crate::types::TxRef;
use ethereum_types::U256;

/// One account's queue of transactions.
///
/// `strict` accounts form the executable/pending queue: nonces must be contiguous from
/// the account's current on-chain nonce, and removing one invalidates every later one.
/// Non-strict accounts form the future/gapped queue and have no such contiguity
/// requirement.
pub struct AccountTxList {
    strict: bool,
    txs: NonceSortedMap,
    costcap: U256,
    gascap: u64,
}

impl AccountTxList {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            txs: NonceSortedMap::new(),
            costcap: U256::zero(),
            gascap: 0,
        }
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn overlaps(&self, tx: &TxRef) -> bool {
        self.txs.get(tx.nonce).is_some()
    }

    /// Try to admit `tx`. If a transaction already occupies `tx.nonce`, it is only
    /// replaced when `tx` beats it by at least `price_bump_percent`: both
    /// `tx.gas_price > old.gas_price` (handles the truncation boundary at
    /// `price_bump_percent = 0`) and `tx.gas_price * 100 >= old.gas_price * (100 +
    /// price_bump_percent)` must hold. Returns `(accepted, replaced)`.
    pub fn add(&mut self, tx: TxRef, price_bump_percent: u64) -> (bool, Option<TxRef>) {
        match self.txs.get(tx.nonce).cloned() {
            None => {
                self.put(tx);
                (true, None)
            }
            Some(old) => {
                let threshold = old.gas_price * U256::from(100 + price_bump_percent) / 100;
                if tx.gas_price > old.gas_price && tx.gas_price >= threshold {
                    self.put(tx);
                    (true, Some(old))
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Insert `tx` unconditionally, bypassing the replacement check. Used by the
    /// pool facade to promote an already-admitted transaction from the future queue
    /// into the pending queue once a gap ahead of it fills.
    pub fn force_put(&mut self, tx: TxRef) {
        self.put(tx);
    }

    fn put(&mut self, tx: TxRef) {
        if tx.cost > self.costcap {
            self.costcap = tx.cost;
        }
        if tx.gas > self.gascap {
            self.gascap = tx.gas;
        }
        self.txs.put(tx);
    }

    pub fn forward(&mut self, threshold: u64) -> Vec<TxRef> {
        self.txs.forward(threshold)
    }

    /// Drop every transaction exceeding `cost_limit` or `gas_limit`. Short-circuits
    /// (returning two empty vecs) when the cached caps already prove nothing can
    /// exceed the new limits. When this list is strict and anything was dropped,
    /// every transaction with a higher nonce than the lowest dropped one is also
    /// removed as `invalidated` (it can no longer execute with a gap below it).
    pub fn filter(&mut self, cost_limit: U256, gas_limit: u64) -> (Vec<TxRef>, Vec<TxRef>) {
        if self.costcap <= cost_limit && self.gascap <= gas_limit {
            return (Vec::new(), Vec::new());
        }
        self.costcap = cost_limit;
        self.gascap = gas_limit;

        let removed = self
            .txs
            .filter(|tx| tx.cost > cost_limit || tx.gas > gas_limit);

        let mut invalidated = Vec::new();
        if self.strict && !removed.is_empty() {
            let lowest = removed.iter().map(|tx| tx.nonce).min().expect("non-empty");
            invalidated = self.txs.filter(|tx| tx.nonce > lowest);
        }
        (removed, invalidated)
    }

    pub fn cap(&mut self, n: usize) -> Vec<TxRef> {
        self.txs.cap(n)
    }

    /// Remove a single transaction by nonce. In strict mode, also removes (and
    /// returns as invalidated) every transaction with a higher nonce, since a gap just
    /// opened below them.
    pub fn remove(&mut self, nonce: u64) -> (bool, Vec<TxRef>) {
        let removed = self.txs.remove(nonce);
        if !removed {
            return (false, Vec::new());
        }
        let invalidated = if self.strict {
            self.txs.filter(|tx| tx.nonce > nonce)
        } else {
            Vec::new()
        };
        (true, invalidated)
    }

    pub fn ready(&mut self, start: u64) -> Vec<TxRef> {
        self.txs.ready(start)
    }

    pub fn flatten(&mut self) -> Vec<TxRef> {
        self.txs.flatten()
    }
}
