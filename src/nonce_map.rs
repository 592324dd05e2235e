// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Nonce → transaction map with a heap-based index for prefix removal and filtering.

use crate::types::TxRef;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Nonce-indexed map of transactions for one account.
///
/// `index` is a min-heap over the nonces present in `items`; the two must always agree
/// as multisets. `cache` holds the ascending-by-nonce flattening of `items` and is kept
/// around across calls that don't disturb it (pure prefix/suffix removal), since
/// `flatten` is called far more often than the map is mutated.
#[derive(Debug, Default)]
pub struct NonceSortedMap {
    items: HashMap<u64, TxRef>,
    index: BinaryHeap<Reverse<u64>>,
    cache: Option<Vec<TxRef>>,
}

impl NonceSortedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nonce: u64) -> Option<&TxRef> {
        self.items.get(&nonce)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or overwrite the transaction at `tx.nonce`. The heap index only grows on
    /// a genuinely new nonce; overwriting an existing one leaves it untouched.
    pub fn put(&mut self, tx: TxRef) {
        if !self.items.contains_key(&tx.nonce) {
            self.index.push(Reverse(tx.nonce));
        }
        self.items.insert(tx.nonce, tx);
        self.cache = None;
    }

    /// Remove every entry with `nonce < threshold`, in ascending nonce order.
    pub fn forward(&mut self, threshold: u64) -> Vec<TxRef> {
        let mut removed = Vec::new();
        while let Some(&Reverse(nonce)) = self.index.peek() {
            if nonce >= threshold {
                break;
            }
            self.index.pop();
            if let Some(tx) = self.items.remove(&nonce) {
                removed.push(tx);
            }
        }
        if let Some(cache) = self.cache.as_mut() {
            let n = removed.len().min(cache.len());
            cache.drain(0..n);
        }
        removed
    }

    /// Remove every entry for which `predicate` holds. Order of the returned slice is
    /// unspecified; the index is rebuilt from the surviving keys whenever anything was
    /// removed, so the heap never needs to reflect filter order.
    pub fn filter<P>(&mut self, mut predicate: P) -> Vec<TxRef>
    where
        P: FnMut(&TxRef) -> bool,
    {
        let mut removed = Vec::new();
        self.items.retain(|_, tx| {
            if predicate(tx) {
                removed.push(tx.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.index = self.items.keys().copied().map(Reverse).collect();
            self.cache = None;
        }
        removed
    }

    /// Keep only the `n` lowest-nonce entries, returning the rest in ascending nonce
    /// order (so the caller sees deterministic eviction).
    pub fn cap(&mut self, n: usize) -> Vec<TxRef> {
        if self.items.len() <= n {
            return Vec::new();
        }
        let mut nonces: Vec<u64> = self.items.keys().copied().collect();
        nonces.sort_unstable();
        let dropped_count = nonces.len() - n;

        let mut dropped = Vec::with_capacity(dropped_count);
        for &nonce in &nonces[n..] {
            if let Some(tx) = self.items.remove(&nonce) {
                dropped.push(tx);
            }
        }
        self.index = self.items.keys().copied().map(Reverse).collect();
        if let Some(cache) = self.cache.as_mut() {
            let new_len = cache.len().saturating_sub(dropped_count);
            cache.truncate(new_len);
        }
        dropped
    }

    /// Remove a single nonce. `BinaryHeap` exposes no positional removal, so this
    /// drains the heap into a vec, drops the one matching entry, and re-heapifies —
    /// an O(n) cost that's acceptable given the small per-account population, and the
    /// same pattern the priced-heap rebuild uses.
    pub fn remove(&mut self, nonce: u64) -> bool {
        if self.items.remove(&nonce).is_none() {
            return false;
        }
        let mut entries = std::mem::take(&mut self.index).into_vec();
        if let Some(pos) = entries.iter().position(|&Reverse(n)| n == nonce) {
            entries.swap_remove(pos);
        }
        self.index = BinaryHeap::from(entries);
        self.cache = None;
        true
    }

    /// Pop the contiguous run of nonces starting at the heap's current minimum,
    /// provided that minimum is not greater than `start`. This intentionally starts
    /// from the heap minimum rather than `start` itself: if the minimum is already
    /// below `start` the run is still drained (self-correcting per spec §4.1).
    pub fn ready(&mut self, start: u64) -> Vec<TxRef> {
        let min = match self.index.peek() {
            Some(&Reverse(n)) => n,
            None => return Vec::new(),
        };
        if min > start {
            return Vec::new();
        }

        let mut ready = Vec::new();
        let mut next = min;
        while self.items.contains_key(&next) {
            self.index.pop();
            let tx = self
                .items
                .remove(&next)
                .expect("just checked contains_key");
            ready.push(tx);
            next += 1;
        }
        self.cache = None;
        ready
    }

    /// Ascending-by-nonce snapshot of the current contents, rebuilding `cache` if
    /// absent.
    pub fn flatten(&mut self) -> Vec<TxRef> {
        if self.cache.is_none() {
            let mut all: Vec<TxRef> = self.items.values().cloned().collect();
            all.sort_by_key(|tx| tx.nonce);
            self.cache = Some(all);
        }
        self.cache.clone().expect("populated above")
    }

    #[cfg(test)]
    pub(crate) fn cache_is_some(&self) -> bool {
        self.cache.is_some()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use ethereum_types::{H256, U256};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn mk_tx(nonce: u64) -> TxRef {
        std::sync::Arc::new(crate::types::PooledTransaction::new(
            H256::from_low_u64_be(nonce),
            nonce,
            U256::from(nonce),
            21_000,
            U256::from(nonce),
            Default::default(),
        ))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u64),
        Forward(u64),
        Remove(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..32).prop_map(Op::Put),
            (0u64..32).prop_map(Op::Forward),
            (0u64..32).prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// Properties 1 & 2: the heap index's multiset of nonces always agrees with
        /// `items`' keys, and a present cache always equals `items` sorted ascending,
        /// after any sequence of put/forward/remove operations.
        #[test]
        fn index_and_cache_stay_consistent(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let mut m = NonceSortedMap::new();
            for op in ops {
                match op {
                    Op::Put(n) => m.put(mk_tx(n)),
                    Op::Forward(t) => { m.forward(t); }
                    Op::Remove(n) => { m.remove(n); }
                }

                let heap_nonces: HashSet<u64> = m.index.iter().map(|&Reverse(n)| n).collect();
                let item_nonces: HashSet<u64> = m.items.keys().copied().collect();
                prop_assert_eq!(heap_nonces, item_nonces);

                if let Some(cache) = &m.cache {
                    let mut expected: Vec<u64> = m.items.keys().copied().collect();
                    expected.sort_unstable();
                    let actual: Vec<u64> = cache.iter().map(|t| t.nonce).collect();
                    prop_assert_eq!(actual, expected);
                }
            }
        }

        /// Property 3: `forward(t)` removes exactly the entries with `nonce < t` that
        /// were present, and leaves the remainder untouched.
        #[test]
        fn forward_removes_exactly_below_threshold(
            nonces in prop::collection::hash_set(0u64..64, 0..20),
            threshold in 0u64..64,
        ) {
            let mut m = NonceSortedMap::new();
            for n in &nonces {
                m.put(mk_tx(*n));
            }

            let removed: HashSet<u64> = m.forward(threshold).iter().map(|t| t.nonce).collect();
            let expected_removed: HashSet<u64> =
                nonces.iter().copied().filter(|n| *n < threshold).collect();
            prop_assert_eq!(removed, expected_removed);

            let remaining: HashSet<u64> = m.items.keys().copied().collect();
            let expected_remaining: HashSet<u64> =
                nonces.iter().copied().filter(|n| *n >= threshold).collect();
            prop_assert_eq!(remaining, expected_remaining);
        }
    }
}
