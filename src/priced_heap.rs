// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Global min-price heap over every pooled transaction, with lazy deletion.

use crate::config::STALE_RATIO;
use crate::types::{LocalSet, TxRef};
use ethereum_types::{H256, U256};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry ordered so that the "worst" transaction — cheapest gas price, ties
/// broken toward the higher nonce — is what `BinaryHeap::pop` returns first. This is
/// the priced-heap eviction order from spec §4.3: `Less(a, b)` there defines a min-heap
/// whose top is the next thing to discard, which is exactly `Ord::max` under the
/// comparison below since `std::collections::BinaryHeap` is a max-heap.
struct PricedEntry(TxRef);

impl PartialEq for PricedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.hash == other.0.hash
    }
}
impl Eq for PricedEntry {}

impl Ord for PricedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.gas_price != other.0.gas_price {
            other.0.gas_price.cmp(&self.0.gas_price)
        } else {
            self.0.nonce.cmp(&other.0.nonce)
        }
    }
}

impl PartialOrd for PricedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-price heap over every transaction currently in the pool.
///
/// The heap does not own the authoritative transaction set and does not support
/// explicit removal: the pool tells it `removed()` whenever a transaction leaves the
/// global map, and the heap skims those stale entries off lazily whenever it is
/// otherwise touched. `is_live` is an injected "does the global map still have this
/// hash" callback, standing in for a literal shared reference to the map.
pub struct PricedHeap {
    is_live: Box<dyn Fn(&H256) -> bool>,
    items: BinaryHeap<PricedEntry>,
    stales: usize,
}

impl PricedHeap {
    pub fn new(is_live: impl Fn(&H256) -> bool + 'static) -> Self {
        Self {
            is_live: Box::new(is_live),
            items: BinaryHeap::new(),
            stales: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stales(&self) -> usize {
        self.stales
    }

    /// Add a transaction. Never deduplicates: a transaction is expected to be put
    /// exactly once, whether it is local or remote — locals still need to occupy a
    /// heap slot so `cap`/`discard` see and protect them.
    pub fn put(&mut self, tx: TxRef) {
        self.items.push(PricedEntry(tx));
    }

    /// Notify the heap that a transaction left the global map. Triggers a rebuild once
    /// stale entries exceed `1/STALE_RATIO` of the heap.
    pub fn removed(&mut self) {
        self.stales += 1;
        if self.stales > self.items.len() / STALE_RATIO {
            self.rebuild();
        }
    }

    fn rebuild(&mut self) {
        let entries = std::mem::take(&mut self.items).into_vec();
        let live: Vec<PricedEntry> = entries
            .into_iter()
            .filter(|entry| (self.is_live)(&entry.0.hash))
            .collect();
        self.items = BinaryHeap::from(live);
        self.stales = 0;
    }

    /// Pop transactions priced below `threshold`, returning the remote ones for the
    /// caller to evict elsewhere. Local transactions below the threshold are preserved
    /// in the heap, not returned. Stops as soon as a transaction at or above the
    /// threshold is found.
    pub fn cap(&mut self, threshold: U256, locals: &dyn LocalSet) -> Vec<TxRef> {
        let mut drop = Vec::new();
        let mut save = Vec::new();
        while let Some(entry) = self.items.pop() {
            if !(self.is_live)(&entry.0.hash) {
                self.stales = self.stales.saturating_sub(1);
                continue;
            }
            if entry.0.gas_price >= threshold {
                save.push(entry);
                break;
            }
            if locals.is_local(&entry.0.sender) {
                save.push(entry);
            } else {
                drop.push(entry.0.clone());
            }
        }
        for entry in save {
            self.items.push(entry);
        }
        drop
    }

    /// Whether `tx` would be rejected for pricing below the current cheapest pooled
    /// transaction. Local transactions are never underpriced. An empty pool logs a
    /// diagnostic and returns `false` rather than failing, since a well-behaved caller
    /// should not be asking.
    pub fn underpriced(&mut self, tx: &TxRef, locals: &dyn LocalSet) -> bool {
        if locals.is_local(&tx.sender) {
            return false;
        }
        while let Some(top) = self.items.peek() {
            if (self.is_live)(&top.0.hash) {
                break;
            }
            self.items.pop();
            self.stales = self.stales.saturating_sub(1);
        }
        match self.items.peek() {
            None => {
                log::error!("pricing query on empty pool");
                false
            }
            Some(cheapest) => cheapest.0.gas_price >= tx.gas_price,
        }
    }

    /// Collect up to `count` remote, non-stale transactions for eviction, skipping
    /// stale entries and preserving local ones back into the heap.
    pub fn discard(&mut self, mut count: usize, locals: &dyn LocalSet) -> Vec<TxRef> {
        let mut drop = Vec::new();
        let mut save = Vec::new();
        while count > 0 {
            let entry = match self.items.pop() {
                Some(entry) => entry,
                None => break,
            };
            if !(self.is_live)(&entry.0.hash) {
                self.stales = self.stales.saturating_sub(1);
                continue;
            }
            if locals.is_local(&entry.0.sender) {
                save.push(entry);
            } else {
                drop.push(entry.0.clone());
                count -= 1;
            }
        }
        for entry in save {
            self.items.push(entry);
        }
        drop
    }
}
