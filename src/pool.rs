// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Orchestration wiring the four core components into one insertable, queryable pool:
//! per-account pending/future queues, a global priced heap, and an optional journal of
//! local transactions.
//!
//! Signing, validation, balance/gas oracles, gossip and block inclusion stay external
//! collaborators: the caller supplies `account_nonce` on every `insert` rather than
//! this facade owning a world-state lookup.

use crate::account_list::AccountTxList;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::journal::TxJournal;
use crate::priced_heap::PricedHeap;
use crate::types::{LocalSet, TxRef};
use ethereum_types::{Address, H256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Outcome of a successful [`TxPool::insert`].
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// The incumbent transaction this insert replaced, if any.
    pub replaced: Option<TxRef>,
    /// Previously-queued transactions promoted into the pending queue because this
    /// insert filled the gap ahead of them.
    pub promoted: Vec<TxRef>,
}

pub struct TxPool<L: LocalSet> {
    config: PoolConfig,
    all: Rc<RefCell<HashMap<H256, TxRef>>>,
    pending: HashMap<Address, AccountTxList>,
    queue: HashMap<Address, AccountTxList>,
    priced: PricedHeap,
    journal: Option<TxJournal>,
    locals: L,
}

impl<L: LocalSet> TxPool<L> {
    pub fn new(config: PoolConfig, locals: L) -> Self {
        let all: Rc<RefCell<HashMap<H256, TxRef>>> = Rc::new(RefCell::new(HashMap::new()));
        let all_for_heap = all.clone();
        let priced = PricedHeap::new(move |hash: &H256| all_for_heap.borrow().contains_key(hash));
        let journal = config.journal_path.clone().map(TxJournal::new);

        Self {
            config,
            all,
            pending: HashMap::new(),
            queue: HashMap::new(),
            priced,
            journal,
            locals,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.all.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.borrow().is_empty()
    }

    pub fn get(&self, hash: &H256) -> Option<TxRef> {
        self.all.borrow().get(hash).cloned()
    }

    pub fn pending_count(&self, sender: &Address) -> usize {
        self.pending.get(sender).map_or(0, |l| l.len())
    }

    pub fn queued_count(&self, sender: &Address) -> usize {
        self.queue.get(sender).map_or(0, |l| l.len())
    }

    /// Replay the journal (if configured) into this pool. Each replayed transaction is
    /// admitted via the same path as [`TxPool::insert`], with `account_nonce` taken
    /// from `nonce_of` since the journal itself carries no account-state snapshot.
    pub fn load_journal(&mut self, nonce_of: impl Fn(&Address) -> u64) -> Result<()> {
        let mut journal = match self.journal.take() {
            Some(j) => j,
            None => return Ok(()),
        };

        let stats = journal.load(|batch| {
            let mut errs = Vec::new();
            for tx in batch {
                let account_nonce = nonce_of(&tx.sender);
                if let Err(e) = self.insert_inner(tx.clone(), account_nonce, true) {
                    errs.push(e);
                }
            }
            errs
        })?;

        self.journal = Some(journal);
        if stats.failed > 0 {
            log::warn!(
                "journal replay rejected {} of {} transactions",
                stats.failed,
                stats.parsed
            );
        }
        Ok(())
    }

    /// Admit `tx` into the pool. `account_nonce` is the sender's current on-chain
    /// nonce, supplied by the caller (an external collaborator per spec §1).
    pub fn insert(&mut self, tx: TxRef, account_nonce: u64) -> Result<InsertOutcome> {
        let local = self.locals.is_local(&tx.sender);
        self.insert_inner(tx, account_nonce, local)
    }

    fn insert_inner(&mut self, tx: TxRef, account_nonce: u64, local: bool) -> Result<InsertOutcome> {
        if tx.nonce < account_nonce {
            return Err(Error::NonceTooLow {
                tx_nonce: tx.nonce,
                account_nonce,
            });
        }

        let global_count = self.len();
        let global_cap = (self.config.global_slots + self.config.global_queue) as usize;
        if !local && global_count >= global_cap && self.priced.underpriced(&tx, &self.locals) {
            return Err(Error::Underpriced);
        }

        let sender = tx.sender;
        let pending = self
            .pending
            .entry(sender)
            .or_insert_with(|| AccountTxList::new(true));

        let next_pending_nonce = account_nonce + pending.len() as u64;
        let goes_to_pending = pending.overlaps(&tx) || tx.nonce == next_pending_nonce;

        let (replaced, mut promoted) = if goes_to_pending {
            if !pending.overlaps(&tx) && pending.len() >= self.config.account_slots as usize {
                return Err(Error::AccountLimitReached);
            }
            let (accepted, replaced) = pending.add(tx.clone(), self.config.price_bump_percent);
            if !accepted {
                return Err(Error::Underpriced);
            }
            self.on_admitted(&tx, replaced.as_ref(), local)?;

            let next = account_nonce + self.pending[&sender].len() as u64;
            let promoted = self.promote(sender, next);
            (replaced, promoted)
        } else {
            let queue = self
                .queue
                .entry(sender)
                .or_insert_with(|| AccountTxList::new(false));
            if !queue.overlaps(&tx) && queue.len() >= self.config.account_queue as usize {
                return Err(Error::AccountLimitReached);
            }
            let (accepted, replaced) = queue.add(tx.clone(), self.config.price_bump_percent);
            if !accepted {
                return Err(Error::Underpriced);
            }
            self.on_admitted(&tx, replaced.as_ref(), local)?;
            (replaced, Vec::new())
        };

        self.enforce_global_limits();
        promoted.retain(|t| self.all.borrow().contains_key(&t.hash));

        // `enforce_global_limits` evicts by price and protects locals, so a remote
        // transaction that was just admitted can come straight back out again if the
        // pool is already at capacity and every cheaper entry happens to be local
        // (and therefore unevictable). `underpriced` only rejects it up front when it
        // is cheaper than the *current* floor; it cannot see that the floor is
        // entirely walled off by protected transactions. Surface that outcome here.
        if !local && !self.all.borrow().contains_key(&tx.hash) {
            return Err(Error::PoolLimitReached);
        }

        Ok(InsertOutcome { replaced, promoted })
    }

    fn on_admitted(&mut self, tx: &TxRef, replaced: Option<&TxRef>, local: bool) -> Result<()> {
        if let Some(old) = replaced {
            self.all.borrow_mut().remove(&old.hash);
            self.priced.removed();
        }
        self.all.borrow_mut().insert(tx.hash, tx.clone());
        self.priced.put(tx.clone());

        if local {
            if let Some(journal) = self.journal.as_mut() {
                if let Err(err) = journal.insert(tx) {
                    if !matches!(err, Error::NoActiveJournal) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Move the contiguous run of ready transactions out of `sender`'s future queue
    /// and into its pending queue.
    fn promote(&mut self, sender: Address, start: u64) -> Vec<TxRef> {
        let ready = match self.queue.get_mut(&sender) {
            Some(queue) => queue.ready(start),
            None => return Vec::new(),
        };
        if ready.is_empty() {
            return Vec::new();
        }
        let pending = self
            .pending
            .entry(sender)
            .or_insert_with(|| AccountTxList::new(true));
        for tx in &ready {
            pending.force_put(tx.clone());
        }
        if self.queue.get(&sender).map_or(false, |q| q.is_empty()) {
            self.queue.remove(&sender);
        }
        ready
    }

    /// Drop every transaction from `sender` below `new_nonce` (it has already been
    /// included on-chain) and promote whatever becomes ready as a result.
    pub fn reset_account(&mut self, sender: Address, new_nonce: u64) -> Vec<TxRef> {
        let mut removed = Vec::new();
        if let Some(pending) = self.pending.get_mut(&sender) {
            removed.extend(pending.forward(new_nonce));
        }
        if let Some(queue) = self.queue.get_mut(&sender) {
            removed.extend(queue.forward(new_nonce));
        }
        for tx in &removed {
            if self.all.borrow_mut().remove(&tx.hash).is_some() {
                self.priced.removed();
            }
        }
        let pending_len = self.pending.get(&sender).map_or(0, |l| l.len());
        self.promote(sender, new_nonce + pending_len as u64);
        removed
    }

    /// Evict the globally cheapest remote transactions until the pool is back within
    /// its configured slot count.
    pub fn enforce_global_limits(&mut self) {
        let cap = (self.config.global_slots + self.config.global_queue) as usize;
        let over = self.len().saturating_sub(cap);
        if over == 0 {
            return;
        }
        // `discard` already popped these out of the heap bodily — there is no stale
        // placeholder left behind for them, so cleanup must not notify the heap of a
        // removal for these hashes the way `remove` would.
        let dropped = self.priced.discard(over, &self.locals);
        for tx in dropped {
            self.remove_evicted(&tx.hash);
        }
    }

    /// Remove a single transaction by hash, cascading strict invalidation within its
    /// account's pending list.
    pub fn remove(&mut self, hash: &H256) -> Option<TxRef> {
        self.remove_inner(hash, true)
    }

    /// Like `remove`, but for a hash `PricedHeap::discard`/`cap` already popped out of
    /// the heap itself — skips the heap notification for `hash` while still notifying
    /// it for any cascaded (strict-invalidated) transactions, which remain physically
    /// present in the heap as now-stale entries.
    fn remove_evicted(&mut self, hash: &H256) -> Option<TxRef> {
        self.remove_inner(hash, false)
    }

    fn remove_inner(&mut self, hash: &H256, notify_heap: bool) -> Option<TxRef> {
        let tx = self.all.borrow_mut().remove(hash)?;
        if notify_heap {
            self.priced.removed();
        }

        if let Some(pending) = self.pending.get_mut(&tx.sender) {
            let (_, invalidated) = pending.remove(tx.nonce);
            for inv in invalidated {
                self.all.borrow_mut().remove(&inv.hash);
                self.priced.removed();
            }
        }
        if let Some(queue) = self.queue.get_mut(&tx.sender) {
            queue.remove(tx.nonce);
        }
        Some(tx)
    }

    /// Rewrite the journal from the pool's current live set and close it down
    /// cleanly. Intended for node shutdown.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            let locals = &self.locals;
            let all = self.all.borrow();
            let local_txs: Vec<TxRef> = all
                .values()
                .filter(|tx| locals.is_local(&tx.sender))
                .cloned()
                .collect();
            drop(all);
            journal.rotate(local_txs.iter())?;
            journal.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NoLocals, PooledTransaction};
    use ethereum_types::U256;
    use std::sync::Arc;

    fn tx(sender: Address, nonce: u64, gas_price: u64) -> TxRef {
        Arc::new(PooledTransaction::new(
            H256::from_low_u64_be(sender.to_low_u64_be() * 1000 + nonce),
            nonce,
            U256::from(gas_price),
            21_000,
            U256::from(gas_price) * 21_000,
            sender,
        ))
    }

    fn sender(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn contiguous_insert_goes_straight_to_pending() {
        let mut pool = TxPool::new(PoolConfig::default(), NoLocals);
        let a = sender(1);
        pool.insert(tx(a, 0, 10), 0).unwrap();
        assert_eq!(pool.pending_count(&a), 1);
        assert_eq!(pool.queued_count(&a), 0);
    }

    #[test]
    fn gapped_insert_goes_to_queue_then_promotes() {
        let mut pool = TxPool::new(PoolConfig::default(), NoLocals);
        let a = sender(1);
        let outcome = pool.insert(tx(a, 1, 10), 0).unwrap();
        assert!(outcome.promoted.is_empty());
        assert_eq!(pool.pending_count(&a), 0);
        assert_eq!(pool.queued_count(&a), 1);

        let outcome = pool.insert(tx(a, 0, 10), 0).unwrap();
        assert_eq!(pool.pending_count(&a), 2);
        assert_eq!(pool.queued_count(&a), 0);
        assert_eq!(outcome.promoted.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn nonce_too_low_is_rejected() {
        let mut pool = TxPool::new(PoolConfig::default(), NoLocals);
        let a = sender(1);
        let err = pool.insert(tx(a, 0, 10), 5).unwrap_err();
        assert!(matches!(err, Error::NonceTooLow { .. }));
    }

    #[test]
    fn remove_cascades_strict_invalidation() {
        let mut pool = TxPool::new(PoolConfig::default(), NoLocals);
        let a = sender(1);
        for n in 0..3 {
            pool.insert(tx(a, n, 10), 0).unwrap();
        }
        assert_eq!(pool.pending_count(&a), 3);

        let removed_hash = tx(a, 0, 10).hash;
        pool.remove(&removed_hash);
        assert_eq!(pool.pending_count(&a), 0, "nonce 1 and 2 are invalidated too");
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn global_cap_evicts_cheapest_remote() {
        let mut config = PoolConfig::default();
        config.global_slots = 2;
        config.global_queue = 0;
        config.account_slots = 10;
        let mut pool = TxPool::new(config, NoLocals);

        for (i, price) in [10u64, 20, 30].into_iter().enumerate() {
            pool.insert(tx(sender(i as u64), 0, price), 0).unwrap();
        }
        assert_eq!(pool.len(), 2, "cheapest of the three was evicted to respect the cap");
    }

    #[test]
    fn local_transactions_are_protected_from_global_cap() {
        let mut config = PoolConfig::default();
        config.global_slots = 1;
        config.global_queue = 0;
        let local_sender = sender(1);
        let locals = move |s: &Address| *s == local_sender;
        let mut pool = TxPool::new(config, locals);

        pool.insert(tx(local_sender, 0, 1), 0).unwrap();
        // The pool is already at capacity with a protected local transaction, and
        // nothing cheaper is evictable to make room — even though this remote
        // transaction is far pricier, there is nowhere for it to go.
        let err = pool
            .insert(tx(sender(2), 0, 1_000_000), 0)
            .unwrap_err();
        assert!(matches!(err, Error::PoolLimitReached));

        assert!(pool.get(&tx(local_sender, 0, 1).hash).is_some());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remote_insert_rejected_when_pool_full_of_locals() {
        let mut config = PoolConfig::default();
        config.global_slots = 2;
        config.global_queue = 0;
        let local_senders = [sender(1), sender(2)];
        let locals = move |s: &Address| local_senders.contains(s);
        let mut pool = TxPool::new(config, locals);

        pool.insert(tx(sender(1), 0, 1), 0).unwrap();
        pool.insert(tx(sender(2), 0, 1), 0).unwrap();

        let err = pool.insert(tx(sender(3), 0, 1_000_000), 0).unwrap_err();
        assert!(matches!(err, Error::PoolLimitReached));
        assert_eq!(pool.len(), 2, "the rejected remote transaction left no trace");
        assert!(pool.get(&tx(sender(3), 0, 1_000_000).hash).is_none());
    }

    #[test]
    fn journal_round_trips_through_shutdown_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        let local_sender = sender(1);
        let locals = move |s: &Address| *s == local_sender;

        let mut config = PoolConfig::default();
        config.journal_path = Some(path.clone());

        let mut pool = TxPool::new(config.clone(), locals);
        pool.insert(tx(local_sender, 0, 10), 0).unwrap();
        pool.insert(tx(local_sender, 1, 10), 0).unwrap();
        pool.shutdown().unwrap();

        let mut reloaded = TxPool::new(config, locals);
        reloaded.load_journal(|_| 0).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.pending_count(&local_sender), 2);
    }

    #[test]
    fn remote_transactions_are_never_journaled() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        let mut config = PoolConfig::default();
        config.journal_path = Some(path);

        let mut pool = TxPool::new(config.clone(), NoLocals);
        pool.insert(tx(sender(1), 0, 10), 0).unwrap();
        pool.shutdown().unwrap();

        let mut reloaded = TxPool::new(config, NoLocals);
        reloaded.load_journal(|_| 0).unwrap();
        assert_eq!(reloaded.len(), 0, "nothing was local, so nothing was journaled");
    }
}
