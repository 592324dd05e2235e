// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Transaction view consumed by the pool core.
//!
//! The pool never constructs or mutates a transaction: it is handed one by whatever
//! validated and signed it upstream, and only ever reads `hash`, `nonce`, `gas_price`,
//! `gas` and `cost` off of it.

use ethereum_types::{Address, H256, U256};
use rlp::{DecoderError, Rlp, RlpStream};
use std::sync::Arc;

/// A transaction as the pool core sees it: signed, validated, immutable.
///
/// `cost` is precomputed by the caller (`gas * gas_price + value`) rather than derived
/// here, since the pool has no notion of `value` and should not need one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledTransaction {
    pub hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas: u64,
    pub cost: U256,
    pub sender: Address,
}

impl PooledTransaction {
    pub fn new(
        hash: H256,
        nonce: u64,
        gas_price: U256,
        gas: u64,
        cost: U256,
        sender: Address,
    ) -> Self {
        Self {
            hash,
            nonce,
            gas_price,
            gas,
            cost,
            sender,
        }
    }
}

/// The journal's canonical on-disk encoding: plain RLP, the wire format this crate's
/// corpus already uses for transactions elsewhere.
impl rlp::Encodable for PooledTransaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        s.append(&self.hash);
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas);
        s.append(&self.cost);
        s.append(&self.sender);
    }
}

impl rlp::Decodable for PooledTransaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 6 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(PooledTransaction {
            hash: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            gas_price: rlp.val_at(2)?,
            gas: rlp.val_at(3)?,
            cost: rlp.val_at(4)?,
            sender: rlp.val_at(5)?,
        })
    }
}

/// Transactions are shared between the global hash map, one account list, and the
/// priced heap; `Arc` is the cheap-clone vehicle for that.
pub type TxRef = Arc<PooledTransaction>;

/// Predicate identifying transactions submitted through the node's own interfaces.
/// Local transactions are protected from priced eviction (§4.3) and are the only ones
/// ever written to the journal (§4.4).
pub trait LocalSet {
    fn is_local(&self, sender: &Address) -> bool;
}

/// A `LocalSet` that treats every sender as remote; useful as the default collaborator
/// for callers that don't distinguish local submissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocals;

impl LocalSet for NoLocals {
    fn is_local(&self, _sender: &Address) -> bool {
        false
    }
}

impl<F> LocalSet for F
where
    F: Fn(&Address) -> bool,
{
    fn is_local(&self, sender: &Address) -> bool {
        self(sender)
    }
}
