//! Pending transaction pool access.
//!
//! The sealer captures the pool once per run through [`TransactionPool::pending`]. The
//! capture holds [`LazyTransaction`]s: just enough to order them. The full transaction is
//! fetched with [`TransactionPool::get`] only when the stream reaches it.

use alloy_primitives::{Address, B256};
use parking_lot::RwLock;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, VecDeque},
    sync::Arc,
};

use crate::{
    error::RecoveryError,
    transaction::{ChainSigner, SignedTransaction, TxFees},
};

/// A pool entry that has not been resolved into a full transaction yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyTransaction {
    pub hash: B256,
    pub sender: Address,
    pub nonce: u64,
    pub fees: TxFees,
    pub gas_limit: u64,
    /// Arrival order in the pool. Earlier wins on equal tips.
    pub time: u64,
}

/// Source of pending transactions.
pub trait TransactionPool {
    /// Pending transactions grouped by sender, each group in ascending nonce order.
    fn pending(&self) -> HashMap<Address, Vec<LazyTransaction>>;

    /// Resolves a pending entry. `None` if the pool no longer holds it.
    fn get(&self, hash: &B256) -> Option<Arc<SignedTransaction>>;
}

// ============================================================================
// Price & Nonce Ordering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct PricedHead {
    tx: LazyTransaction,
    tip: u128,
}

impl Ord for PricedHead {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tip
            .cmp(&other.tip)
            .then_with(|| other.tx.time.cmp(&self.tx.time))
            .then_with(|| other.tx.hash.cmp(&self.tx.hash))
    }
}

impl PartialOrd for PricedHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending transactions ordered by effective tip across senders and by nonce within a
/// sender.
///
/// Only each sender's lowest nonce competes at any time. Senders whose head cannot pay the
/// base fee are dropped together with all their later nonces.
#[derive(Debug, Clone)]
pub struct TransactionsByPriceAndNonce {
    txs: HashMap<Address, VecDeque<LazyTransaction>>,
    heads: BinaryHeap<PricedHead>,
    base_fee: Option<u64>,
}

impl TransactionsByPriceAndNonce {
    pub fn new(pending: HashMap<Address, Vec<LazyTransaction>>, base_fee: Option<u64>) -> Self {
        let mut ordering = Self { txs: HashMap::new(), heads: BinaryHeap::new(), base_fee };
        for (sender, txs) in pending {
            let mut queue: VecDeque<_> = txs.into();
            if let Some(head) = queue.pop_front() {
                ordering.txs.insert(sender, queue);
                ordering.push_head(head);
            }
        }
        ordering
    }

    fn push_head(&mut self, tx: LazyTransaction) {
        match tx.fees.effective_tip_per_gas(self.base_fee) {
            Some(tip) => self.heads.push(PricedHead { tx, tip }),
            None => {
                self.txs.remove(&tx.sender);
            }
        }
    }

    /// The best transaction, if any.
    pub fn peek(&self) -> Option<&LazyTransaction> {
        self.heads.peek().map(|head| &head.tx)
    }

    /// Replaces the best transaction with the next nonce of the same sender.
    pub fn shift(&mut self) {
        let Some(head) = self.heads.pop() else {
            return;
        };
        let next = self.txs.get_mut(&head.tx.sender).and_then(VecDeque::pop_front);
        match next {
            Some(next) => self.push_head(next),
            None => {
                self.txs.remove(&head.tx.sender);
            }
        }
    }

    /// Removes the best transaction and every later nonce of the same sender.
    pub fn pop(&mut self) {
        if let Some(head) = self.heads.pop() {
            self.txs.remove(&head.tx.sender);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

// ============================================================================
// In-Memory Pool
// ============================================================================

#[derive(Debug, Default)]
struct PoolInner {
    by_hash: HashMap<B256, (LazyTransaction, Arc<SignedTransaction>)>,
    next_time: u64,
}

/// A minimal in-memory transaction pool.
#[derive(Debug)]
pub struct MemoryPool {
    signer: ChainSigner,
    inner: RwLock<PoolInner>,
}

impl MemoryPool {
    pub fn new(signer: ChainSigner) -> Self {
        Self { signer, inner: RwLock::new(PoolInner::default()) }
    }

    /// Adds a transaction, recovering its sender.
    pub fn add(&self, tx: SignedTransaction) -> Result<B256, RecoveryError> {
        let sender = self.signer.sender(&tx)?;
        let hash = tx.hash();
        let mut inner = self.inner.write();
        let time = inner.next_time;
        inner.next_time += 1;
        let lazy = LazyTransaction {
            hash,
            sender,
            nonce: tx.nonce(),
            fees: tx.fees(),
            gas_limit: tx.gas_limit(),
            time,
        };
        inner.by_hash.insert(hash, (lazy, Arc::new(tx)));
        Ok(hash)
    }

    /// Evicts a transaction. Returns whether it was present.
    pub fn remove(&self, hash: &B256) -> bool {
        self.inner.write().by_hash.remove(hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionPool for MemoryPool {
    fn pending(&self) -> HashMap<Address, Vec<LazyTransaction>> {
        let inner = self.inner.read();
        let mut pending: HashMap<Address, Vec<LazyTransaction>> = HashMap::new();
        for (lazy, _) in inner.by_hash.values() {
            pending.entry(lazy.sender).or_default().push(lazy.clone());
        }
        for txs in pending.values_mut() {
            txs.sort_unstable_by_key(|tx| (tx.nonce, tx.time));
        }
        pending
    }

    fn get(&self, hash: &B256) -> Option<Arc<SignedTransaction>> {
        self.inner.read().by_hash.get(hash).map(|(_, tx)| tx.clone())
    }
}
