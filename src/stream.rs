//! The ordered candidate stream: caller priority list first, then the pool.

use std::{collections::VecDeque, sync::Arc};
use tracing::trace;

use crate::{
    pool::{TransactionPool, TransactionsByPriceAndNonce},
    transaction::SignedTransaction,
};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The caller's explicit list.
    Priority,
    /// The fee ordered pool fallback.
    Pool,
}

/// The next transaction to consider.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub tx: Arc<SignedTransaction>,
    pub origin: Origin,
}

/// Which source the stream currently reads from.
#[derive(Debug)]
enum Cursor<'a, P> {
    Priority,
    Pool {
        pool: &'a P,
        ordering: TransactionsByPriceAndNonce,
        resolved: Option<Arc<SignedTransaction>>,
    },
    Exhausted,
}

/// Merges the caller priority list with a captured pool ordering.
///
/// The priority list is consumed strictly left to right and is never fee sorted against
/// the pool. The pool is only consulted once the list is exhausted, and its entries are
/// resolved lazily on [`TxStream::peek`]. Entries that no longer resolve are dropped.
///
/// [`TxStream::advance`] and [`TxStream::skip`] are the only ways to move forward and both
/// consume the peeked transaction.
#[derive(Debug)]
pub struct TxStream<'a, P> {
    priority: VecDeque<Arc<SignedTransaction>>,
    cursor: Cursor<'a, P>,
    fallback: Option<(&'a P, TransactionsByPriceAndNonce)>,
}

impl<'a, P: TransactionPool> TxStream<'a, P> {
    /// Builds a stream over `priority` falling through to `fallback` when given.
    pub fn new(
        priority: Vec<SignedTransaction>,
        fallback: Option<(&'a P, TransactionsByPriceAndNonce)>,
    ) -> Self {
        let mut stream = Self {
            priority: priority.into_iter().map(Arc::new).collect(),
            cursor: Cursor::Priority,
            fallback,
        };
        stream.settle();
        stream
    }

    /// Moves the cursor to the next source once the current one is exhausted.
    fn settle(&mut self) {
        loop {
            let next = match &self.cursor {
                Cursor::Priority if self.priority.is_empty() => match self.fallback.take() {
                    Some((pool, ordering)) => Cursor::Pool { pool, ordering, resolved: None },
                    None => Cursor::Exhausted,
                },
                Cursor::Pool { ordering, .. } if ordering.is_empty() => Cursor::Exhausted,
                _ => return,
            };
            self.cursor = next;
        }
    }

    /// Returns the next candidate without consuming it.
    pub fn peek(&mut self) -> Option<Candidate> {
        match &mut self.cursor {
            Cursor::Priority => self
                .priority
                .front()
                .map(|tx| Candidate { tx: tx.clone(), origin: Origin::Priority }),
            Cursor::Pool { pool, ordering, resolved } => loop {
                if let Some(tx) = resolved {
                    return Some(Candidate { tx: tx.clone(), origin: Origin::Pool });
                }
                let head = ordering.peek()?;
                match pool.get(&head.hash) {
                    Some(tx) => *resolved = Some(tx),
                    None => {
                        trace!(
                            target: "sealer",
                            tx_hash = ?head.hash,
                            "dropping unresolvable pool transaction"
                        );
                        ordering.pop();
                    }
                }
            },
            Cursor::Exhausted => None,
        }
    }

    /// Consumes the peeked transaction as included.
    pub fn advance(&mut self) {
        match &mut self.cursor {
            Cursor::Priority => {
                self.priority.pop_front();
            }
            Cursor::Pool { ordering, resolved, .. } => {
                *resolved = None;
                ordering.shift();
            }
            Cursor::Exhausted => {}
        }
        self.settle();
    }

    /// Consumes the peeked transaction as rejected.
    ///
    /// For pool transactions the sender's later nonces are dropped as well, since they can
    /// no longer execute in order.
    pub fn skip(&mut self) {
        match &mut self.cursor {
            Cursor::Priority => {
                self.priority.pop_front();
            }
            Cursor::Pool { ordering, resolved, .. } => {
                *resolved = None;
                ordering.pop();
            }
            Cursor::Exhausted => {}
        }
        self.settle();
    }

    /// Whether both sources are exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.cursor, Cursor::Exhausted)
    }
}
