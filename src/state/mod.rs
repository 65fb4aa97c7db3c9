//! World state access.
//!
//! The sealer never owns a storage engine. It works through [`StateView`], a mutable,
//! snapshot-able handle on the state at some root. [`MemoryState`] is the in-memory
//! implementation backed by revm's `CacheDB`.

mod checklist;
mod memory;

pub use checklist::{SlotChange, SlotPresence, StorageCheckSet};
pub use memory::MemoryState;

use alloy_primitives::{Address, B256, U256};
use revm::state::AccountInfo;
use std::ops::{Deref, DerefMut};

/// Opaque checkpoint of a [`StateView`].
///
/// Snapshots follow stack discipline: a snapshot is valid until it is reverted, discarded,
/// or an older snapshot is reverted or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub(crate) usize);

/// A mutable view of the world state rooted at some block.
pub trait StateView {
    /// Takes a checkpoint of the current contents.
    ///
    /// The sealer takes one snapshot per candidate transaction, so the cost of this call
    /// is paid once per candidate. Implementations over large states should record a
    /// journal position here rather than copy contents; see [`MemoryState`] for one that
    /// copies.
    fn snapshot(&mut self) -> SnapshotId;

    /// Restores the contents captured by `id`, dropping it and every newer snapshot.
    fn revert_to_snapshot(&mut self, id: SnapshotId);

    /// Keeps the current contents and forgets `id` and every newer snapshot.
    fn discard_snapshot(&mut self, id: SnapshotId);

    /// Starts background prefetching. Purely an optimisation hint.
    fn start_prefetcher(&mut self, tag: &str);

    /// Stops background prefetching started by [`StateView::start_prefetcher`].
    fn stop_prefetcher(&mut self);

    /// Account fields, `None` when the account does not exist.
    fn account(&self, address: Address) -> Option<AccountInfo>;

    /// Current value of a storage slot. Missing slots read as zero.
    fn storage(&self, address: Address, slot: U256) -> U256;

    /// Credits `amount` wei to `address`, creating the account when needed.
    fn increase_balance(&mut self, address: Address, amount: U256);

    /// Commitment to the full state contents.
    fn state_root(&self) -> B256;

    fn nonce(&self, address: Address) -> u64 {
        self.account(address).map(|info| info.nonce).unwrap_or_default()
    }

    fn balance(&self, address: Address) -> U256 {
        self.account(address).map(|info| info.balance).unwrap_or_default()
    }
}

/// Keeps a state prefetcher running for as long as the guard lives.
///
/// The prefetcher is stopped on drop, so every exit path of the owning scope releases it.
#[derive(Debug)]
pub struct PrefetchGuard<S: StateView> {
    state: S,
}

impl<S: StateView> PrefetchGuard<S> {
    /// Starts the prefetcher on `state` under `tag`.
    pub fn start(mut state: S, tag: &str) -> Self {
        state.start_prefetcher(tag);
        Self { state }
    }
}

impl<S: StateView> Deref for PrefetchGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S: StateView> DerefMut for PrefetchGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

impl<S: StateView> Drop for PrefetchGuard<S> {
    fn drop(&mut self) {
        self.state.stop_prefetcher();
    }
}
