//! In-memory state backed by revm's `CacheDB`.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use revm::{
    database::{CacheDB, EmptyDB},
    database_interface::DatabaseRef,
    primitives::KECCAK_EMPTY,
    state::{AccountInfo, Bytecode},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::debug;

use super::{SnapshotId, StateView};

/// A [`StateView`] over an in-memory account cache.
///
/// Snapshots are full copies of the cache kept on a stack, which makes a revert restore
/// the exact previous contents, including accounts that were only loaded.
///
/// Each snapshot clones every cached account and storage slot, so it costs time and memory
/// linear in the size of the state, and a seal pays that once per candidate transaction.
/// This suits tests, benchmarks and small development chains. A backend holding a real
/// chain state should implement [`StateView`] over a journal instead.
///
/// Clones are independent views. Only the prefetcher bookkeeping is shared between
/// clones so a chain can observe that every handle it gave out released its prefetcher.
#[derive(Debug, Clone)]
pub struct MemoryState {
    db: CacheDB<EmptyDB>,
    snapshots: Vec<CacheDB<EmptyDB>>,
    prefetchers: Arc<AtomicUsize>,
    prefetching: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            db: CacheDB::new(EmptyDB::default()),
            snapshots: Vec::new(),
            prefetchers: Arc::new(AtomicUsize::new(0)),
            prefetching: false,
        }
    }
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an externally owned account with the given balance.
    pub fn insert_account(&mut self, address: Address, balance: U256, nonce: u64) {
        let info = AccountInfo { balance, nonce, code_hash: KECCAK_EMPTY, code: None };
        self.db.insert_account_info(address, info);
    }

    /// Deploys runtime `code` at `address`.
    pub fn insert_contract(&mut self, address: Address, code: Bytes) {
        let bytecode = Bytecode::new_raw(code);
        let info = AccountInfo {
            balance: U256::ZERO,
            nonce: 1,
            code_hash: bytecode.hash_slow(),
            code: Some(bytecode),
        };
        self.db.insert_account_info(address, info);
    }

    /// Sets a storage slot of an existing account.
    pub fn insert_storage(&mut self, address: Address, slot: U256, value: U256) {
        if let Err(never) = self.db.insert_account_storage(address, slot, value) {
            match never {}
        }
    }

    /// Number of prefetchers currently running across this state and its clones.
    pub fn active_prefetchers(&self) -> usize {
        self.prefetchers.load(Ordering::Acquire)
    }

    /// Number of outstanding snapshots.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    pub(crate) fn db_mut(&mut self) -> &mut CacheDB<EmptyDB> {
        &mut self.db
    }
}

impl StateView for MemoryState {
    fn snapshot(&mut self) -> SnapshotId {
        self.snapshots.push(self.db.clone());
        SnapshotId(self.snapshots.len() - 1)
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        self.snapshots.truncate(id.0 + 1);
        if let Some(saved) = self.snapshots.pop() {
            self.db = saved;
        }
    }

    fn discard_snapshot(&mut self, id: SnapshotId) {
        self.snapshots.truncate(id.0);
    }

    fn start_prefetcher(&mut self, tag: &str) {
        if self.prefetching {
            return;
        }
        self.prefetching = true;
        self.prefetchers.fetch_add(1, Ordering::AcqRel);
        debug!(target: "sealer::state", tag, "started state prefetcher");
    }

    fn stop_prefetcher(&mut self) {
        if !self.prefetching {
            return;
        }
        self.prefetching = false;
        self.prefetchers.fetch_sub(1, Ordering::AcqRel);
        debug!(target: "sealer::state", "stopped state prefetcher");
    }

    fn account(&self, address: Address) -> Option<AccountInfo> {
        match self.db.basic_ref(address) {
            Ok(info) => info,
            Err(never) => match never {},
        }
    }

    fn storage(&self, address: Address, slot: U256) -> U256 {
        match self.db.storage_ref(address, slot) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    fn increase_balance(&mut self, address: Address, amount: U256) {
        let mut info = self.account(address).unwrap_or_default();
        info.balance = info.balance.saturating_add(amount);
        self.db.insert_account_info(address, info);
    }

    fn state_root(&self) -> B256 {
        let mut accounts: Vec<_> = self
            .db
            .cache
            .accounts
            .iter()
            .filter_map(|(address, account)| account.info().map(|info| (*address, info, account)))
            .collect();
        accounts.sort_unstable_by_key(|(address, _, _)| *address);

        let mut data = Vec::with_capacity(accounts.len() * 128);
        for (address, info, account) in accounts {
            data.extend_from_slice(address.as_slice());
            data.extend_from_slice(&info.nonce.to_be_bytes());
            data.extend_from_slice(&info.balance.to_be_bytes::<32>());
            data.extend_from_slice(info.code_hash.as_slice());

            let mut slots: Vec<_> =
                account.storage.iter().filter(|(_, value)| !value.is_zero()).collect();
            slots.sort_unstable_by_key(|(slot, _)| **slot);
            for (slot, value) in slots {
                data.extend_from_slice(&slot.to_be_bytes::<32>());
                data.extend_from_slice(&value.to_be_bytes::<32>());
            }
        }
        keccak256(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_restores_exact_contents() {
        let alice = Address::with_last_byte(1);
        let mut state = MemoryState::new();
        state.insert_account(alice, U256::from(100), 0);
        let root = state.state_root();

        let snap = state.snapshot();
        state.increase_balance(alice, U256::from(5));
        state.increase_balance(Address::with_last_byte(2), U256::from(1));
        assert_ne!(state.state_root(), root);

        state.revert_to_snapshot(snap);
        assert_eq!(state.state_root(), root);
        assert_eq!(state.balance(alice), U256::from(100));
        assert_eq!(state.snapshot_depth(), 0);
    }

    #[test]
    fn test_nested_snapshots_unwind_in_order() {
        let alice = Address::with_last_byte(1);
        let mut state = MemoryState::new();
        state.insert_account(alice, U256::from(1), 0);

        let outer = state.snapshot();
        state.increase_balance(alice, U256::from(10));
        let inner = state.snapshot();
        state.increase_balance(alice, U256::from(100));
        assert_eq!(state.snapshot_depth(), 2);

        state.revert_to_snapshot(inner);
        assert_eq!(state.balance(alice), U256::from(11));
        assert_eq!(state.snapshot_depth(), 1);

        state.snapshot();
        state.increase_balance(alice, U256::from(1_000));
        state.revert_to_snapshot(outer);
        assert_eq!(state.balance(alice), U256::from(1));
        assert_eq!(state.snapshot_depth(), 0);
    }

    #[test]
    fn test_discard_keeps_changes() {
        let alice = Address::with_last_byte(1);
        let mut state = MemoryState::new();

        let snap = state.snapshot();
        state.increase_balance(alice, U256::from(7));
        state.discard_snapshot(snap);

        assert_eq!(state.balance(alice), U256::from(7));
        assert_eq!(state.snapshot_depth(), 0);
    }

    #[test]
    fn test_clones_are_isolated() {
        let alice = Address::with_last_byte(1);
        let mut base = MemoryState::new();
        base.insert_account(alice, U256::from(10), 3);

        let mut view = base.clone();
        view.increase_balance(alice, U256::from(1));

        assert_eq!(base.balance(alice), U256::from(10));
        assert_eq!(view.balance(alice), U256::from(11));
        assert_eq!(view.nonce(alice), 3);
    }

    #[test]
    fn test_storage_reads() {
        let contract = Address::with_last_byte(9);
        let mut state = MemoryState::new();
        state.insert_contract(contract, Bytes::from_static(&[0x00]));
        state.insert_storage(contract, U256::from(1), U256::from(42));

        assert_eq!(state.storage(contract, U256::from(1)), U256::from(42));
        assert_eq!(state.storage(contract, U256::from(2)), U256::ZERO);
    }
}
