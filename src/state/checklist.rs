//! Journaled accumulator of touched accounts, storage slots and observed slot values.
//!
//! Used to derive the storage check list of a transaction from its execution, and to seed
//! it from a list the transaction declared up front.

use alloy_primitives::{Address, B256};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::transaction::{StorageCheckList, StorageCheckTuple, StorageKeyValueCheck};

/// Result of [`StorageCheckSet::contains`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotPresence {
    pub address: bool,
    pub slot: bool,
    /// The recorded value equals the queried one. Only meaningful when `slot` is set.
    pub value_matches: bool,
}

/// What [`StorageCheckSet::add_slot_and_value`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotChange {
    pub address_added: bool,
    pub slot_added: bool,
    /// The slot was already tracked with a different value. The first recorded value is
    /// kept and reported here.
    pub conflicting_value: Option<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalEntry {
    AddressAdded(Address),
    SlotAdded(Address, B256),
}

/// Set of `(address, slot, value)` touches with undo support.
///
/// Every addition is journaled; [`StorageCheckSet::revert_to`] undoes additions made after
/// a [`StorageCheckSet::checkpoint`]. Conflicting observations never modify the set.
#[derive(Debug, Clone, Default)]
pub struct StorageCheckSet {
    accounts: HashMap<Address, BTreeMap<B256, B256>>,
    excluded: HashSet<Address>,
    journal: Vec<JournalEntry>,
}

impl StorageCheckSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set that never records `excluded` as bare addresses.
    ///
    /// Slots of excluded accounts are still recorded; only the address-only entry is
    /// suppressed (sender, beneficiary, recipient and precompiles are implied by the transaction).
    pub fn with_excluded(excluded: impl IntoIterator<Item = Address>) -> Self {
        Self { excluded: excluded.into_iter().collect(), ..Self::default() }
    }

    /// Seeds the set from a declared list.
    pub fn extend_from_list(&mut self, list: &StorageCheckList) {
        for tuple in list.iter() {
            self.add_address(tuple.address);
            for check in &tuple.storage_key_value_checks {
                self.add_slot_and_value(tuple.address, check.index, check.value);
            }
        }
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn contains(&self, address: &Address, slot: &B256, value: &B256) -> SlotPresence {
        let Some(slots) = self.accounts.get(address) else {
            return SlotPresence::default();
        };
        match slots.get(slot) {
            Some(recorded) => {
                SlotPresence { address: true, slot: true, value_matches: recorded == value }
            }
            None => SlotPresence { address: true, slot: false, value_matches: false },
        }
    }

    /// Adds a bare address. Returns `true` if it was not tracked before.
    pub fn add_address(&mut self, address: Address) -> bool {
        if self.excluded.contains(&address) || self.accounts.contains_key(&address) {
            return false;
        }
        self.accounts.insert(address, BTreeMap::new());
        self.journal.push(JournalEntry::AddressAdded(address));
        true
    }

    /// Records that `slot` of `address` held `value`.
    pub fn add_slot_and_value(&mut self, address: Address, slot: B256, value: B256) -> SlotChange {
        let mut change = SlotChange::default();
        if !self.accounts.contains_key(&address) {
            self.accounts.insert(address, BTreeMap::new());
            self.journal.push(JournalEntry::AddressAdded(address));
            change.address_added = true;
        }
        let slots = self.accounts.entry(address).or_default();
        match slots.get(&slot) {
            Some(recorded) if *recorded != value => change.conflicting_value = Some(*recorded),
            Some(_) => {}
            None => {
                slots.insert(slot, value);
                self.journal.push(JournalEntry::SlotAdded(address, slot));
                change.slot_added = true;
            }
        }
        change
    }

    /// Marks the current journal position.
    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Undoes every addition made after `checkpoint`.
    pub fn revert_to(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            match self.journal.pop() {
                Some(JournalEntry::SlotAdded(address, slot)) => {
                    if let Some(slots) = self.accounts.get_mut(&address) {
                        slots.remove(&slot);
                    }
                }
                Some(JournalEntry::AddressAdded(address)) => {
                    self.accounts.remove(&address);
                }
                None => break,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Converts into the transaction-level list, ordered by address then slot.
    pub fn to_list(&self) -> StorageCheckList {
        let mut addresses: Vec<_> = self.accounts.keys().copied().collect();
        addresses.sort_unstable();
        let tuples = addresses
            .into_iter()
            .map(|address| StorageCheckTuple {
                address,
                storage_key_value_checks: self.accounts[&address]
                    .iter()
                    .map(|(index, value)| StorageKeyValueCheck { index: *index, value: *value })
                    .collect(),
            })
            .collect();
        StorageCheckList(tuples)
    }
}

impl PartialEq for StorageCheckSet {
    fn eq(&self, other: &Self) -> bool {
        self.accounts == other.accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn word(n: u8) -> B256 {
        B256::with_last_byte(n)
    }

    #[test]
    fn test_add_address_reports_change_once() {
        let mut set = StorageCheckSet::new();
        assert!(set.add_address(addr(1)));
        assert!(!set.add_address(addr(1)));
        assert!(set.contains_address(&addr(1)));
        assert_eq!(
            set.contains(&addr(1), &word(1), &word(0)),
            SlotPresence { address: true, slot: false, value_matches: false }
        );
    }

    #[test]
    fn test_first_slot_on_new_address_is_recorded() {
        let mut set = StorageCheckSet::new();
        let change = set.add_slot_and_value(addr(1), word(1), word(7));
        assert_eq!(
            change,
            SlotChange { address_added: true, slot_added: true, conflicting_value: None }
        );
        assert_eq!(
            set.contains(&addr(1), &word(1), &word(7)),
            SlotPresence { address: true, slot: true, value_matches: true }
        );
    }

    #[test]
    fn test_conflicting_value_is_reported_not_overwritten() {
        let mut set = StorageCheckSet::new();
        set.add_slot_and_value(addr(1), word(1), word(7));

        let same = set.add_slot_and_value(addr(1), word(1), word(7));
        assert_eq!(same, SlotChange::default());

        let conflict = set.add_slot_and_value(addr(1), word(1), word(8));
        assert_eq!(conflict.conflicting_value, Some(word(7)));
        assert!(!conflict.slot_added);
        assert!(set.contains(&addr(1), &word(1), &word(7)).value_matches);
    }

    #[test]
    fn test_revert_to_checkpoint() {
        let mut set = StorageCheckSet::new();
        set.add_address(addr(1));
        let mark = set.checkpoint();

        set.add_slot_and_value(addr(1), word(1), word(1));
        set.add_slot_and_value(addr(2), word(2), word(2));
        set.revert_to(mark);

        assert!(set.contains_address(&addr(1)));
        assert!(!set.contains(&addr(1), &word(1), &word(1)).slot);
        assert!(!set.contains_address(&addr(2)));
    }

    #[test]
    fn test_excluded_addresses_only_keep_slots() {
        let mut set = StorageCheckSet::with_excluded([addr(1)]);
        assert!(!set.add_address(addr(1)));
        assert!(set.is_empty());

        set.add_slot_and_value(addr(1), word(3), word(4));
        assert!(set.contains(&addr(1), &word(3), &word(4)).value_matches);
    }

    #[test]
    fn test_to_list_is_sorted() {
        let mut set = StorageCheckSet::new();
        set.add_slot_and_value(addr(2), word(9), word(1));
        set.add_slot_and_value(addr(1), word(5), word(2));
        set.add_slot_and_value(addr(1), word(3), word(3));

        let list = set.to_list();
        assert_eq!(list.0[0].address, addr(1));
        assert_eq!(list.0[0].storage_key_value_checks[0].index, word(3));
        assert_eq!(list.storage_key_value_checks(), 3);

        let mut copy = StorageCheckSet::new();
        copy.extend_from_list(&list);
        assert_eq!(copy, set);
    }
}
