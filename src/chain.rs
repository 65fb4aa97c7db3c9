//! Chain configuration, fork rules and read access to the canonical chain.

use alloy_consensus::Header;
use alloy_primitives::{B256, U256};
use parking_lot::RwLock;
use revm::primitives::hardfork::SpecId;
use std::collections::HashMap;

use crate::state::{MemoryState, StateView};

/// Base fee of the first London block.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;
/// Bounds the base fee change between consecutive blocks.
pub const BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;
/// Ratio between gas limit and gas target.
pub const ELASTICITY_MULTIPLIER: u64 = 2;

// ============================================================================
// Configuration & Rules
// ============================================================================

/// Fork schedule and execution settings of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// First block accepting EIP-155 replay protected signatures. `None` = never.
    pub eip155_block: Option<u64>,
    /// First block with an EIP-1559 base fee. `None` = never.
    pub london_block: Option<u64>,
    /// First timestamp accepting withdrawals.
    pub shanghai_time: Option<u64>,
    /// Whether unprotected (pre EIP-155) signatures are rejected once EIP-155 is active.
    pub require_replay_protection: bool,
    /// EVM specification used for execution.
    pub spec_id: SpecId,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            eip155_block: Some(0),
            london_block: Some(0),
            shanghai_time: Some(0),
            require_replay_protection: false,
            spec_id: SpecId::PRAGUE,
        }
    }
}

impl ChainConfig {
    pub fn is_eip155(&self, number: u64) -> bool {
        self.eip155_block.is_some_and(|fork| number >= fork)
    }

    pub fn is_london(&self, number: u64) -> bool {
        self.london_block.is_some_and(|fork| number >= fork)
    }

    pub fn is_shanghai(&self, timestamp: u64) -> bool {
        self.shanghai_time.is_some_and(|fork| timestamp >= fork)
    }

    /// Rules in force for a block.
    pub fn rules(&self, number: u64, is_merge: bool, timestamp: u64) -> Rules {
        Rules {
            chain_id: self.chain_id,
            is_eip155: self.is_eip155(number),
            is_london: self.is_london(number),
            is_shanghai: self.is_shanghai(timestamp),
            is_merge,
            require_replay_protection: self.require_replay_protection && self.is_eip155(number),
            spec_id: self.spec_id,
        }
    }
}

/// Fork flags for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub chain_id: u64,
    pub is_eip155: bool,
    pub is_london: bool,
    pub is_shanghai: bool,
    pub is_merge: bool,
    pub require_replay_protection: bool,
    pub spec_id: SpecId,
}

/// Computes the base fee of the block following `parent`.
pub fn calc_base_fee(config: &ChainConfig, parent: &Header) -> u64 {
    if !config.is_london(parent.number) {
        return INITIAL_BASE_FEE;
    }
    let parent_base_fee = parent.base_fee_per_gas.unwrap_or(INITIAL_BASE_FEE);
    let gas_target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if gas_target == 0 || parent.gas_used == gas_target {
        return parent_base_fee;
    }

    let base_fee = u128::from(parent_base_fee);
    let target = u128::from(gas_target);
    let denominator = u128::from(BASE_FEE_CHANGE_DENOMINATOR);
    if parent.gas_used > gas_target {
        let gas_delta = u128::from(parent.gas_used - gas_target);
        let delta = (base_fee * gas_delta / target / denominator).max(1);
        u64::try_from(base_fee + delta).unwrap_or(u64::MAX)
    } else {
        let gas_delta = u128::from(gas_target - parent.gas_used);
        let delta = base_fee * gas_delta / target / denominator;
        u64::try_from(base_fee.saturating_sub(delta)).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Chain Access
// ============================================================================

/// Read access to the canonical chain and its states.
pub trait ChainReader {
    /// State handle produced by [`ChainReader::state_at`].
    type State: StateView;

    fn config(&self) -> &ChainConfig;

    /// Header of the current chain head.
    fn current_header(&self) -> Header;

    fn header_by_hash(&self, hash: B256) -> Option<Header>;

    /// A fresh, isolated state handle at `root`.
    ///
    /// Handles never observe each other's mutations.
    fn state_at(&self, root: B256) -> Option<Self::State>;
}

#[derive(Debug)]
struct ChainInner {
    headers: HashMap<B256, Header>,
    states: HashMap<B256, MemoryState>,
    head: B256,
}

/// An in-memory chain of headers and their post states.
#[derive(Debug)]
pub struct MemoryChain {
    config: ChainConfig,
    inner: RwLock<ChainInner>,
    genesis_state: MemoryState,
}

impl MemoryChain {
    /// Creates a chain whose genesis block commits to `genesis`.
    pub fn new(config: ChainConfig, genesis: MemoryState, gas_limit: u64) -> Self {
        let header = Header {
            number: 0,
            gas_limit,
            state_root: genesis.state_root(),
            base_fee_per_gas: config.is_london(0).then_some(INITIAL_BASE_FEE),
            difficulty: U256::ZERO,
            ..Default::default()
        };
        let hash = header.hash_slow();
        let mut states = HashMap::new();
        states.insert(header.state_root, genesis.clone());

        Self {
            config,
            inner: RwLock::new(ChainInner {
                headers: HashMap::from([(hash, header)]),
                states,
                head: hash,
            }),
            genesis_state: genesis,
        }
    }

    /// Appends a block header with its post state and makes it the head.
    pub fn insert(&self, header: Header, state: MemoryState) -> B256 {
        let hash = header.hash_slow();
        let mut inner = self.inner.write();
        inner.states.insert(header.state_root, state);
        inner.headers.insert(hash, header);
        inner.head = hash;
        hash
    }

    /// Hash of the current head.
    pub fn head_hash(&self) -> B256 {
        self.inner.read().head
    }

    /// Prefetchers still running on any state handed out by this chain.
    pub fn active_prefetchers(&self) -> usize {
        self.genesis_state.active_prefetchers()
    }
}

impl ChainReader for MemoryChain {
    type State = MemoryState;

    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_header(&self) -> Header {
        let inner = self.inner.read();
        inner.headers[&inner.head].clone()
    }

    fn header_by_hash(&self, hash: B256) -> Option<Header> {
        self.inner.read().headers.get(&hash).cloned()
    }

    fn state_at(&self, root: B256) -> Option<MemoryState> {
        self.inner.read().states.get(&root).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn parent(gas_limit: u64, gas_used: u64, base_fee: u64) -> Header {
        Header {
            number: 10,
            gas_limit,
            gas_used,
            base_fee_per_gas: Some(base_fee),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_fee_up_down_and_flat() {
        let config = ChainConfig::default();

        assert_eq!(calc_base_fee(&config, &parent(16_000, 8_000, 100)), 100);
        assert_eq!(calc_base_fee(&config, &parent(16_000, 16_000, 100)), 112);
        assert_eq!(calc_base_fee(&config, &parent(16_000, 0, 100)), 88);
    }

    #[test]
    fn test_base_fee_increase_is_at_least_one() {
        let config = ChainConfig::default();
        assert_eq!(calc_base_fee(&config, &parent(16_000, 8_001, 1)), 2);
    }

    #[test]
    fn test_first_london_block_uses_initial_base_fee() {
        let config = ChainConfig { london_block: Some(11), ..Default::default() };
        assert_eq!(calc_base_fee(&config, &parent(16_000, 16_000, 7)), INITIAL_BASE_FEE);
    }

    #[test]
    fn test_rules() {
        let config = ChainConfig {
            eip155_block: Some(5),
            london_block: None,
            require_replay_protection: true,
            ..Default::default()
        };
        let early = config.rules(4, true, 0);
        assert!(!early.is_eip155);
        assert!(!early.require_replay_protection);

        let late = config.rules(5, true, 0);
        assert!(late.is_eip155);
        assert!(late.require_replay_protection);
        assert!(!late.is_london);
    }

    #[test]
    fn test_memory_chain_hands_out_isolated_states() {
        let alice = Address::with_last_byte(1);
        let mut genesis = MemoryState::new();
        genesis.insert_account(alice, U256::from(5), 0);
        let chain = MemoryChain::new(ChainConfig::default(), genesis, 30_000_000);

        let head = chain.current_header();
        assert_eq!(chain.header_by_hash(chain.head_hash()), Some(head.clone()));

        let mut first = chain.state_at(head.state_root).unwrap();
        first.increase_balance(alice, U256::from(1));
        let second = chain.state_at(head.state_root).unwrap();
        assert_eq!(second.balance(alice), U256::from(5));
        assert!(chain.state_at(B256::repeat_byte(0xee)).is_none());
    }
}
