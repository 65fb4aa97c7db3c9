//! Deterministic accounts and transfer workloads.
//!
//! Used by the demo binary, the benchmarks and the tests to set up a funded genesis state,
//! a caller priority list and a pool of pending transfers.

use alloy_primitives::{keccak256, Address, U256};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;

use crate::{
    error::RecoveryError,
    pool::MemoryPool,
    state::MemoryState,
    transaction::{ChainSigner, SignedTransaction, TxFees, UnsignedTransaction},
};

/// 1000 ETH.
pub const INITIAL_BALANCE: u128 = 1_000_000_000_000_000_000_000;
/// 0.001 ETH.
pub const TRANSFER_VALUE: u64 = 1_000_000_000_000_000;

// ============================================================================
// Account & Key Management
// ============================================================================

/// An account with its signing key.
#[derive(Clone)]
pub struct Account {
    pub signing_key: SigningKey,
    /// Address derived from the public key.
    pub address: Address,
}

impl Account {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes.into()).expect("valid key bytes");
        Self::from_signing_key(signing_key)
    }

    /// Signs a transfer of `value` to `to`.
    pub fn transfer(
        &self,
        chain_id: u64,
        nonce: u64,
        to: Address,
        value: U256,
        fees: TxFees,
    ) -> SignedTransaction {
        let mut unsigned =
            UnsignedTransaction::transfer(chain_id, nonce, to, value, fees.fee_cap());
        unsigned.fees = fees;
        unsigned.sign(&self.signing_key)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("address", &self.address).finish()
    }
}

/// Derives an address from a secp256k1 public key.
pub fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Funded accounts in the genesis state.
    pub num_accounts: usize,
    /// Transactions in the caller priority list.
    pub num_priority: usize,
    /// Transactions placed in the pool.
    pub num_pool: usize,
    /// 0.0 = senders spread over all accounts, 1.0 = all traffic between two accounts.
    pub conflict_factor: f64,
    pub seed: u64,
    pub chain_id: u64,
    /// Fee caps are drawn uniformly from this range (wei per gas).
    pub min_gas_price: u128,
    pub max_gas_price: u128,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 100,
            num_priority: 10,
            num_pool: 50,
            conflict_factor: 0.0,
            seed: 42,
            chain_id: 1,
            min_gas_price: 2_000_000_000,
            max_gas_price: 50_000_000_000,
        }
    }
}

/// Pre-signed transfers over a set of funded accounts.
#[derive(Debug, Clone)]
pub struct Workload {
    pub accounts: Vec<Account>,
    /// Explicit transactions, in the order they should be considered.
    pub priority: Vec<SignedTransaction>,
    /// Transactions meant for the pool.
    pub pool: Vec<SignedTransaction>,
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a workload. All transactions are signed up front and every sender's
    /// nonces are consecutive across the priority list and the pool.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let accounts: Vec<Account> = (0..config.num_accounts)
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();

        let mut nonces: HashMap<usize, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            let spread = (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0);
            (2.0 + spread).max(2.0) as usize
        } else {
            config.num_accounts
        };

        let mut next = |rng: &mut StdRng| {
            let range = if rng.gen::<f64>() < config.conflict_factor {
                hot_account_count
            } else {
                config.num_accounts
            };
            let from = rng.gen_range(0..range);
            let mut to = rng.gen_range(0..range);
            while to == from {
                to = rng.gen_range(0..range);
            }

            let nonce = nonces.entry(from).or_insert(0);
            let max_fee_per_gas = rng.gen_range(config.min_gas_price..=config.max_gas_price);
            let fees = if rng.gen_bool(0.5) {
                TxFees::Legacy { gas_price: max_fee_per_gas }
            } else {
                let max_priority_fee_per_gas = rng.gen_range(1..=max_fee_per_gas);
                TxFees::Dynamic { max_fee_per_gas, max_priority_fee_per_gas }
            };
            let tx = accounts[from].transfer(
                config.chain_id,
                *nonce,
                accounts[to].address,
                U256::from(TRANSFER_VALUE),
                fees,
            );
            *nonce += 1;
            tx
        };

        let priority = (0..config.num_priority).map(|_| next(&mut rng)).collect();
        let pool = (0..config.num_pool).map(|_| next(&mut rng)).collect();

        Self { accounts, priority, pool, config }
    }

    /// A state in which every workload account holds [`INITIAL_BALANCE`].
    pub fn genesis(&self) -> MemoryState {
        let mut state = MemoryState::new();
        for account in &self.accounts {
            state.insert_account(account.address, U256::from(INITIAL_BALANCE), 0);
        }
        state
    }

    /// A pool holding the workload's pool transactions.
    pub fn memory_pool(&self) -> Result<MemoryPool, RecoveryError> {
        let pool = MemoryPool::new(ChainSigner::new(self.config.chain_id));
        for tx in &self.pool {
            pool.add(tx.clone())?;
        }
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateView;

    #[test]
    fn test_account_generation() {
        let acc1 = Account::from_seed(1);
        let acc2 = Account::from_seed(2);

        // Different seeds produce different accounts.
        assert_ne!(acc1.address, acc2.address);

        // Same seed produces same account.
        assert_eq!(acc1.address, Account::from_seed(1).address);
    }

    #[test]
    fn test_workload_generation() {
        let config = WorkloadConfig {
            num_accounts: 10,
            num_priority: 5,
            num_pool: 20,
            seed: 123,
            ..Default::default()
        };
        let workload = Workload::generate(config);

        assert_eq!(workload.accounts.len(), 10);
        assert_eq!(workload.priority.len(), 5);
        assert_eq!(workload.pool.len(), 20);

        let signer = ChainSigner::new(1);
        for tx in workload.priority.iter().chain(&workload.pool) {
            assert!(signer.sender(tx).is_ok(), "transaction signature should be valid");
        }

        let genesis = workload.genesis();
        assert_eq!(genesis.balance(workload.accounts[3].address), U256::from(INITIAL_BALANCE));
        assert_eq!(workload.memory_pool().unwrap().len(), 20);
    }

    #[test]
    fn test_nonces_are_consecutive_per_sender() {
        let config = WorkloadConfig { num_accounts: 4, conflict_factor: 1.0, ..Default::default() };
        let workload = Workload::generate(config);
        let signer = ChainSigner::new(1);

        let mut expected: HashMap<Address, u64> = HashMap::new();
        for tx in workload.priority.iter().chain(&workload.pool) {
            let nonce = expected.entry(signer.sender(tx).unwrap()).or_insert(0);
            assert_eq!(tx.nonce(), *nonce);
            *nonce += 1;
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = Workload::generate(WorkloadConfig::default());
        let b = Workload::generate(WorkloadConfig::default());
        let hashes =
            |w: &Workload| w.priority.iter().chain(&w.pool).map(|tx| tx.hash()).collect::<Vec<_>>();
        assert_eq!(hashes(&a), hashes(&b));
    }
}
