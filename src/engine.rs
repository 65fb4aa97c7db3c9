//! Consensus engine seam: header preparation and final block assembly.

use alloy_consensus::{
    proofs::{calculate_receipt_root, calculate_transaction_root, calculate_withdrawals_root},
    BlockBody, Eip658Value, Header, ReceiptEnvelope, ReceiptWithBloom, TxEnvelope, TxType,
    EMPTY_OMMER_ROOT_HASH,
};
use alloy_eips::eip4895::{Withdrawal, Withdrawals};
use alloy_primitives::{Bloom, B256, U256};
use std::sync::Arc;

use crate::{
    chain::ChainReader,
    error::EngineError,
    executor::ExecutedReceipt,
    state::StateView,
    transaction::SignedTransaction,
};

/// Longest extra data a header may carry.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// A fully assembled block.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Arc<SignedTransaction>>,
    pub uncles: Vec<Header>,
    pub withdrawals: Option<Withdrawals>,
}

impl Block {
    pub fn hash(&self) -> B256 {
        self.header.hash_slow()
    }

    /// The block in its consensus encoding form.
    pub fn to_consensus(&self) -> alloy_consensus::Block<TxEnvelope> {
        alloy_consensus::Block::new(
            self.header.clone(),
            BlockBody {
                transactions: self.transactions.iter().map(|tx| tx.envelope().clone()).collect(),
                ommers: self.uncles.clone(),
                withdrawals: self.withdrawals.clone(),
            },
        )
    }
}

/// Consensus specific steps of block production.
pub trait ConsensusEngine<C: ChainReader> {
    /// Fills in the consensus fields of a header skeleton.
    fn prepare(&self, chain: &C, header: &mut Header) -> Result<(), EngineError>;

    /// Applies end of block state changes and assembles the final block.
    #[allow(clippy::too_many_arguments)]
    fn finalize_and_assemble(
        &self,
        chain: &C,
        header: Header,
        state: &mut C::State,
        txs: &[Arc<SignedTransaction>],
        uncles: &[Header],
        receipts: &[ExecutedReceipt],
        withdrawals: Option<&[Withdrawal]>,
    ) -> Result<Block, EngineError>;
}

/// Post-merge engine without block rewards.
///
/// Withdrawals are the only end of block state change.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevEngine;

impl DevEngine {
    pub fn new() -> Self {
        Self
    }
}

impl<C: ChainReader> ConsensusEngine<C> for DevEngine {
    fn prepare(&self, chain: &C, header: &mut Header) -> Result<(), EngineError> {
        let parent = chain.header_by_hash(header.parent_hash).ok_or_else(|| {
            EngineError::InvalidHeader(format!("unknown ancestor {}", header.parent_hash))
        })?;
        if header.timestamp <= parent.timestamp {
            return Err(EngineError::InvalidHeader(format!(
                "timestamp {} not after parent timestamp {}",
                header.timestamp, parent.timestamp
            )));
        }
        if header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(EngineError::InvalidHeader(format!(
                "extra data too long: {} > {}",
                header.extra_data.len(),
                MAXIMUM_EXTRA_DATA_SIZE
            )));
        }
        header.difficulty = U256::ZERO;
        header.ommers_hash = EMPTY_OMMER_ROOT_HASH;
        Ok(())
    }

    fn finalize_and_assemble(
        &self,
        chain: &C,
        mut header: Header,
        state: &mut C::State,
        txs: &[Arc<SignedTransaction>],
        uncles: &[Header],
        receipts: &[ExecutedReceipt],
        withdrawals: Option<&[Withdrawal]>,
    ) -> Result<Block, EngineError> {
        if !uncles.is_empty() {
            return Err(EngineError::Other("uncles not allowed".to_string()));
        }
        let shanghai = chain.config().is_shanghai(header.timestamp);
        let withdrawals = match (shanghai, withdrawals) {
            (true, withdrawals) => Some(Withdrawals::new(withdrawals.unwrap_or_default().to_vec())),
            (false, None) => None,
            (false, Some(_)) => {
                return Err(EngineError::Other(
                    "withdrawals set before Shanghai activation".to_string(),
                ))
            }
        };

        for withdrawal in withdrawals.iter().flatten() {
            state.increase_balance(withdrawal.address, withdrawal.amount_wei());
        }

        let envelopes: Vec<TxEnvelope> = txs.iter().map(|tx| tx.envelope().clone()).collect();
        let receipt_envelopes: Vec<ReceiptEnvelope> =
            receipts.iter().map(receipt_envelope).collect();

        header.state_root = state.state_root();
        header.transactions_root = calculate_transaction_root(&envelopes);
        header.receipts_root = calculate_receipt_root(&receipt_envelopes);
        header.withdrawals_root = withdrawals.as_ref().map(|w| calculate_withdrawals_root(w));
        header.logs_bloom = receipts.iter().fold(Bloom::ZERO, |mut bloom, receipt| {
            bloom.accrue_bloom(&receipt.logs_bloom);
            bloom
        });

        Ok(Block { header, transactions: txs.to_vec(), uncles: Vec::new(), withdrawals })
    }
}

/// The consensus receipt committed to by the receipts root.
fn receipt_envelope(receipt: &ExecutedReceipt) -> ReceiptEnvelope {
    let inner = ReceiptWithBloom {
        receipt: alloy_consensus::Receipt {
            status: Eip658Value::Eip658(receipt.status),
            cumulative_gas_used: receipt.cumulative_gas_used,
            logs: receipt.logs.clone().unwrap_or_default(),
        },
        logs_bloom: receipt.logs_bloom,
    };
    match receipt.tx_type {
        TxType::Eip2930 => ReceiptEnvelope::Eip2930(inner),
        TxType::Eip1559 => ReceiptEnvelope::Eip1559(inner),
        TxType::Eip4844 => ReceiptEnvelope::Eip4844(inner),
        TxType::Eip7702 => ReceiptEnvelope::Eip7702(inner),
        TxType::Legacy => ReceiptEnvelope::Legacy(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{ChainConfig, MemoryChain},
        state::MemoryState,
        transaction::{UnsignedTransaction, TX_GAS},
        workload::Account,
    };
    use alloy_consensus::EMPTY_ROOT_HASH;
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::{keccak256, Address, Bytes};

    fn chain(config: ChainConfig) -> MemoryChain {
        MemoryChain::new(config, MemoryState::new(), 30_000_000)
    }

    fn child_of(chain: &MemoryChain) -> Header {
        let parent = chain.current_header();
        Header {
            parent_hash: chain.head_hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 12,
            gas_limit: parent.gas_limit,
            difficulty: U256::from(1),
            ..Default::default()
        }
    }

    fn receipt(tx: &SignedTransaction, status: bool) -> ExecutedReceipt {
        ExecutedReceipt {
            tx_hash: tx.hash(),
            tx_type: tx.tx_type(),
            index: 0,
            status,
            gas_used: TX_GAS,
            cumulative_gas_used: TX_GAS,
            logs: None,
            logs_bloom: Bloom::ZERO,
            contract_address: None,
            storage_checks: Default::default(),
        }
    }

    #[test]
    fn test_prepare_clears_difficulty() {
        let chain = chain(ChainConfig::default());
        let mut header = child_of(&chain);
        DevEngine::new().prepare(&chain, &mut header).unwrap();
        assert_eq!(header.difficulty, U256::ZERO);
        assert_eq!(header.ommers_hash, EMPTY_OMMER_ROOT_HASH);
    }

    #[test]
    fn test_prepare_rejects_bad_headers() {
        let chain = chain(ChainConfig::default());
        let engine = DevEngine::new();

        let mut orphan = child_of(&chain);
        orphan.parent_hash = B256::repeat_byte(0xab);
        assert!(matches!(engine.prepare(&chain, &mut orphan), Err(EngineError::InvalidHeader(_))));

        let mut verbose = child_of(&chain);
        verbose.extra_data = Bytes::from(vec![0u8; MAXIMUM_EXTRA_DATA_SIZE + 1]);
        assert!(matches!(engine.prepare(&chain, &mut verbose), Err(EngineError::InvalidHeader(_))));
    }

    #[test]
    fn test_empty_block_roots() {
        let chain = chain(ChainConfig::default());
        let mut state = chain.state_at(chain.current_header().state_root).unwrap();

        let block = DevEngine::new()
            .finalize_and_assemble(&chain, child_of(&chain), &mut state, &[], &[], &[], None)
            .unwrap();

        assert_eq!(block.header.transactions_root, EMPTY_ROOT_HASH);
        assert_eq!(block.header.receipts_root, EMPTY_ROOT_HASH);
        assert_eq!(block.header.withdrawals_root, Some(EMPTY_ROOT_HASH));
        assert_eq!(block.header.logs_bloom, Bloom::ZERO);
    }

    #[test]
    fn test_roots_commit_to_transactions_and_receipts() {
        let chain = chain(ChainConfig::default());
        let mut state = chain.state_at(chain.current_header().state_root).unwrap();
        let account = Account::from_seed(1);
        let tx = Arc::new(
            UnsignedTransaction::transfer(1, 0, Address::ZERO, U256::from(1), 1)
                .sign(&account.signing_key),
        );
        let txs = [tx.clone()];
        let engine = DevEngine::new();

        let succeeded = engine
            .finalize_and_assemble(
                &chain,
                child_of(&chain),
                &mut state,
                &txs,
                &[],
                &[receipt(&tx, true)],
                None,
            )
            .unwrap();
        let reverted = engine
            .finalize_and_assemble(
                &chain,
                child_of(&chain),
                &mut state,
                &txs,
                &[],
                &[receipt(&tx, false)],
                None,
            )
            .unwrap();

        assert_eq!(
            succeeded.header.transactions_root,
            calculate_transaction_root(&[tx.envelope().clone()])
        );
        assert_ne!(succeeded.header.transactions_root, EMPTY_ROOT_HASH);
        assert_ne!(succeeded.header.receipts_root, EMPTY_ROOT_HASH);
        assert_ne!(succeeded.header.receipts_root, reverted.header.receipts_root);

        let consensus = succeeded.to_consensus();
        assert_eq!(consensus.body.transactions.len(), 1);
        assert_eq!(keccak256(consensus.body.transactions[0].encoded_2718()), tx.hash());
        assert_eq!(consensus.header.hash_slow(), succeeded.hash());
    }

    #[test]
    fn test_withdrawals_are_credited_in_wei() {
        let chain = chain(ChainConfig::default());
        let mut state = chain.state_at(chain.current_header().state_root).unwrap();
        let recipient = Address::with_last_byte(0x77);
        let withdrawals =
            [Withdrawal { index: 0, validator_index: 1, address: recipient, amount: 3 }];

        let block = DevEngine::new()
            .finalize_and_assemble(
                &chain,
                child_of(&chain),
                &mut state,
                &[],
                &[],
                &[],
                Some(&withdrawals),
            )
            .unwrap();

        assert_eq!(state.balance(recipient), U256::from(3_000_000_000u64));
        assert_eq!(block.header.state_root, state.state_root());
        assert_eq!(block.header.transactions_root, EMPTY_ROOT_HASH);
        assert_eq!(block.header.withdrawals_root, Some(calculate_withdrawals_root(&withdrawals)));
        assert_ne!(block.header.withdrawals_root, Some(EMPTY_ROOT_HASH));
        assert_eq!(block.withdrawals.as_ref().map(|w| w.as_slice()), Some(&withdrawals[..]));
    }

    #[test]
    fn test_withdrawals_before_shanghai_fail() {
        let chain = chain(ChainConfig { shanghai_time: None, ..Default::default() });
        let mut state = chain.state_at(chain.current_header().state_root).unwrap();
        let engine = DevEngine::new();

        let block = engine
            .finalize_and_assemble(&chain, child_of(&chain), &mut state, &[], &[], &[], None)
            .unwrap();
        assert!(block.header.withdrawals_root.is_none());

        let err = engine
            .finalize_and_assemble(&chain, child_of(&chain), &mut state, &[], &[], &[], Some(&[]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Other(_)));
    }
}
