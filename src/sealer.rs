//! Block assembly.
//!
//! A seal walks through four phases:
//!
//! - **Preparing**: resolve the parent, build the header skeleton, let the consensus engine
//!   prepare it, open the parent state and start its prefetcher.
//! - **Streaming**: pull candidates from the [`TxStream`] and apply them one by one until
//!   the stream runs dry or the gas pool cannot fit another transaction.
//! - **Finalizing**: hand header, state, transactions and receipts to the engine.
//! - **Done**: package the [`SealedBlock`].
//!
//! Preparing and Finalizing may abort with a [`SealError`]; no partial bundle is returned.
//! Transactions that fail never abort a seal, they are reported as exclusions.


use alloy_consensus::Header;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, trace};

use crate::{
    bundle::{ExcludedTransaction, SealedBlock, TraceResult},
    chain::{calc_base_fee, ChainReader},
    engine::ConsensusEngine,
    error::{SealError, TxFailure},
    executor::{Applied, ExecutedReceipt, SpeculativeExecutor, TransactionApplier},
    gas::GasPool,
    pool::{TransactionPool, TransactionsByPriceAndNonce},
    state::{PrefetchGuard, StateView},
    stream::TxStream,
    transaction::{SignedTransaction, TX_GAS},
};

/// Static settings of a [`Sealer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealerConfig {
    /// Extra data used when the caller does not provide any.
    pub extra_data: Bytes,
    /// Tag passed to the state prefetcher.
    pub prefetch_tag: String,
}

impl Default for SealerConfig {
    fn default() -> Self {
        Self { extra_data: Bytes::from_static(b"Manifold"), prefetch_tag: "sealer".to_string() }
    }
}

/// Header parameters of the block to seal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockParameters {
    /// Parent block. Zero selects the current head.
    #[serde(rename = "parent", default)]
    pub parent_hash: B256,
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub random: B256,
    #[serde(default)]
    pub extra_data: Option<Bytes>,
    #[serde(default)]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

/// Nonce and balance of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceAndBalance {
    pub address: Address,
    pub nonce: u64,
    pub balance: U256,
}

/// Accumulators of a single seal.
#[derive(Debug, Default)]
struct ExecutionContext {
    txs: Vec<Arc<SignedTransaction>>,
    receipts: Vec<ExecutedReceipt>,
    excluded: Vec<ExcludedTransaction>,
    traces: Option<Vec<TraceResult>>,
    profit: U256,
    /// Hashes already in `txs`.
    included: HashSet<B256>,
    /// Hashes already in `excluded`.
    rejected: HashSet<B256>,
}

impl ExecutionContext {
    fn new(trace: bool) -> Self {
        Self { traces: trace.then(Vec::new), ..Self::default() }
    }

    fn include(&mut self, tx: Arc<SignedTransaction>, applied: Applied, reward: U256) {
        self.profit += reward;
        if let (Some(traces), Some(trace)) = (self.traces.as_mut(), applied.trace) {
            traces.push(trace.into());
        }
        self.included.insert(tx.hash());
        self.txs.push(tx);
        self.receipts.push(applied.receipt);
    }

    fn exclude(&mut self, hash: B256, failure: &TxFailure) {
        self.rejected.insert(hash);
        self.excluded.push(ExcludedTransaction::new(hash, failure));
    }
}

/// Builds candidate blocks on top of a chain.
#[derive(Debug)]
pub struct Sealer<C, E, P, A> {
    chain: C,
    engine: E,
    pool: P,
    applier: A,
    config: SealerConfig,
}

impl<C, E, P, A> Sealer<C, E, P, A>
where
    C: ChainReader,
    E: ConsensusEngine<C>,
    P: TransactionPool,
    A: TransactionApplier<C::State>,
{
    pub fn new(chain: C, engine: E, pool: P, applier: A, config: SealerConfig) -> Self {
        Self { chain, engine, pool, applier, config }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &SealerConfig {
        &self.config
    }

    /// Seals a block on top of `params.parent_hash`.
    ///
    /// `txs` are considered first and in the given order. With `fill_with_mempool` the
    /// pending pool contents, captured once, fill the remaining space in fee order. With
    /// `trace` every included transaction gets a call trace.
    pub fn seal_block(
        &self,
        params: &BlockParameters,
        txs: Vec<SignedTransaction>,
        fill_with_mempool: bool,
        trace: bool,
    ) -> Result<SealedBlock, SealError> {
        let parent = if params.parent_hash.is_zero() {
            self.chain.current_header()
        } else {
            self.chain
                .header_by_hash(params.parent_hash)
                .ok_or(SealError::ParentNotFound(params.parent_hash))?
        };
        let parent_hash = parent.hash_slow();
        let chain_config = self.chain.config();

        let mut header = Header {
            parent_hash,
            number: parent.number + 1,
            gas_limit: params.gas_limit,
            timestamp: params.timestamp,
            beneficiary: params.coinbase,
            extra_data: params
                .extra_data
                .clone()
                .unwrap_or_else(|| self.config.extra_data.clone()),
            mix_hash: params.random,
            ..Default::default()
        };
        if chain_config.is_london(header.number) {
            header.base_fee_per_gas = Some(calc_base_fee(chain_config, &parent));
        }
        self.engine.prepare(&self.chain, &mut header).map_err(SealError::Prepare)?;

        let state = self
            .chain
            .state_at(parent.state_root)
            .ok_or(SealError::StateNotFound { block: parent_hash, root: parent.state_root })?;
        let mut state = PrefetchGuard::start(state, &self.config.prefetch_tag);

        let mut gas_pool = GasPool::new();
        gas_pool.add_gas(header.gas_limit);

        let fallback = fill_with_mempool.then(|| {
            let pending = self.pool.pending();
            (&self.pool, TransactionsByPriceAndNonce::new(pending, header.base_fee_per_gas))
        });
        let mut stream = TxStream::new(txs, fallback);

        let rules =
            chain_config.rules(header.number, header.difficulty.is_zero(), header.timestamp);
        let executor = SpeculativeExecutor::new(&self.applier, rules, header.beneficiary);
        let mut run = ExecutionContext::new(trace);

        debug!(
            target: "sealer",
            number = header.number,
            %parent_hash,
            gas_limit = header.gas_limit,
            base_fee = ?header.base_fee_per_gas,
            fill_with_mempool,
            "sealing block"
        );

        while let Some(candidate) = stream.peek() {
            if !gas_pool.covers(TX_GAS) {
                debug!(target: "sealer", gas_left = gas_pool.gas(), "block full");
                break;
            }

            let tx = candidate.tx;
            // A hash is settled once. A repeat of an included transaction lets the sender's
            // next nonce through, a repeat of an excluded one drops it like the original did.
            if run.included.contains(&tx.hash()) {
                trace!(target: "sealer", tx_hash = ?tx.hash(), "already included");
                stream.advance();
                continue;
            }
            if run.rejected.contains(&tx.hash()) {
                trace!(target: "sealer", tx_hash = ?tx.hash(), "already excluded");
                stream.skip();
                continue;
            }

            let index = run.receipts.len();
            match executor.apply(&mut *state, &mut header, &tx, &mut gas_pool, index, trace) {
                Ok(applied) => {
                    let tip = tx.effective_tip_per_gas(header.base_fee_per_gas).unwrap_or_default();
                    let reward = U256::from(applied.receipt.gas_used) * U256::from(tip);
                    debug!(
                        target: "sealer",
                        tx_hash = ?tx.hash(),
                        origin = ?candidate.origin,
                        gas_used = applied.receipt.gas_used,
                        status = applied.receipt.status,
                        "included transaction"
                    );
                    run.include(tx, applied, reward);
                    stream.advance();
                }
                Err(failure) => {
                    debug!(
                        target: "sealer",
                        tx_hash = ?tx.hash(),
                        origin = ?candidate.origin,
                        %failure,
                        "excluded transaction"
                    );
                    run.exclude(tx.hash(), &failure);
                    stream.skip();
                }
            }
        }

        let block = self
            .engine
            .finalize_and_assemble(
                &self.chain,
                header,
                &mut *state,
                &run.txs,
                &[],
                &run.receipts,
                params.withdrawals.as_deref(),
            )
            .map_err(SealError::Assemble)?;

        info!(
            target: "sealer",
            number = block.header.number,
            hash = %block.hash(),
            included = run.txs.len(),
            excluded = run.excluded.len(),
            gas_used = block.header.gas_used,
            profit = %run.profit,
            "sealed block"
        );

        Ok(SealedBlock::new(&block, run.receipts, run.excluded, run.traces, run.profit))
    }

    /// Reads nonce and balance of `accounts` in the state of block `block_hash`.
    ///
    /// The result has one entry per requested address, in request order.
    pub fn get_bulk_account_nonces_and_balances(
        &self,
        accounts: &[Address],
        block_hash: B256,
    ) -> Result<Vec<NonceAndBalance>, SealError> {
        let header =
            self.chain.header_by_hash(block_hash).ok_or(SealError::BlockNotFound(block_hash))?;
        let state = self
            .chain
            .state_at(header.state_root)
            .ok_or(SealError::StateNotFound { block: block_hash, root: header.state_root })?;
        let state = PrefetchGuard::start(state, &self.config.prefetch_tag);

        Ok(accounts
            .iter()
            .map(|&address| NonceAndBalance {
                address,
                nonce: state.nonce(address),
                balance: state.balance(address),
            })
            .collect())
    }
}
