//! Speculative transaction execution.
//!
//! [`TransactionApplier`] is the seam to the virtual machine: it applies one transaction to
//! a state view and reports a receipt. [`SpeculativeExecutor`] wraps it with the checks
//! that come before execution and with the snapshot discipline that makes every attempt
//! all-or-nothing.

mod evm;

pub use evm::RevmApplier;

use alloy_consensus::{Header, TxType};
use alloy_eips::eip2930::AccessListItem;
use alloy_primitives::{Address, Bloom, Log, B256, U256};
use revm::{
    precompile::{PrecompileSpecId, Precompiles},
    primitives::hardfork::SpecId,
};
use serde_json::Value;
use tracing::warn;

use crate::{
    chain::Rules,
    error::{TraceError, TxFailure},
    gas::GasPool,
    state::StateView,
    tracer::CallTracer,
    transaction::{ChainSigner, SignedTransaction, StorageCheckList},
};

/// Per-transaction environment prepared before execution.
#[derive(Debug, Clone, Copy)]
pub struct TxContext<'a> {
    pub sender: Address,
    pub coinbase: Address,
    /// Call target, `None` for contract creation.
    pub to: Option<Address>,
    /// Precompiles active under `rules`.
    pub precompiles: &'a [Address],
    pub access_list: &'a [AccessListItem],
    pub tx_hash: B256,
    /// Position in the block.
    pub index: usize,
    pub rules: Rules,
}

/// Outcome of a transaction that was applied to the state.
///
/// A reverted transaction is still applied: it consumed gas and bumped the sender nonce,
/// so it carries `status == false` rather than being a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedReceipt {
    pub tx_hash: B256,
    pub tx_type: TxType,
    pub index: usize,
    pub status: bool,
    pub gas_used: u64,
    /// Header gas used after this transaction.
    pub cumulative_gas_used: u64,
    /// `None` when the transaction emitted no logs.
    pub logs: Option<Vec<Log>>,
    pub logs_bloom: Bloom,
    pub contract_address: Option<Address>,
    /// Accounts, slots and pre-transaction slot values the execution touched.
    pub storage_checks: StorageCheckList,
}

/// Applies a single transaction to a state view.
pub trait TransactionApplier<S: StateView> {
    /// Executes `tx` against `state`.
    ///
    /// Implementations reserve the transaction gas limit from `gas_pool`, return the unused
    /// part afterwards and add the used gas to `header.gas_used`. On error the caller
    /// restores state, pool and header, so implementations need not undo partial work.
    fn apply_transaction(
        &self,
        ctx: &TxContext<'_>,
        state: &mut S,
        header: &mut Header,
        tx: &SignedTransaction,
        gas_pool: &mut GasPool,
        tracer: Option<&mut CallTracer>,
    ) -> Result<ExecutedReceipt, TxFailure>;
}

/// Addresses of the precompiled contracts active under `spec`.
pub fn active_precompiles(spec: SpecId) -> Vec<Address> {
    Precompiles::new(PrecompileSpecId::from_spec_id(spec)).addresses().copied().collect()
}

/// A transaction that made it into the block.
#[derive(Debug, Clone)]
pub struct Applied {
    pub sender: Address,
    pub receipt: ExecutedReceipt,
    /// Present only when tracing was requested.
    pub trace: Option<Result<Value, TraceError>>,
}

/// Runs candidates through sender recovery, replay protection and storage checks, then
/// applies them inside a snapshot.
#[derive(Debug)]
pub struct SpeculativeExecutor<'a, A> {
    applier: &'a A,
    signer: ChainSigner,
    rules: Rules,
    coinbase: Address,
    precompiles: Vec<Address>,
}

impl<'a, A> SpeculativeExecutor<'a, A> {
    pub fn new(applier: &'a A, rules: Rules, coinbase: Address) -> Self {
        Self {
            applier,
            signer: ChainSigner::new(rules.chain_id),
            rules,
            coinbase,
            precompiles: active_precompiles(rules.spec_id),
        }
    }

    /// Applies `tx` as the `index`-th transaction of the block.
    ///
    /// Either the transaction is fully applied, or state, gas pool and header are left
    /// exactly as they were.
    pub fn apply<S>(
        &self,
        state: &mut S,
        header: &mut Header,
        tx: &SignedTransaction,
        gas_pool: &mut GasPool,
        index: usize,
        trace: bool,
    ) -> Result<Applied, TxFailure>
    where
        S: StateView,
        A: TransactionApplier<S>,
    {
        let sender = self.signer.sender(tx)?;
        if tx.is_protected() && !self.rules.is_eip155 {
            return Err(TxFailure::ReplayProtectedBeforeFork { hash: tx.hash() });
        }
        if !tx.is_protected() && self.rules.require_replay_protection {
            return Err(TxFailure::ReplayProtectionRequired { hash: tx.hash() });
        }

        let ctx = TxContext {
            sender,
            coinbase: self.coinbase,
            to: tx.to(),
            precompiles: &self.precompiles,
            access_list: tx.access_list(),
            tx_hash: tx.hash(),
            index,
            rules: self.rules,
        };
        let mut tracer = trace.then(CallTracer::new);

        let snapshot = state.snapshot();
        let saved_pool = *gas_pool;
        let saved_gas_used = header.gas_used;
        let result = verify_storage_checks(state, tx).and_then(|()| {
            self.applier.apply_transaction(&ctx, state, header, tx, gas_pool, tracer.as_mut())
        });
        let receipt = match result {
            Ok(receipt) => {
                state.discard_snapshot(snapshot);
                receipt
            }
            Err(err) => {
                state.revert_to_snapshot(snapshot);
                *gas_pool = saved_pool;
                header.gas_used = saved_gas_used;
                return Err(err);
            }
        };

        let trace = tracer.map(|mut tracer| {
            tracer.finish(tx.gas_limit(), receipt.gas_used);
            let result = tracer.result();
            if let Err(err) = &result {
                warn!(target: "sealer", tx_hash = ?tx.hash(), %err, "could not retrieve trace");
            }
            result
        });

        Ok(Applied { sender, receipt, trace })
    }
}

/// Checks every slot declared by the transaction's storage check list.
fn verify_storage_checks<S: StateView>(
    state: &S,
    tx: &SignedTransaction,
) -> Result<(), TxFailure> {
    for tuple in tx.storage_checks().iter() {
        for check in &tuple.storage_key_value_checks {
            let found = state.storage(tuple.address, U256::from_be_bytes(check.index.0));
            if found != U256::from_be_bytes(check.value.0) {
                return Err(TxFailure::StorageCheck {
                    address: tuple.address,
                    slot: check.index,
                    expected: check.value,
                    found,
                });
            }
        }
    }
    Ok(())
}
