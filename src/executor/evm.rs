//! revm backed transaction applier.

use alloy_consensus::Header;
use alloy_primitives::{Bloom, B256, U256};
use revm::{
    context::{BlockEnv, CfgEnv, TxEnv},
    context_interface::transaction::AccessList,
    primitives::TxKind,
    state::EvmState,
    Context, DatabaseCommit, ExecuteEvm, InspectEvm, MainBuilder, MainContext,
};
use tracing::trace;

use super::{ExecutedReceipt, TransactionApplier, TxContext};
use crate::{
    error::TxFailure,
    gas::GasPool,
    state::{MemoryState, StorageCheckSet},
    tracer::CallTracer,
    transaction::{SignedTransaction, StorageCheckList, TxFees},
};

/// Executes transactions with the mainnet EVM and commits the result into a
/// [`MemoryState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RevmApplier;

impl RevmApplier {
    pub fn new() -> Self {
        Self
    }
}

impl TransactionApplier<MemoryState> for RevmApplier {
    fn apply_transaction(
        &self,
        ctx: &TxContext<'_>,
        state: &mut MemoryState,
        header: &mut Header,
        tx: &SignedTransaction,
        gas_pool: &mut GasPool,
        tracer: Option<&mut CallTracer>,
    ) -> Result<ExecutedReceipt, TxFailure> {
        let gas_limit = tx.gas_limit();
        gas_pool.sub_gas(gas_limit)?;

        let db = state.db_mut();
        let context = Context::mainnet()
            .with_block(block_env(ctx, header))
            .with_cfg(cfg_env(ctx))
            .with_db(&mut *db);
        let tx_env = tx_env(ctx, tx);

        let outcome = match tracer {
            Some(tracer) => {
                let mut evm = context.build_mainnet_with_inspector(std::mem::take(tracer));
                let outcome = evm.inspect_tx(tx_env);
                *tracer = std::mem::take(&mut evm.inspector);
                outcome
            }
            None => context.build_mainnet().transact(tx_env),
        };
        let outcome = outcome.map_err(TxFailure::execution)?;

        let result = outcome.result;
        let gas_used = result.gas_used();
        gas_pool.add_gas(gas_limit.saturating_sub(gas_used));
        header.gas_used += gas_used;

        let storage_checks = storage_checks(ctx, &outcome.state);
        db.commit(outcome.state);

        let status = result.is_success();
        let logs = result.into_logs();
        let mut logs_bloom = Bloom::ZERO;
        for log in &logs {
            logs_bloom.accrue_log(log);
        }
        let contract_address = match tx.kind() {
            TxKind::Create => Some(ctx.sender.create(tx.nonce())),
            TxKind::Call(_) => None,
        };

        trace!(target: "sealer", tx_hash = ?ctx.tx_hash, status, gas_used, "applied transaction");

        Ok(ExecutedReceipt {
            tx_hash: ctx.tx_hash,
            tx_type: tx.tx_type(),
            index: ctx.index,
            status,
            gas_used,
            cumulative_gas_used: header.gas_used,
            logs: (!logs.is_empty()).then_some(logs),
            logs_bloom,
            contract_address,
            storage_checks,
        })
    }
}

fn block_env(ctx: &TxContext<'_>, header: &Header) -> BlockEnv {
    BlockEnv {
        number: U256::from(header.number),
        beneficiary: header.beneficiary,
        timestamp: U256::from(header.timestamp),
        gas_limit: header.gas_limit,
        basefee: header.base_fee_per_gas.unwrap_or_default(),
        difficulty: header.difficulty,
        prevrandao: ctx.rules.is_merge.then_some(header.mix_hash),
        ..Default::default()
    }
}

fn cfg_env(ctx: &TxContext<'_>) -> CfgEnv {
    let mut cfg = CfgEnv::new_with_spec(ctx.rules.spec_id);
    cfg.chain_id = ctx.rules.chain_id;
    cfg
}

fn tx_env(ctx: &TxContext<'_>, tx: &SignedTransaction) -> TxEnv {
    let fees = tx.fees();
    TxEnv {
        tx_type: u8::from(tx.tx_type()),
        caller: ctx.sender,
        gas_limit: tx.gas_limit(),
        gas_price: fees.fee_cap(),
        gas_priority_fee: matches!(fees, TxFees::Dynamic { .. }).then(|| fees.tip_cap()),
        kind: tx.kind(),
        value: tx.value(),
        data: tx.input().clone(),
        nonce: tx.nonce(),
        chain_id: tx.chain_id(),
        access_list: AccessList(ctx.access_list.to_vec()),
        ..Default::default()
    }
}

/// Derives the storage check list from the execution state diff.
///
/// Sender, recipient, beneficiary and precompiles are implied by the transaction and never
/// listed as bare addresses. Slot values are the ones seen before the transaction ran.
fn storage_checks(ctx: &TxContext<'_>, diff: &EvmState) -> StorageCheckList {
    let excluded = [ctx.sender, ctx.coinbase]
        .into_iter()
        .chain(ctx.to)
        .chain(ctx.precompiles.iter().copied());
    let mut set = StorageCheckSet::with_excluded(excluded);
    for (address, account) in diff {
        set.add_address(*address);
        for (slot, value) in &account.storage {
            set.add_slot_and_value(
                *address,
                B256::from(slot.to_be_bytes::<32>()),
                B256::from(value.original_value().to_be_bytes::<32>()),
            );
        }
    }
    set.to_list()
}
