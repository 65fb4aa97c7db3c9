//! The result bundle handed back to the caller of a seal.

use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, Bloom, Log, B256, U256, U64};
use alloy_rpc_types_engine::{
    ExecutionPayloadEnvelopeV2, ExecutionPayloadFieldV2, ExecutionPayloadV1, ExecutionPayloadV2,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    engine::Block,
    error::{TraceError, TxFailure},
    executor::ExecutedReceipt,
    transaction::StorageCheckList,
};

/// A transaction that was considered but left out, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedTransaction {
    pub hash: B256,
    pub reason: String,
}

impl ExcludedTransaction {
    pub fn new(hash: B256, failure: &TxFailure) -> Self {
        Self { hash, reason: failure.to_string() }
    }
}

/// Receipt of an included transaction as it appears in the bundle.
///
/// Unlike [`ExecutedReceipt`], `logs` is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(rename = "type")]
    pub tx_type: U64,
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub status: U64,
    pub gas_used: U64,
    pub cumulative_gas_used: U64,
    pub logs: Vec<Log>,
    pub logs_bloom: Bloom,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(skip_serializing_if = "StorageCheckList::is_empty", default)]
    pub storage_checks: StorageCheckList,
}

impl Receipt {
    fn from_executed(receipt: ExecutedReceipt, block_hash: B256, block_number: u64) -> Self {
        Self {
            tx_type: U64::from(u8::from(receipt.tx_type)),
            transaction_hash: receipt.tx_hash,
            transaction_index: U64::from(receipt.index),
            block_hash,
            block_number: U64::from(block_number),
            status: U64::from(u8::from(receipt.status)),
            gas_used: U64::from(receipt.gas_used),
            cumulative_gas_used: U64::from(receipt.cumulative_gas_used),
            logs: receipt.logs.unwrap_or_default(),
            logs_bloom: receipt.logs_bloom,
            contract_address: receipt.contract_address,
            storage_checks: receipt.storage_checks,
        }
    }
}

/// Trace slot of one included transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TraceResult {
    Trace(Value),
    Error { error: String },
}

impl From<Result<Value, TraceError>> for TraceResult {
    fn from(result: Result<Value, TraceError>) -> Self {
        match result {
            Ok(trace) => TraceResult::Trace(trace),
            Err(err) => TraceResult::Error { error: err.to_string() },
        }
    }
}

/// Engine API payload of a finalized block.
///
/// Blocks carrying withdrawals produce a V2 payload, all others a V1 payload.
pub fn execution_payload(block: &Block) -> ExecutionPayloadFieldV2 {
    let payload_inner =
        ExecutionPayloadV1::from_block_unchecked(block.hash(), &block.to_consensus());
    match &block.withdrawals {
        Some(withdrawals) => ExecutionPayloadFieldV2::V2(ExecutionPayloadV2 {
            payload_inner,
            withdrawals: withdrawals.to_vec(),
        }),
        None => ExecutionPayloadFieldV2::V1(payload_inner),
    }
}

/// Everything produced by one seal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SealedBlock {
    #[serde(rename = "executableData")]
    pub executable_data: ExecutionPayloadEnvelopeV2,
    #[serde(rename = "excludedTxns")]
    pub excluded_txns: Vec<ExcludedTransaction>,
    pub receipts: Vec<Receipt>,
    /// One entry per receipt, present only when tracing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<TraceResult>>,
    pub profit: U256,
}

impl SealedBlock {
    /// Packages a finalized block with the outcome of its assembly.
    pub fn new(
        block: &Block,
        receipts: Vec<ExecutedReceipt>,
        excluded_txns: Vec<ExcludedTransaction>,
        traces: Option<Vec<TraceResult>>,
        profit: U256,
    ) -> Self {
        let block_hash = block.hash();
        let receipts = receipts
            .into_iter()
            .map(|receipt| Receipt::from_executed(receipt, block_hash, block.header.number))
            .collect();
        Self {
            executable_data: ExecutionPayloadEnvelopeV2 {
                execution_payload: execution_payload(block),
                block_value: profit,
            },
            excluded_txns,
            receipts,
            traces,
            profit,
        }
    }

    /// The V1 part of the payload, common to both payload versions.
    pub fn payload(&self) -> &ExecutionPayloadV1 {
        match &self.executable_data.execution_payload {
            ExecutionPayloadFieldV2::V2(payload) => &payload.payload_inner,
            ExecutionPayloadFieldV2::V1(payload) => payload,
        }
    }

    /// Withdrawals carried by a V2 payload.
    pub fn withdrawals(&self) -> Option<&[Withdrawal]> {
        match &self.executable_data.execution_payload {
            ExecutionPayloadFieldV2::V2(payload) => Some(&payload.withdrawals),
            ExecutionPayloadFieldV2::V1(_) => None,
        }
    }

    /// Hashes of the included transactions, in block order.
    pub fn included_hashes(&self) -> Vec<B256> {
        self.receipts.iter().map(|receipt| receipt.transaction_hash).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{Header, TxType};
    use alloy_eips::eip4895::Withdrawals;
    use alloy_primitives::{Bytes, LogData};

    fn executed(index: usize, logs: Option<Vec<Log>>) -> ExecutedReceipt {
        ExecutedReceipt {
            tx_hash: B256::with_last_byte(index as u8 + 1),
            tx_type: TxType::Eip1559,
            index,
            status: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000 * (index as u64 + 1),
            logs,
            logs_bloom: Bloom::ZERO,
            contract_address: None,
            storage_checks: StorageCheckList::default(),
        }
    }

    fn block(withdrawals: Option<Withdrawals>) -> Block {
        Block {
            header: Header {
                number: 7,
                gas_used: 42_000,
                base_fee_per_gas: Some(3),
                withdrawals_root: withdrawals.as_ref().map(|_| B256::repeat_byte(1)),
                ..Default::default()
            },
            transactions: Vec::new(),
            uncles: Vec::new(),
            withdrawals,
        }
    }

    #[test]
    fn test_absent_logs_become_empty() {
        let log = Log {
            address: Address::with_last_byte(1),
            data: LogData::new_unchecked(vec![], Bytes::new()),
        };
        let sealed = SealedBlock::new(
            &block(None),
            vec![executed(0, None), executed(1, Some(vec![log]))],
            Vec::new(),
            None,
            U256::from(5),
        );

        assert_eq!(sealed.receipts[0].logs, Vec::new());
        assert_eq!(sealed.receipts[1].logs.len(), 1);

        let json = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json["receipts"][0]["logs"], serde_json::json!([]));
        assert_eq!(json["receipts"][0]["type"], "0x2");
        assert!(json.get("traces").is_none());
        assert_eq!(json["profit"], "0x5");
        assert_eq!(json["excludedTxns"], serde_json::json!([]));
    }

    #[test]
    fn test_payload_version_follows_withdrawals() {
        let v1 = SealedBlock::new(&block(None), Vec::new(), Vec::new(), None, U256::from(5));
        assert!(matches!(v1.executable_data.execution_payload, ExecutionPayloadFieldV2::V1(_)));
        assert!(v1.withdrawals().is_none());
        assert_eq!(v1.payload().block_number, 7);
        assert_eq!(v1.payload().gas_used, 42_000);
        assert_eq!(v1.payload().base_fee_per_gas, U256::from(3));
        assert_eq!(v1.payload().block_hash, block(None).hash());

        let json = serde_json::to_value(&v1).unwrap();
        assert_eq!(json["executableData"]["blockValue"], "0x5");
        assert_eq!(json["executableData"]["executionPayload"]["blockNumber"], "0x7");
        assert!(json["executableData"]["executionPayload"].get("withdrawals").is_none());

        let withdrawal =
            Withdrawal { index: 3, validator_index: 4, address: Address::ZERO, amount: 5 };
        let with = block(Some(Withdrawals::new(vec![withdrawal])));
        let v2 = SealedBlock::new(&with, Vec::new(), Vec::new(), None, U256::ZERO);
        assert_eq!(v2.withdrawals(), Some(&[withdrawal][..]));
        assert_eq!(v2.payload().block_hash, with.hash());

        let json = serde_json::to_value(&v2).unwrap();
        let payload = &json["executableData"]["executionPayload"];
        assert_eq!(payload["withdrawals"][0]["validatorIndex"], "0x4");
    }

    #[test]
    fn test_trace_slots_serialize_result_or_error() {
        let ok = TraceResult::from(Ok(serde_json::json!({ "type": "CALL" })));
        let err = TraceResult::from(Err(TraceError::MissingFrame));

        assert_eq!(serde_json::to_value(ok).unwrap(), serde_json::json!({ "type": "CALL" }));
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            serde_json::json!({ "error": "execution did not produce a call frame" })
        );
    }

    #[test]
    fn test_exclusion_reason_is_failure_display() {
        let failure = TxFailure::execution("insufficient funds");
        let excluded = ExcludedTransaction::new(B256::ZERO, &failure);
        assert_eq!(excluded.reason, "insufficient funds");
    }
}
