//! Signed candidate transactions.
//!
//! A [`SignedTransaction`] is immutable once signed: the sealer only ever reads it. The
//! signed form is an EIP-2718 [`TxEnvelope`], so the encoded bytes and the hash are the
//! ones any Ethereum client produces. The sender is never stored, it is recovered from the
//! signature by a [`ChainSigner`].
//!
//! A transaction may carry a [`StorageCheckList`] next to the envelope. The list travels
//! with the transaction but is not covered by the signature or the hash.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEip2930, TxEnvelope, TxLegacy, TxType};
use alloy_eips::{
    eip2718::Encodable2718,
    eip2930::{AccessList, AccessListItem},
};
use alloy_primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::error::RecoveryError;

/// Gas charged for the cheapest possible transaction (a plain value transfer).
pub const TX_GAS: u64 = 21_000;

// ============================================================================
// Transaction Payload
// ============================================================================

/// Fee fields of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFees {
    /// Pre-London single gas price.
    Legacy {
        /// Wei paid per unit of gas.
        gas_price: u128,
    },
    /// EIP-1559 fee cap and priority fee.
    Dynamic {
        /// Maximum total wei per gas the sender pays.
        max_fee_per_gas: u128,
        /// Maximum wei per gas paid to the block beneficiary.
        max_priority_fee_per_gas: u128,
    },
}

impl TxFees {
    /// The maximum wei per gas the sender is willing to pay.
    pub fn fee_cap(&self) -> u128 {
        match *self {
            TxFees::Legacy { gas_price } => gas_price,
            TxFees::Dynamic { max_fee_per_gas, .. } => max_fee_per_gas,
        }
    }

    /// The maximum wei per gas that goes to the beneficiary.
    pub fn tip_cap(&self) -> u128 {
        match *self {
            TxFees::Legacy { gas_price } => gas_price,
            TxFees::Dynamic { max_priority_fee_per_gas, .. } => max_priority_fee_per_gas,
        }
    }

    /// Priority fee per gas actually received by the beneficiary under `base_fee`.
    ///
    /// Returns `None` when the fee cap does not even cover the base fee.
    pub fn effective_tip_per_gas(&self, base_fee: Option<u64>) -> Option<u128> {
        let base_fee = u128::from(base_fee.unwrap_or_default());
        let headroom = self.fee_cap().checked_sub(base_fee)?;
        Some(headroom.min(self.tip_cap()))
    }
}

/// One declared `(slot, value)` expectation of a storage check list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageKeyValueCheck {
    pub index: B256,
    pub value: B256,
}

/// Declared storage expectations for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCheckTuple {
    pub address: Address,
    pub storage_key_value_checks: Vec<StorageKeyValueCheck>,
}

/// The storage check list carried by the extended transaction format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageCheckList(pub Vec<StorageCheckTuple>);

impl StorageCheckList {
    /// Total number of slot checks across all accounts.
    pub fn storage_key_value_checks(&self) -> usize {
        self.0.iter().map(|tuple| tuple.storage_key_value_checks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageCheckTuple> {
        self.0.iter()
    }
}

/// Transaction fields before signing.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    /// Chain the signature commits to. `None` produces a replay-vulnerable legacy
    /// signature; typed transactions always commit to a chain id and use zero instead.
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: TxFees,
    pub kind: TxKind,
    pub value: U256,
    pub input: Bytes,
    pub access_list: AccessList,
    pub storage_checks: StorageCheckList,
}

impl UnsignedTransaction {
    /// A plain value transfer paying `gas_price` per gas.
    pub fn transfer(chain_id: u64, nonce: u64, to: Address, value: U256, gas_price: u128) -> Self {
        Self {
            chain_id: Some(chain_id),
            nonce,
            gas_limit: TX_GAS,
            fees: TxFees::Legacy { gas_price },
            kind: TxKind::Call(to),
            value,
            input: Bytes::new(),
            access_list: AccessList::default(),
            storage_checks: StorageCheckList::default(),
        }
    }

    /// The envelope type the fields map to.
    pub fn tx_type(&self) -> TxType {
        match self.fees {
            TxFees::Dynamic { .. } => TxType::Eip1559,
            TxFees::Legacy { .. } if !self.access_list.0.is_empty() => TxType::Eip2930,
            TxFees::Legacy { .. } => TxType::Legacy,
        }
    }

    /// The hash the sender signs.
    pub fn signature_hash(&self) -> B256 {
        self.typed().signature_hash()
    }

    /// Signs the transaction with the given key.
    pub fn sign(self, signing_key: &SigningKey) -> SignedTransaction {
        let signature_hash = self.signature_hash();
        let (sig, recovery_id) = signing_key
            .sign_prehash_recoverable(signature_hash.as_slice())
            .expect("signing should succeed");
        let signature = Signature::from_signature_and_parity(sig, recovery_id.is_y_odd());
        SignedTransaction::new(self, signature)
    }

    fn typed(&self) -> Typed {
        let chain_id = self.chain_id.unwrap_or_default();
        match self.fees {
            TxFees::Dynamic { max_fee_per_gas, max_priority_fee_per_gas } => {
                Typed::Eip1559(TxEip1559 {
                    chain_id,
                    nonce: self.nonce,
                    gas_limit: self.gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: self.kind,
                    value: self.value,
                    access_list: self.access_list.clone(),
                    input: self.input.clone(),
                })
            }
            TxFees::Legacy { gas_price } if !self.access_list.0.is_empty() => {
                Typed::Eip2930(TxEip2930 {
                    chain_id,
                    nonce: self.nonce,
                    gas_price,
                    gas_limit: self.gas_limit,
                    to: self.kind,
                    value: self.value,
                    access_list: self.access_list.clone(),
                    input: self.input.clone(),
                })
            }
            TxFees::Legacy { gas_price } => Typed::Legacy(TxLegacy {
                chain_id: self.chain_id,
                nonce: self.nonce,
                gas_price,
                gas_limit: self.gas_limit,
                to: self.kind,
                value: self.value,
                input: self.input.clone(),
            }),
        }
    }
}

/// The consensus transaction matching an [`UnsignedTransaction`].
enum Typed {
    Legacy(TxLegacy),
    Eip2930(TxEip2930),
    Eip1559(TxEip1559),
}

impl Typed {
    fn signature_hash(&self) -> B256 {
        match self {
            Typed::Legacy(tx) => tx.signature_hash(),
            Typed::Eip2930(tx) => tx.signature_hash(),
            Typed::Eip1559(tx) => tx.signature_hash(),
        }
    }

    fn into_envelope(self, signature: Signature) -> TxEnvelope {
        match self {
            Typed::Legacy(tx) => tx.into_signed(signature).into(),
            Typed::Eip2930(tx) => tx.into_signed(signature).into(),
            Typed::Eip1559(tx) => tx.into_signed(signature).into(),
        }
    }
}

// ============================================================================
// Signed Transaction
// ============================================================================

/// A signed transaction ready for inclusion.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    tx: UnsignedTransaction,
    envelope: TxEnvelope,
    signature: Signature,
    signature_hash: B256,
    hash: B256,
}

impl SignedTransaction {
    /// Attaches a signature to the transaction fields.
    pub fn new(tx: UnsignedTransaction, signature: Signature) -> Self {
        let typed = tx.typed();
        let signature_hash = typed.signature_hash();
        let envelope = typed.into_envelope(signature);
        let hash = keccak256(envelope.encoded_2718());
        Self { tx, envelope, signature, signature_hash, hash }
    }

    /// The transaction hash: keccak of the EIP-2718 encoding.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// The hash covered by the signature.
    pub fn signature_hash(&self) -> B256 {
        self.signature_hash
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }

    pub fn tx_type(&self) -> TxType {
        self.tx.tx_type()
    }

    /// Chain id the signature commits to, `None` for unprotected legacy transactions.
    pub fn chain_id(&self) -> Option<u64> {
        match self.tx_type() {
            TxType::Legacy => self.tx.chain_id,
            _ => Some(self.tx.chain_id.unwrap_or_default()),
        }
    }

    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.tx.gas_limit
    }

    pub fn fees(&self) -> TxFees {
        self.tx.fees
    }

    pub fn kind(&self) -> TxKind {
        self.tx.kind
    }

    /// The call target, `None` for contract creation.
    pub fn to(&self) -> Option<Address> {
        self.tx.kind.to().copied()
    }

    pub fn value(&self) -> U256 {
        self.tx.value
    }

    pub fn input(&self) -> &Bytes {
        &self.tx.input
    }

    pub fn access_list(&self) -> &[AccessListItem] {
        &self.tx.access_list.0
    }

    pub fn storage_checks(&self) -> &StorageCheckList {
        &self.tx.storage_checks
    }

    /// Whether the signature commits to a chain id.
    pub fn is_protected(&self) -> bool {
        self.chain_id().is_some()
    }

    /// See [`TxFees::effective_tip_per_gas`].
    pub fn effective_tip_per_gas(&self, base_fee: Option<u64>) -> Option<u128> {
        self.tx.fees.effective_tip_per_gas(base_fee)
    }

    /// Recovers the signer from the signature alone, without chain checks.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature.recover_address_from_prehash(&self.signature_hash).ok()
    }

    /// EIP-2718 encoding, as carried in an execution payload.
    pub fn encoded(&self) -> Bytes {
        self.envelope.encoded_2718().into()
    }
}

/// Recovers transaction senders under the rules of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSigner {
    chain_id: u64,
}

impl ChainSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Returns the sender of `tx`.
    ///
    /// Protected transactions must carry this signer's chain id.
    pub fn sender(&self, tx: &SignedTransaction) -> Result<Address, RecoveryError> {
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != self.chain_id {
                return Err(RecoveryError::InvalidChainId { have: chain_id, want: self.chain_id });
            }
        }
        tx.recover_signer().ok_or(RecoveryError::InvalidSignature)
    }
}
