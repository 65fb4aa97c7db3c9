//! Block assembly engine.
//!
//! Given a parent block, a list of transactions that must be considered first and
//! optionally the pending pool, the [`Sealer`] builds a complete candidate block by
//! executing transactions speculatively against a snapshot-able state, within the block
//! gas limit. The result is a [`SealedBlock`]: the executable payload, receipts, optional
//! call traces, the reasons for every excluded transaction and the beneficiary profit.
//!
//! # Architecture
//!
//! - **Stream** ([`stream`]): the caller priority list followed by the fee ordered pool.
//! - **Executor** ([`executor`]): applies one transaction all-or-nothing.
//! - **Gas pool** ([`gas`]): the remaining block gas.
//! - **Sealer** ([`sealer`]): drives the other parts and finalizes the block.
//! - **Bundle** ([`bundle`]): what is handed back to the caller.
//!
//! Chain, state, pool, virtual machine and consensus engine are traits with in-memory
//! implementations ([`MemoryChain`], [`MemoryState`], [`MemoryPool`], [`RevmApplier`],
//! [`DevEngine`]).
//!
//! # Quick Start
//!
//! ```
//! use block_sealer::{
//!     BlockParameters, ChainConfig, DevEngine, MemoryChain, RevmApplier, Sealer, SealerConfig,
//!     Workload, WorkloadConfig,
//! };
//!
//! let workload = Workload::generate(WorkloadConfig::default());
//! let chain = MemoryChain::new(ChainConfig::default(), workload.genesis(), 30_000_000);
//! let pool = workload.memory_pool().unwrap();
//! let config = SealerConfig::default();
//! let sealer = Sealer::new(chain, DevEngine::new(), pool, RevmApplier::new(), config);
//!
//! let params = BlockParameters { timestamp: 12, gas_limit: 30_000_000, ..Default::default() };
//! let sealed = sealer.seal_block(&params, workload.priority.clone(), true, false).unwrap();
//!
//! println!("included {} transactions, profit {}", sealed.receipts.len(), sealed.profit);
//! ```

pub mod bundle;
pub mod chain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gas;
pub mod pool;
pub mod sealer;
pub mod state;
pub mod stream;
pub mod tracer;
pub mod transaction;
pub mod workload;

pub use alloy_eips::eip4895::Withdrawal;
pub use bundle::{ExcludedTransaction, Receipt, SealedBlock, TraceResult};
pub use chain::{ChainConfig, ChainReader, MemoryChain, Rules};
pub use engine::{Block, ConsensusEngine, DevEngine};
pub use error::{EngineError, GasPoolError, RecoveryError, SealError, TraceError, TxFailure};
pub use executor::{ExecutedReceipt, RevmApplier, SpeculativeExecutor, TransactionApplier};
pub use gas::GasPool;
pub use pool::{MemoryPool, TransactionPool, TransactionsByPriceAndNonce};
pub use sealer::{BlockParameters, NonceAndBalance, Sealer, SealerConfig};
pub use state::{MemoryState, PrefetchGuard, StateView, StorageCheckSet};
pub use stream::TxStream;
pub use tracer::CallTracer;
pub use transaction::{
    ChainSigner, SignedTransaction, StorageCheckList, TxFees, UnsignedTransaction, TX_GAS,
};
pub use workload::{Account, Workload, WorkloadConfig};
