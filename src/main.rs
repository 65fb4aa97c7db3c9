//! CLI sealing a block over a generated transfer workload.

use alloy_primitives::{Address, B256};
use block_sealer::{
    BlockParameters, ChainConfig, DevEngine, MemoryChain, RevmApplier, Sealer, SealerConfig,
    Workload, WorkloadConfig,
};
use clap::Parser;
use eyre::WrapErr;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Seal a block over a generated transfer workload")]
struct Args {
    /// Funded accounts in the genesis state.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,
    /// Transactions in the explicit priority list.
    #[arg(long, default_value_t = 100)]
    priority: usize,
    /// Transactions placed in the pool.
    #[arg(long, default_value_t = 1000)]
    pool: usize,
    /// 0.0 = no sender conflicts, 1.0 = all transfers between two accounts.
    #[arg(long, default_value_t = 0.0)]
    conflict_factor: f64,
    #[arg(long, default_value_t = 30_000_000)]
    gas_limit: u64,
    /// Fill the remaining block space from the pool.
    #[arg(long)]
    fill: bool,
    /// Attach a call trace to every included transaction.
    #[arg(long)]
    trace: bool,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 1)]
    chain_id: u64,
    /// Print the sealed block as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let workload = Workload::generate(WorkloadConfig {
        num_accounts: args.accounts,
        num_priority: args.priority,
        num_pool: args.pool,
        conflict_factor: args.conflict_factor,
        seed: args.seed,
        chain_id: args.chain_id,
        ..Default::default()
    });
    let chain_config = ChainConfig { chain_id: args.chain_id, ..Default::default() };
    let chain = MemoryChain::new(chain_config, workload.genesis(), args.gas_limit);
    let pool = workload.memory_pool().wrap_err("could not fill the pool")?;
    let sealer =
        Sealer::new(chain, DevEngine::new(), pool, RevmApplier::new(), SealerConfig::default());

    let params = BlockParameters {
        parent_hash: B256::ZERO,
        coinbase: Address::repeat_byte(0xcb),
        timestamp: 12,
        gas_limit: args.gas_limit,
        random: B256::repeat_byte(0x11),
        extra_data: None,
        withdrawals: None,
    };

    let start = Instant::now();
    let sealed = sealer
        .seal_block(&params, workload.priority.clone(), args.fill, args.trace)
        .wrap_err("could not seal block")?;
    let elapsed = start.elapsed();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sealed)?);
        return Ok(());
    }

    let payload = sealed.payload();
    println!("=== Sealed block {} ===\n", payload.block_hash);
    println!("{:20} | {}", "included", sealed.receipts.len());
    println!("{:20} | {}", "excluded", sealed.excluded_txns.len());
    println!("{:20} | {} / {}", "gas used", payload.gas_used, payload.gas_limit);
    println!("{:20} | {} wei", "profit", sealed.profit);
    println!(
        "{:20} | {:.2} ms ({:.0} tx/s)",
        "elapsed",
        elapsed.as_secs_f64() * 1000.0,
        sealed.receipts.len() as f64 / elapsed.as_secs_f64()
    );
    for excluded in &sealed.excluded_txns {
        println!("  excluded {}: {}", excluded.hash, excluded.reason);
    }

    Ok(())
}
