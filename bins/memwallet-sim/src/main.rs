//! Scripted shadow-wallet run against the simulated node.
//!
//! Funds a wallet with mature coinbases, sends a series of payments, mines
//! them, reorganizes the chain and checks that every output the wallet
//! tracks is still unspent on the node. The outcome is written as JSON.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use memwallet::SelectionOrder;
use memwallet_core::address::{Address, Network};
use memwallet_core::constants::{COIN, DEFAULT_FEE_RATE};
use memwallet_harness::logging::init_logging;
use memwallet_harness::{Harness, HarnessConfig};

#[derive(Parser, Debug)]
#[command(
    name = "memwallet-sim",
    version,
    about = "Run a scripted shadow-wallet scenario against an in-process node"
)]
struct Args {
    /// Network parameters to simulate (mainnet, testnet, regtest, simnet)
    #[arg(long, default_value = "simnet")]
    network: Network,

    /// Harness index the wallet seed is derived from
    #[arg(long, default_value_t = 0)]
    seed_index: u32,

    /// Spendable coinbases to mine before the first payment
    #[arg(long, default_value_t = 4)]
    mature_outputs: u64,

    /// Number of payments to send
    #[arg(long, default_value_t = 3)]
    payments: u32,

    /// Value of each payment in whole coins
    #[arg(long, default_value_t = 25)]
    amount: u64,

    /// Address receiving the payments (defaults to the node's mining address)
    #[arg(long)]
    recipient: Option<Address>,

    /// Fee rate in atoms per byte
    #[arg(long, default_value_t = DEFAULT_FEE_RATE)]
    fee_rate: u64,

    /// Blocks to disconnect in the final reorganization (0 skips it)
    #[arg(long, default_value_t = 1)]
    reorg_depth: u64,

    /// Select inputs in outpoint order instead of ledger order
    #[arg(long)]
    ordered: bool,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            network: self.network,
            seed_index: self.seed_index,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            sync_poll_interval: Duration::from_millis(10),
            selection_order: if self.ordered {
                SelectionOrder::ByOutpoint
            } else {
                SelectionOrder::Unordered
            },
            ..HarnessConfig::default()
        }
    }
}

#[derive(Serialize, Debug)]
struct Payment {
    txid: String,
    amount: u64,
    height: u64,
    balance_after: u64,
}

#[derive(Serialize, Debug)]
struct Reorg {
    depth: u64,
    height_before: u64,
    height_after: u64,
    balance_before: u64,
    balance_after: u64,
}

#[derive(Serialize, Debug)]
struct Report {
    network: Network,
    coinbase_maturity: u64,
    coinbase_address: String,
    recipient: String,
    funded_height: u64,
    funded_balance: u64,
    payments: Vec<Payment>,
    reorg: Option<Reorg>,
    final_height: u64,
    confirmed_balance: u64,
    tracked_outputs: usize,
    addresses: usize,
}

async fn run(args: &Args) -> Result<Report> {
    let harness = Harness::launch(&args.harness_config())
        .await
        .context("starting harness")?;
    let wallet = harness.wallet();
    let sim = harness.sim().context("harness has no simulated node")?;

    let funded_height = harness.with_mature_outputs(args.mature_outputs).await?;
    let funded_balance = wallet.confirmed_balance();
    info!(funded_height, funded_balance, "wallet funded");

    let amount = args
        .amount
        .checked_mul(COIN)
        .context("payment amount overflows")?;
    let recipient = match args.recipient {
        Some(address) if address.network() != args.network => {
            bail!("recipient {address} is a {} address, expected {}", address.network(), args.network)
        }
        Some(address) => address,
        None => sim.miner_address(),
    };
    let mut payments = Vec::new();
    for n in 0..args.payments {
        let outputs = vec![memwallet_core::types::TxOutput {
            value: amount,
            script: recipient.script(),
        }];
        let txid = wallet
            .send_outputs(outputs, args.fee_rate)
            .await
            .with_context(|| format!("payment {n}"))?;
        let height = harness.mine_and_sync(1).await?;
        payments.push(Payment {
            txid: txid.to_string(),
            amount,
            height,
            balance_after: wallet.confirmed_balance(),
        });
    }

    let reorg = if args.reorg_depth > 0 {
        let height_before = wallet.synced_height();
        let balance_before = wallet.confirmed_balance();
        sim.reorg(args.reorg_depth, args.reorg_depth + 1)
            .context("reorganizing chain")?;
        let height_after = wallet.sync().await?;
        Some(Reorg {
            depth: args.reorg_depth,
            height_before,
            height_after,
            balance_before,
            balance_after: wallet.confirmed_balance(),
        })
    } else {
        None
    };

    let utxos = wallet.utxos();
    let stale: Vec<_> = utxos.keys().filter(|op| !sim.is_unspent(op)).collect();
    if !stale.is_empty() {
        for op in &stale {
            warn!(outpoint = %op, "wallet tracks an output the node does not have");
        }
        bail!("{} tracked outputs are not unspent on the node", stale.len());
    }

    Ok(Report {
        network: args.network,
        coinbase_maturity: wallet.params().coinbase_maturity,
        coinbase_address: wallet.coinbase_address().to_string(),
        recipient: recipient.to_string(),
        funded_height,
        funded_balance,
        payments,
        reorg,
        final_height: wallet.synced_height(),
        confirmed_balance: wallet.confirmed_balance(),
        tracked_outputs: utxos.len(),
        addresses: wallet.addresses().len(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format)?;
    info!("memwallet-sim v{}", env!("CARGO_PKG_VERSION"));

    let report = run(&args).await?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    serde_json::to_writer_pretty(&mut out, &report).context("writing report")?;
    writeln!(out)?;
    info!(
        final_height = report.final_height,
        balance = report.confirmed_balance,
        "scenario complete"
    );
    Ok(())
}
