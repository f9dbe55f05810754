//! The wallet facade exposed to test code.
//!
//! Combines the shared [`WalletState`], the sync engine and a
//! [`NodeClient`]. Balance and funding calls read the local ledger only;
//! the node is contacted for filter updates, broadcasts and best-block
//! polling.
//!
//! Once the sync engine has halted the ledger no longer mirrors the node.
//! Fallible calls then return [`WalletError::Halted`], and the ledger
//! readers escalate to the [`MalfunctionReporter`] instead of answering.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use memwallet_core::address::Address;
use memwallet_core::params::NetworkParams;
use memwallet_core::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};

use crate::builder::TransactionBuilder;
use crate::config::{SelectionOrder, WalletConfig};
use crate::error::WalletError;
use crate::ledger::Utxo;
use crate::node::NodeClient;
use crate::state::WalletState;
use crate::sync::{escalate, ChainFeed, EngineHandle, EngineStatus, MalfunctionReporter, SyncEngine};

pub struct Wallet {
    state: Arc<RwLock<WalletState>>,
    node: Arc<dyn NodeClient>,
    feed: ChainFeed,
    engine: EngineHandle,
    status: Arc<EngineStatus>,
    reporter: Arc<dyn MalfunctionReporter>,
    config: WalletConfig,
}

impl Wallet {
    /// Create the wallet, start its sync engine, register its addresses
    /// with the node's filter and subscribe to block notifications.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn launch(
        config: WalletConfig,
        node: Arc<dyn NodeClient>,
        reporter: Arc<dyn MalfunctionReporter>,
    ) -> Result<Self, WalletError> {
        let state = Arc::new(RwLock::new(WalletState::new(&config.seed, config.params)));
        let status = Arc::new(EngineStatus::default());
        let (feed, engine) = SyncEngine::spawn(state.clone(), status.clone(), reporter.clone());

        let wallet = Self {
            state,
            node,
            feed,
            engine,
            status,
            reporter,
            config,
        };

        let launched = async {
            wallet.reload_filter().await?;
            wallet.node.notify_blocks(wallet.feed.clone()).await?;
            Ok::<_, WalletError>(())
        }
        .await;
        if let Err(e) = launched {
            wallet.dispose();
            return Err(e);
        }

        info!(
            network = %wallet.config.params.network,
            coinbase = %wallet.coinbase_address(),
            "wallet launched"
        );
        Ok(wallet)
    }

    /// Producer handle for block notifications.
    pub fn feed(&self) -> ChainFeed {
        self.feed.clone()
    }

    pub fn params(&self) -> NetworkParams {
        self.config.params
    }

    /// Address receiving coinbase outputs (key index 0).
    pub fn coinbase_address(&self) -> Address {
        self.state.read().keychain.coinbase_address()
    }

    /// Derive a fresh address and add it to the node's filter.
    pub async fn new_address(&self) -> Result<Address, WalletError> {
        self.status.check()?;
        let derived = self.state.write().keychain.next_address();
        let (index, address) = match derived {
            Ok(derived) => derived,
            Err(e) => self.fatal(&e),
        };
        debug!(index, %address, "derived address");
        self.reload_filter().await?;
        Ok(address)
    }

    /// Sum of unlocked, mature outputs at the current height.
    pub fn confirmed_balance(&self) -> u64 {
        self.ledger().confirmed_balance()
    }

    /// Height of the last update the sync engine applied.
    pub fn synced_height(&self) -> u64 {
        self.ledger().current_height
    }

    /// Ordered copy of the ledger.
    pub fn utxos(&self) -> BTreeMap<OutPoint, Utxo> {
        self.ledger().snapshot()
    }

    /// Reason the sync engine halted, if it has.
    pub fn halted(&self) -> Option<String> {
        self.status.halted()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.state.read().keychain.addresses()
    }

    /// Fund, sign and lock a transaction paying `outputs`.
    ///
    /// Selection and locking happen under one write lock, so concurrent
    /// calls never pick the same output. The transaction is not broadcast.
    /// If the filter cannot be reloaded for a new change address, the
    /// inputs are unlocked again before the error is returned.
    pub async fn create_transaction(
        &self,
        outputs: Vec<TxOutput>,
        fee_rate: u64,
    ) -> Result<Transaction, WalletError> {
        self.status.check()?;
        let (tx, minted_change) = self.fund_and_lock(outputs, fee_rate)?;
        if minted_change {
            if let Err(e) = self.reload_filter().await {
                warn!(error = %e, inputs = tx.inputs.len(), "filter reload failed, unlocking inputs");
                self.unlock_outputs(&tx.inputs);
                return Err(e);
            }
        }
        Ok(tx)
    }

    fn fund_and_lock(
        &self,
        outputs: Vec<TxOutput>,
        fee_rate: u64,
    ) -> Result<(Transaction, bool), WalletError> {
        let mut builder = TransactionBuilder::new(fee_rate);
        for output in outputs {
            builder.add_output(output);
        }

        let mut state = self.state.write();
        self.status.check()?;
        let mut candidates = state.spendable();
        if self.config.selection_order == SelectionOrder::ByOutpoint {
            candidates.sort_by_key(|(op, _)| *op);
        }
        let selection = builder.fund(candidates)?;

        let change_script = if selection.change > 0 {
            match state.keychain.next_address() {
                Ok((_, address)) => Some(address.script()),
                Err(e) => {
                    drop(state);
                    self.fatal(&e)
                }
            }
        } else {
            None
        };
        let minted_change = change_script.is_some();

        let unsigned = builder.build(&selection, change_script);
        let tx = TransactionBuilder::sign(unsigned, &selection, &state.keychain)?;
        for (outpoint, _) in &selection.selected {
            state.ledger.lock(outpoint);
        }
        debug!(
            inputs = selection.selected.len(),
            total = selection.total,
            fee = selection.fee,
            change = selection.change,
            "funded transaction"
        );
        Ok((tx, minted_change))
    }

    /// [`create_transaction`](Self::create_transaction) plus broadcast.
    ///
    /// On broadcast failure the inputs stay locked; release them with
    /// [`unlock_outputs`](Self::unlock_outputs).
    pub async fn send_outputs(
        &self,
        outputs: Vec<TxOutput>,
        fee_rate: u64,
    ) -> Result<Hash256, WalletError> {
        self.status.check()?;
        let tx = self.create_transaction(outputs, fee_rate).await?;
        match self.node.send_raw_transaction(&tx, true).await {
            Ok(txid) => {
                info!(%txid, "broadcast transaction");
                Ok(txid)
            }
            Err(e) => {
                warn!(error = %e, inputs = tx.inputs.len(), "broadcast failed, inputs remain locked");
                Err(WalletError::Broadcast(e))
            }
        }
    }

    /// Release the locks held by `inputs`. Unknown outpoints are ignored.
    pub fn unlock_outputs(&self, inputs: &[TxInput]) {
        let mut state = self.state.write();
        for input in inputs {
            state.ledger.unlock(&input.previous_output);
        }
    }

    /// Wait until the applied height reaches the node's best height.
    ///
    /// Polls on the configured interval with no overall timeout. Returns
    /// [`WalletError::Halted`] if the sync engine stopped on a fatal error.
    pub async fn sync(&self) -> Result<u64, WalletError> {
        let (_, best) = self.node.get_best_block().await?;
        let mut ticker = tokio::time::interval(self.config.sync_poll_interval);
        loop {
            self.status.check()?;
            let height = self.state.read().current_height;
            if height >= best {
                debug!(height, best, "wallet synced");
                return Ok(height);
            }
            ticker.tick().await;
        }
    }

    /// Stop the sync engine and the node's notification delivery. Queued
    /// updates are dropped. Idempotent.
    pub fn dispose(&self) {
        self.engine.stop();
        self.node.stop_notifications();
        debug!("wallet disposed");
    }

    /// [`dispose`](Self::dispose) and wait for the sync engine to exit.
    pub async fn shutdown(&self) {
        self.node.stop_notifications();
        self.engine.shutdown().await;
    }

    /// Read access to a ledger that still mirrors the node.
    fn ledger(&self) -> RwLockReadGuard<'_, WalletState> {
        if let Some(reason) = self.status.halted() {
            self.fatal(&WalletError::Halted(reason));
        }
        self.state.read()
    }

    async fn reload_filter(&self) -> Result<(), WalletError> {
        let (addresses, outpoints) = {
            let state = self.state.read();
            (state.keychain.addresses(), state.ledger.outpoints())
        };
        self.node.load_tx_filter(true, addresses, outpoints).await?;
        Ok(())
    }

    fn fatal(&self, err: &WalletError) -> ! {
        escalate(&self.status, self.reporter.as_ref(), err)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.config.params.network)
            .field("synced_height", &self.state.read().current_height)
            .field("halted", &self.status.halted())
            .finish_non_exhaustive()
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.engine.stop();
        self.node.stop_notifications();
    }
}
