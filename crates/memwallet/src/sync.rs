//! Chain Sync Engine.
//!
//! Producers push [`ChainUpdate`]s through a [`ChainFeed`] onto an
//! unbounded channel. One background task per wallet drains the channel in
//! arrival order and applies each update to the shared [`WalletState`]
//! under the write lock. Updates are neither reordered by height nor
//! deduplicated.
//!
//! Stopping is signalled on a separate oneshot channel that the task polls
//! ahead of the update channel, so updates still queued at shutdown are
//! dropped.
//!
//! A failed update leaves the ledger out of step with the node. The engine
//! records the reason in [`EngineStatus`], logs it, and hands it to the
//! [`MalfunctionReporter`], which never returns.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use memwallet_core::error::CodecError;
use memwallet_core::types::{BlockHeader, Transaction};

use crate::error::WalletError;
use crate::state::WalletState;

/// A block notification awaiting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainUpdate {
    /// A block at `height` was connected; `txs` are the transactions that
    /// passed the node's filter.
    Connected { height: u64, txs: Vec<Transaction> },
    /// The block at `height` was disconnected.
    Disconnected { height: u64 },
}

impl ChainUpdate {
    pub fn height(&self) -> u64 {
        match self {
            ChainUpdate::Connected { height, .. } | ChainUpdate::Disconnected { height } => *height,
        }
    }
}

/// Escalation path for errors that invalidate the test run.
///
/// Implementations release whatever resources they track and then abort.
pub trait MalfunctionReporter: Send + Sync {
    fn report(&self, reason: &str) -> !;
}

/// Health of the sync engine, shared with the wallet.
#[derive(Debug, Default)]
pub struct EngineStatus {
    halted: Mutex<Option<String>>,
}

impl EngineStatus {
    /// Record the first fatal reason. Later reasons are ignored.
    pub fn halt(&self, reason: impl Into<String>) {
        let mut halted = self.halted.lock();
        if halted.is_none() {
            *halted = Some(reason.into());
        }
    }

    pub fn halted(&self) -> Option<String> {
        self.halted.lock().clone()
    }

    pub fn check(&self) -> Result<(), WalletError> {
        match self.halted() {
            Some(reason) => Err(WalletError::Halted(reason)),
            None => Ok(()),
        }
    }
}

/// Record `err`, log it and escalate. Never returns.
pub(crate) fn escalate(
    status: &EngineStatus,
    reporter: &dyn MalfunctionReporter,
    err: &WalletError,
) -> ! {
    let reason = err.to_string();
    status.halt(reason.clone());
    error!(%reason, "shadow ledger malfunction");
    reporter.report(&reason)
}

/// Producer handle onto the engine's queue. Cheap to clone.
#[derive(Clone)]
pub struct ChainFeed {
    updates: mpsc::UnboundedSender<ChainUpdate>,
    status: Arc<EngineStatus>,
    reporter: Arc<dyn MalfunctionReporter>,
}

impl std::fmt::Debug for ChainFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainFeed")
            .field("closed", &self.updates.is_closed())
            .finish_non_exhaustive()
    }
}

impl ChainFeed {
    /// Queue a connected block.
    pub fn connect(&self, height: u64, txs: Vec<Transaction>) {
        self.push(ChainUpdate::Connected { height, txs });
    }

    /// Queue a disconnected block.
    pub fn disconnect(&self, height: u64) {
        self.push(ChainUpdate::Disconnected { height });
    }

    /// Decode and queue a connect notification.
    ///
    /// Undecodable bytes are fatal.
    pub fn on_block_connected(&self, header: &[u8], txs: &[Vec<u8>]) {
        let decoded = BlockHeader::from_bytes(header).and_then(|h| {
            let txs = txs
                .iter()
                .map(|bytes| Transaction::from_bytes(bytes))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((h.height, txs))
        });
        match decoded {
            Ok((height, txs)) => self.connect(height, txs),
            Err(e) => self.reject(e),
        }
    }

    /// Decode and queue a disconnect notification.
    ///
    /// Undecodable bytes are fatal.
    pub fn on_block_disconnected(&self, header: &[u8]) {
        match BlockHeader::from_bytes(header) {
            Ok(h) => self.disconnect(h.height),
            Err(e) => self.reject(e),
        }
    }

    /// Escalate a notification that could not be decoded.
    pub fn reject(&self, err: CodecError) -> ! {
        escalate(&self.status, self.reporter.as_ref(), &WalletError::Decode(err))
    }

    /// True once the engine has stopped and updates are being dropped.
    pub fn is_closed(&self) -> bool {
        self.updates.is_closed()
    }

    fn push(&self, update: ChainUpdate) {
        let height = update.height();
        if self.updates.send(update).is_err() {
            debug!(height, "sync engine stopped, dropping update");
        }
    }
}

/// The single consumer of a wallet's update queue.
pub struct SyncEngine {
    state: Arc<RwLock<WalletState>>,
    status: Arc<EngineStatus>,
    reporter: Arc<dyn MalfunctionReporter>,
    updates: mpsc::UnboundedReceiver<ChainUpdate>,
    stop: oneshot::Receiver<()>,
}

/// Owner-side handle used to stop the engine.
#[derive(Debug)]
pub struct EngineHandle {
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Signal the engine to stop. Idempotent.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }

    /// Stop the engine and wait for its task to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().is_none_or(|t| t.is_finished())
    }
}

impl SyncEngine {
    /// Spawn the engine on the current tokio runtime.
    pub fn spawn(
        state: Arc<RwLock<WalletState>>,
        status: Arc<EngineStatus>,
        reporter: Arc<dyn MalfunctionReporter>,
    ) -> (ChainFeed, EngineHandle) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let feed = ChainFeed {
            updates: update_tx,
            status: status.clone(),
            reporter: reporter.clone(),
        };
        let engine = SyncEngine {
            state,
            status,
            reporter,
            updates: update_rx,
            stop: stop_rx,
        };
        let task = tokio::spawn(engine.run());

        let handle = EngineHandle {
            stop: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        };
        (feed, handle)
    }

    async fn run(mut self) {
        info!("sync engine started");
        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => {
                    let pending = self.updates.len();
                    info!(pending, "sync engine stopping");
                    break;
                }
                update = self.updates.recv() => {
                    let Some(update) = update else {
                        info!("update channel closed, sync engine stopping");
                        break;
                    };
                    if let Err(e) = self.apply(update) {
                        escalate(&self.status, self.reporter.as_ref(), &e);
                    }
                }
            }
        }
    }

    fn apply(&self, update: ChainUpdate) -> Result<(), WalletError> {
        let mut state = self.state.write();
        match update {
            ChainUpdate::Connected { height, txs } => {
                let result = state.connect(height, &txs)?;
                info!(
                    height,
                    txs = txs.len(),
                    created = result.created,
                    spent = result.destroyed,
                    "block connected"
                );
            }
            ChainUpdate::Disconnected { height } => {
                let result = state.disconnect(height)?;
                info!(
                    height,
                    removed = result.created,
                    restored = result.destroyed,
                    "block disconnected"
                );
            }
        }
        Ok(())
    }
}
