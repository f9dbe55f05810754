//! Wallet configuration.

use std::time::Duration;

use memwallet_core::params::NetworkParams;

use crate::keys::Seed;

/// Default interval between best-block polls in [`Wallet::sync`](crate::Wallet::sync).
pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Order in which spendable outputs are offered to coin selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionOrder {
    /// Ledger iteration order. Which outputs get picked is unspecified;
    /// only the aggregate result is.
    #[default]
    Unordered,
    /// Ascending by outpoint, for reproducible input sets.
    ByOutpoint,
}

/// Configuration for one wallet instance.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub seed: Seed,
    pub params: NetworkParams,
    pub sync_poll_interval: Duration,
    pub selection_order: SelectionOrder,
}

impl WalletConfig {
    pub fn new(seed: Seed, params: NetworkParams) -> Self {
        Self {
            seed,
            params,
            sync_poll_interval: DEFAULT_SYNC_POLL_INTERVAL,
            selection_order: SelectionOrder::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }

    pub fn with_selection_order(mut self, order: SelectionOrder) -> Self {
        self.selection_order = order;
        self
    }
}
