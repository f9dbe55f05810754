//! Interface to the node the wallet shadows.
//!
//! The wallet only needs four calls. Implementations live outside this
//! crate: a JSON-RPC client for a real node and an in-process simulated
//! node for tests.

use async_trait::async_trait;

use memwallet_core::address::Address;
use memwallet_core::types::{Hash256, OutPoint, Transaction};

use crate::error::NodeError;
use crate::sync::ChainFeed;

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Start delivering block connect/disconnect notifications to `feed`,
    /// in the order they happen on the node.
    async fn notify_blocks(&self, feed: ChainFeed) -> Result<(), NodeError>;

    /// Set the transaction filter applied to notifications.
    ///
    /// With `reload` the filter is replaced; otherwise the entries are added.
    async fn load_tx_filter(
        &self,
        reload: bool,
        addresses: Vec<Address>,
        outpoints: Vec<OutPoint>,
    ) -> Result<(), NodeError>;

    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<Hash256, NodeError>;

    /// Hash and height of the node's best block.
    async fn get_best_block(&self) -> Result<(Hash256, u64), NodeError>;

    /// Stop whatever [`notify_blocks`](Self::notify_blocks) started.
    /// Called when the wallet is disposed; must be idempotent.
    fn stop_notifications(&self) {}
}
