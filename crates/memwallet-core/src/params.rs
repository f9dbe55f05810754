//! Static chain parameter tables.
//!
//! These values are supplied to the wallet, never derived from chain data.

use serde::Serialize;

use crate::address::Network;
use crate::constants::COIN;

/// Chain parameters consumed by the wallet and the simulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkParams {
    pub name: &'static str,
    pub network: Network,
    /// Number of blocks a coinbase output must wait before it is spendable.
    pub coinbase_maturity: u64,
    /// Coinbase subsidy per block, in atoms.
    pub block_reward: u64,
}

pub const MAINNET: NetworkParams = NetworkParams {
    name: "mainnet",
    network: Network::Mainnet,
    coinbase_maturity: 256,
    block_reward: 300 * COIN,
};

pub const TESTNET: NetworkParams = NetworkParams {
    name: "testnet",
    network: Network::Testnet,
    coinbase_maturity: 16,
    block_reward: 300 * COIN,
};

pub const REGTEST: NetworkParams = NetworkParams {
    name: "regtest",
    network: Network::Regtest,
    coinbase_maturity: 16,
    block_reward: 300 * COIN,
};

pub const SIMNET: NetworkParams = NetworkParams {
    name: "simnet",
    network: Network::Simnet,
    coinbase_maturity: 16,
    block_reward: 300 * COIN,
};

impl NetworkParams {
    pub fn for_network(network: Network) -> &'static NetworkParams {
        match network {
            Network::Mainnet => &MAINNET,
            Network::Testnet => &TESTNET,
            Network::Regtest => &REGTEST,
            Network::Simnet => &SIMNET,
        }
    }

    /// Height at which a coinbase confirmed at `height` becomes spendable.
    pub fn maturity_height(&self, height: u64) -> u64 {
        height.saturating_add(self.coinbase_maturity)
    }
}
