//! Harness configuration loaded from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};

use memwallet::{SelectionOrder, Seed, WalletConfig};
use memwallet_core::address::Network;
use memwallet_core::params::NetworkParams;

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Chain parameters to run against.
    pub network: Network,
    /// Index fed to [`Seed::for_harness`].
    pub seed_index: u32,
    /// JSON-RPC (websocket) endpoint of an external node. `None` runs
    /// against the in-process simulated node.
    pub rpc_endpoint: Option<String>,
    /// Connection attempts before the harness gives up.
    pub rpc_connect_attempts: u32,
    pub log_level: String,
    /// `"text"` or `"json"`.
    pub log_format: String,
    pub sync_poll_interval: Duration,
    pub selection_order: SelectionOrder,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network: Network::Simnet,
            seed_index: 0,
            rpc_endpoint: None,
            rpc_connect_attempts: 20,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            sync_poll_interval: Duration::from_millis(100),
            selection_order: SelectionOrder::Unordered,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from `MEMWALLET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let network = match lookup("MEMWALLET_NETWORK") {
            Some(name) => name
                .parse::<Network>()
                .with_context(|| format!("MEMWALLET_NETWORK: unknown network {name:?}"))?,
            None => defaults.network,
        };

        let seed_index = match lookup("MEMWALLET_SEED_INDEX") {
            Some(v) => v
                .parse()
                .context("MEMWALLET_SEED_INDEX must be a non-negative 32-bit integer")?,
            None => defaults.seed_index,
        };

        let rpc_endpoint = lookup("MEMWALLET_RPC_ENDPOINT").filter(|s| !s.is_empty());

        let rpc_connect_attempts: u32 = match lookup("MEMWALLET_RPC_CONNECT_ATTEMPTS") {
            Some(v) => v
                .parse()
                .context("MEMWALLET_RPC_CONNECT_ATTEMPTS must be a positive integer")?,
            None => defaults.rpc_connect_attempts,
        };
        anyhow::ensure!(rpc_connect_attempts > 0, "MEMWALLET_RPC_CONNECT_ATTEMPTS must be at least 1");

        let log_level = lookup("MEMWALLET_LOG_LEVEL").unwrap_or(defaults.log_level);
        let log_format = lookup("MEMWALLET_LOG_FORMAT").unwrap_or(defaults.log_format);

        let sync_poll_interval = match lookup("MEMWALLET_SYNC_POLL_MS") {
            Some(v) => Duration::from_millis(
                v.parse().context("MEMWALLET_SYNC_POLL_MS must be an integer")?,
            ),
            None => defaults.sync_poll_interval,
        };

        let selection_order = match lookup("MEMWALLET_SELECTION_ORDER").as_deref() {
            None | Some("unordered") => SelectionOrder::Unordered,
            Some("outpoint") => SelectionOrder::ByOutpoint,
            Some(other) => anyhow::bail!(
                "MEMWALLET_SELECTION_ORDER must be \"unordered\" or \"outpoint\", got {other:?}"
            ),
        };

        Ok(Self {
            network,
            seed_index,
            rpc_endpoint,
            rpc_connect_attempts,
            log_level,
            log_format,
            sync_poll_interval,
            selection_order,
        })
    }

    pub fn params(&self) -> NetworkParams {
        *NetworkParams::for_network(self.network)
    }

    /// Wallet configuration for this harness.
    pub fn wallet_config(&self) -> WalletConfig {
        WalletConfig::new(Seed::for_harness(self.seed_index), self.params())
            .with_poll_interval(self.sync_poll_interval)
            .with_selection_order(self.selection_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<HarnessConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HarnessConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.network, Network::Simnet);
        assert_eq!(cfg.seed_index, 0);
        assert!(cfg.rpc_endpoint.is_none());
        assert_eq!(cfg.params().coinbase_maturity, 16);
        assert_eq!(cfg.sync_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn reads_every_variable() {
        let cfg = load(&[
            ("MEMWALLET_NETWORK", "mainnet"),
            ("MEMWALLET_SEED_INDEX", "7"),
            ("MEMWALLET_RPC_ENDPOINT", "ws://127.0.0.1:19556"),
            ("MEMWALLET_RPC_CONNECT_ATTEMPTS", "3"),
            ("MEMWALLET_LOG_LEVEL", "debug"),
            ("MEMWALLET_LOG_FORMAT", "json"),
            ("MEMWALLET_SYNC_POLL_MS", "10"),
            ("MEMWALLET_SELECTION_ORDER", "outpoint"),
        ])
        .unwrap();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.params().coinbase_maturity, 256);
        assert_eq!(cfg.seed_index, 7);
        assert_eq!(cfg.rpc_endpoint.as_deref(), Some("ws://127.0.0.1:19556"));
        assert_eq!(cfg.rpc_connect_attempts, 3);
        assert_eq!(cfg.log_format, "json");
        assert_eq!(cfg.selection_order, SelectionOrder::ByOutpoint);
        assert_eq!(cfg.wallet_config().sync_poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("MEMWALLET_NETWORK", "moonnet")]).is_err());
        assert!(load(&[("MEMWALLET_SEED_INDEX", "-1")]).is_err());
        assert!(load(&[("MEMWALLET_RPC_CONNECT_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("MEMWALLET_SELECTION_ORDER", "random")]).is_err());
    }

    #[test]
    fn seed_index_selects_seed() {
        let a = load(&[("MEMWALLET_SEED_INDEX", "1")]).unwrap().wallet_config();
        let b = load(&[("MEMWALLET_SEED_INDEX", "1")]).unwrap().wallet_config();
        assert_eq!(a.seed.as_bytes(), b.seed.as_bytes());
    }
}
