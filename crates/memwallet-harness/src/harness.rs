//! Node, wallet and resource registry bundled for one test.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use memwallet::{NodeClient, Wallet};

use crate::config::HarnessConfig;
use crate::disposable::{DisposableRegistry, DisposeGuard};
use crate::rpc::RpcNodeClient;
use crate::scratch::ScratchDir;
use crate::sim::SimNode;

/// Everything a test needs to drive a shadow wallet.
///
/// All resources are registered with [`Harness::registry`] and released on
/// [`Harness::dispose`], on drop, or when a malfunction is reported.
pub struct Harness {
    registry: Arc<DisposableRegistry>,
    node: Arc<dyn NodeClient>,
    sim: Option<Arc<SimNode>>,
    wallet: Arc<Wallet>,
    scratch: Arc<ScratchDir>,
    guards: Vec<DisposeGuard>,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("simulated", &self.sim.is_some())
            .field("wallet", &self.wallet)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Harness {
    /// Start a harness against a fresh simulated node, or against the
    /// external node named by `rpc_endpoint`.
    pub async fn launch(config: &HarnessConfig) -> Result<Self> {
        let registry = DisposableRegistry::new();
        let mut guards = Vec::new();

        let scratch = Arc::new(
            ScratchDir::new(&format!("memwallet-{}-", config.seed_index))
                .context("harness scratch directory")?,
        );
        guards.push(registry.register(scratch.clone()));

        let (node, sim): (Arc<dyn NodeClient>, Option<Arc<SimNode>>) = match &config.rpc_endpoint {
            Some(endpoint) => {
                let client = RpcNodeClient::connect_or_report(
                    endpoint,
                    config.rpc_connect_attempts,
                    registry.as_ref(),
                )
                .await;
                (Arc::new(client), None)
            }
            None => {
                let sim = Arc::new(SimNode::new(config.params()));
                guards.push(registry.register(sim.clone()));
                (sim.clone(), Some(sim))
            }
        };

        let wallet = Wallet::launch(config.wallet_config(), node.clone(), registry.clone())
            .await
            .context("launching wallet")?;
        let wallet = Arc::new(wallet);
        guards.push(registry.register(wallet.clone()));

        info!(
            network = %config.network,
            seed_index = config.seed_index,
            simulated = sim.is_some(),
            scratch = %scratch.path().display(),
            "harness ready"
        );
        Ok(Self {
            registry,
            node,
            sim,
            wallet,
            scratch,
            guards,
        })
    }

    /// Harness against a simulated node with default settings.
    pub async fn simulated() -> Result<Self> {
        Self::launch(&HarnessConfig::default()).await
    }

    pub fn wallet(&self) -> &Arc<Wallet> {
        &self.wallet
    }

    pub fn node(&self) -> &Arc<dyn NodeClient> {
        &self.node
    }

    /// The simulated node, if this harness runs one.
    pub fn sim(&self) -> Option<&Arc<SimNode>> {
        self.sim.as_ref()
    }

    pub fn registry(&self) -> &Arc<DisposableRegistry> {
        &self.registry
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    fn require_sim(&self) -> Result<&Arc<SimNode>> {
        self.sim
            .as_ref()
            .ok_or_else(|| anyhow!("operation needs the simulated node"))
    }

    /// Mine `coinbase_maturity + n` blocks to the wallet's coinbase address
    /// and sync, leaving `n` spendable coinbase outputs.
    pub async fn with_mature_outputs(&self, n: u64) -> Result<u64> {
        let sim = self.require_sim()?;
        let blocks = sim.params().coinbase_maturity + n;
        sim.mine_to(&self.wallet.coinbase_address(), blocks)
            .context("mining mature outputs")?;
        let height = self.wallet.sync().await.context("syncing wallet")?;
        info!(height, spendable = n, balance = self.wallet.confirmed_balance(), "mature outputs ready");
        Ok(height)
    }

    /// Mine `n` blocks to the node's own address and sync the wallet.
    pub async fn mine_and_sync(&self, n: u64) -> Result<u64> {
        self.require_sim()?
            .mine_blocks(n)
            .context("mining blocks")?;
        Ok(self.wallet.sync().await?)
    }

    /// Release every registered resource, newest first. Idempotent.
    pub fn dispose(&mut self) {
        self.registry.dispose_all();
        self.guards.clear();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.dispose();
    }
}
