//! In-process simulated node.
//!
//! Keeps a chain of blocks, a UTXO set with per-block undo data and a
//! mempool. Blocks are mined on demand. Connect and disconnect
//! notifications go to every subscribed [`ChainFeed`] as encoded header and
//! transaction bytes, with transactions filtered the way a real node's
//! transaction filter would: a transaction is delivered when it spends a
//! watched outpoint or pays a script that carries a watched pubkey hash.
//! Matching outputs are added to the watched outpoints.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use memwallet::{ChainFeed, NodeClient, NodeError};
use memwallet_core::address::Address;
use memwallet_core::constants::{BLOCK_VERSION, HIGH_FEE_RATE, TX_VERSION};
use memwallet_core::crypto::KeyPair;
use memwallet_core::error::{ScriptError, TransactionError};
use memwallet_core::params::NetworkParams;
use memwallet_core::script::{script_contains_hash, verify_input};
use memwallet_core::types::{
    merkle_root, Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};

use crate::disposable::Disposable;

/// Timestamp of the genesis block; each block adds one minute.
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_INTERVAL_SECS: u64 = 60;
const MINER_SECRET: [u8; 32] = [0x4d; 32];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("coinbase transactions cannot be broadcast")]
    CoinbaseBroadcast,
    #[error("transaction has no inputs or no outputs")]
    Empty,
    #[error("transaction {0} already in mempool")]
    AlreadyKnown(Hash256),
    #[error("input {0} is unknown or already spent")]
    MissingInput(OutPoint),
    #[error("input {0} is already spent by a mempool transaction")]
    DoubleSpend(OutPoint),
    #[error("input {outpoint} is an immature coinbase output (spendable at height {spendable_at})")]
    ImmatureCoinbase { outpoint: OutPoint, spendable_at: u64 },
    #[error("input {index}: {source}")]
    Script { index: usize, source: ScriptError },
    #[error("outputs ({outputs}) exceed inputs ({inputs})")]
    Overspend { inputs: u64, outputs: u64 },
    #[error("fee {fee} exceeds ceiling {ceiling}")]
    HighFee { fee: u64, ceiling: u64 },
    #[error("cannot disconnect the genesis block")]
    Genesis,
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

#[derive(Debug, Clone)]
struct Coin {
    output: TxOutput,
    height: u64,
    coinbase: bool,
}

#[derive(Debug)]
struct ConnectedBlock {
    block: Block,
    hash: Hash256,
    /// Outputs this block spent, for disconnect.
    spent: Vec<(OutPoint, Coin)>,
}

#[derive(Debug)]
struct PoolEntry {
    txid: Hash256,
    tx: Transaction,
    fee: u64,
}

#[derive(Debug, Default)]
struct TxFilter {
    pubkey_hashes: HashSet<Hash256>,
    outpoints: HashSet<OutPoint>,
}

impl TxFilter {
    /// True if `tx` is relevant. Matching outputs start being watched.
    fn matches(&mut self, txid: Hash256, tx: &Transaction) -> bool {
        let mut relevant = tx
            .inputs
            .iter()
            .any(|input| self.outpoints.contains(&input.previous_output));
        for (index, output) in tx.outputs.iter().enumerate() {
            if self
                .pubkey_hashes
                .iter()
                .any(|pkh| script_contains_hash(&output.script, pkh))
            {
                self.outpoints.insert(OutPoint { txid, index: index as u32 });
                relevant = true;
            }
        }
        relevant
    }
}

#[derive(Debug)]
struct Chain {
    blocks: Vec<ConnectedBlock>,
    utxos: HashMap<OutPoint, Coin>,
    mempool: Vec<PoolEntry>,
    filter: TxFilter,
    subscribers: Vec<ChainFeed>,
    /// Mixed into coinbases and headers so a replacement block differs
    /// from the one it replaces.
    nonce: u64,
}

impl Chain {
    fn tip(&self) -> &ConnectedBlock {
        // The genesis block is never removed.
        &self.blocks[self.blocks.len() - 1]
    }

    fn tip_height(&self) -> u64 {
        self.tip().block.height()
    }

    fn spent_in_mempool(&self, outpoint: &OutPoint) -> bool {
        self.mempool
            .iter()
            .any(|e| e.tx.inputs.iter().any(|i| i.previous_output == *outpoint))
    }

    /// Apply `block` to the UTXO set and append it.
    fn connect(&mut self, block: Block) -> Result<Hash256, SimError> {
        let height = block.height();
        let mut spent = Vec::new();
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if let Some(coin) = self.utxos.remove(&input.previous_output) {
                        spent.push((input.previous_output, coin));
                    }
                }
            }
            let txid = tx.txid()?;
            for (index, output) in tx.outputs.iter().enumerate() {
                let coin = Coin {
                    output: output.clone(),
                    height,
                    coinbase: tx.is_coinbase(),
                };
                self.utxos.insert(OutPoint { txid, index: index as u32 }, coin);
            }
        }
        let hash = block.header.hash();
        self.blocks.push(ConnectedBlock { block, hash, spent });
        Ok(hash)
    }

    fn notify_connected(&mut self, block: &Block) -> Result<(), SimError> {
        let header = block.header.to_bytes();
        let mut txs = Vec::new();
        for tx in &block.transactions {
            if self.filter.matches(tx.txid()?, tx) {
                txs.push(tx.to_bytes()?);
            }
        }
        for feed in &self.subscribers {
            feed.on_block_connected(&header, &txs);
        }
        Ok(())
    }
}

/// A node simulated in memory, mining only when asked.
pub struct SimNode {
    params: NetworkParams,
    miner: KeyPair,
    chain: Mutex<Chain>,
}

impl std::fmt::Debug for SimNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.chain.lock();
        f.debug_struct("SimNode")
            .field("network", &self.params.network)
            .field("tip_height", &chain.tip_height())
            .field("mempool", &chain.mempool.len())
            .finish()
    }
}

impl SimNode {
    /// A chain holding only its genesis block.
    pub fn new(params: NetworkParams) -> Self {
        let miner = KeyPair::from_secret_bytes(MINER_SECRET);
        let mut chain = Chain {
            blocks: Vec::new(),
            utxos: HashMap::new(),
            mempool: Vec::new(),
            filter: TxFilter::default(),
            subscribers: Vec::new(),
            nonce: 0,
        };
        let miner_script = Address::from_public_key(&miner.public_key(), params.network).script();
        let coinbase = coinbase_tx(0, 0, params.block_reward, miner_script);
        let genesis = assemble(Hash256::ZERO, 0, 0, vec![coinbase]);
        // The genesis coinbase has fixed-width fields only.
        if let Ok(genesis) = genesis {
            let _ = chain.connect(genesis);
        }
        Self {
            params,
            miner,
            chain: Mutex::new(chain),
        }
    }

    pub fn params(&self) -> NetworkParams {
        self.params
    }

    /// Address paid by blocks mined without an explicit recipient.
    pub fn miner_address(&self) -> Address {
        Address::from_public_key(&self.miner.public_key(), self.params.network)
    }

    pub fn tip_height(&self) -> u64 {
        self.chain.lock().tip_height()
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.chain.lock().tip().hash
    }

    pub fn mempool_len(&self) -> usize {
        self.chain.lock().mempool.len()
    }

    /// True if the transaction is waiting in the mempool.
    pub fn in_mempool(&self, txid: &Hash256) -> bool {
        self.chain.lock().mempool.iter().any(|e| e.txid == *txid)
    }

    /// Value of unspent outputs paying exactly `script`.
    pub fn balance_of_script(&self, script: &[u8]) -> u64 {
        self.chain
            .lock()
            .utxos
            .values()
            .filter(|c| c.output.script == script)
            .map(|c| c.output.value)
            .sum()
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.chain.lock().utxos.contains_key(outpoint)
    }

    /// Mine one block paying the miner.
    pub fn mine_block(&self) -> Result<Hash256, SimError> {
        self.mine_to(&self.miner_address(), 1)?
            .pop()
            .ok_or(SimError::Empty)
    }

    /// Mine `n` blocks paying the miner.
    pub fn mine_blocks(&self, n: u64) -> Result<Vec<Hash256>, SimError> {
        self.mine_to(&self.miner_address(), n)
    }

    /// Mine `n` blocks whose coinbases pay `address`. The first block
    /// takes the whole mempool.
    pub fn mine_to(&self, address: &Address, n: u64) -> Result<Vec<Hash256>, SimError> {
        let script = address.script();
        let mut chain = self.chain.lock();
        let mut hashes = Vec::new();
        for _ in 0..n {
            let height = chain.tip_height() + 1;
            let pool = std::mem::take(&mut chain.mempool);
            let fees = pool.iter().fold(0u64, |acc, e| acc.saturating_add(e.fee));
            let reward = self.params.block_reward.saturating_add(fees);

            let mut txs = vec![coinbase_tx(height, chain.nonce, reward, script.clone())];
            txs.extend(pool.into_iter().map(|e| e.tx));
            let prev_hash = chain.tip().hash;
            let block = assemble(prev_hash, height, chain.nonce, txs)?;

            let hash = chain.connect(block.clone())?;
            debug!(height, %hash, txs = block.transactions.len(), "mined block");
            chain.notify_connected(&block)?;
            hashes.push(hash);
        }
        Ok(hashes)
    }

    /// Remove the tip block. Its transactions other than the coinbase go
    /// back to the mempool.
    pub fn disconnect_tip(&self) -> Result<Hash256, SimError> {
        let mut chain = self.chain.lock();
        if chain.blocks.len() <= 1 {
            return Err(SimError::Genesis);
        }
        let Some(tip) = chain.blocks.pop() else {
            return Err(SimError::Genesis);
        };

        for tx in &tip.block.transactions {
            let txid = tx.txid()?;
            for index in 0..tx.outputs.len() {
                chain.utxos.remove(&OutPoint { txid, index: index as u32 });
            }
        }
        for (outpoint, coin) in tip.spent {
            chain.utxos.insert(outpoint, coin);
        }

        let mut returned = Vec::new();
        for tx in tip.block.transactions.into_iter().filter(|tx| !tx.is_coinbase()) {
            let fee = input_value(&chain.utxos, &tx)
                .saturating_sub(tx.total_output_value().unwrap_or(u64::MAX));
            returned.push(PoolEntry { txid: tx.txid()?, tx, fee });
        }
        returned.append(&mut chain.mempool);
        chain.mempool = returned;

        let header = tip.block.header.to_bytes();
        for feed in &chain.subscribers {
            feed.on_block_disconnected(&header);
        }
        info!(height = tip.block.header.height, hash = %tip.hash, "disconnected tip");
        Ok(tip.hash)
    }

    /// Replace the top `depth` blocks with `new_blocks` freshly mined ones.
    pub fn reorg(&self, depth: u64, new_blocks: u64) -> Result<Vec<Hash256>, SimError> {
        for _ in 0..depth {
            self.disconnect_tip()?;
        }
        self.chain.lock().nonce += 1;
        self.mine_blocks(new_blocks)
    }

    /// Validate `tx` against the chain and mempool and return its id and fee.
    fn check(&self, chain: &Chain, tx: &Transaction, allow_high_fees: bool) -> Result<(Hash256, u64), SimError> {
        if tx.is_coinbase() {
            return Err(SimError::CoinbaseBroadcast);
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(SimError::Empty);
        }
        let txid = tx.txid()?;
        if chain.mempool.iter().any(|e| e.txid == txid) {
            return Err(SimError::AlreadyKnown(txid));
        }

        let tip = chain.tip_height();
        let mut inputs = 0u64;
        for (index, input) in tx.inputs.iter().enumerate() {
            let outpoint = input.previous_output;
            let coin = chain
                .utxos
                .get(&outpoint)
                .ok_or(SimError::MissingInput(outpoint))?;
            if chain.spent_in_mempool(&outpoint) {
                return Err(SimError::DoubleSpend(outpoint));
            }
            if coin.coinbase {
                let spendable_at = self.params.maturity_height(coin.height);
                if tip < spendable_at {
                    return Err(SimError::ImmatureCoinbase { outpoint, spendable_at });
                }
            }
            verify_input(tx, index, &coin.output.script)
                .map_err(|source| SimError::Script { index, source })?;
            inputs = inputs
                .checked_add(coin.output.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }

        let outputs = tx.total_output_value().ok_or(TransactionError::ValueOverflow)?;
        if outputs > inputs {
            return Err(SimError::Overspend { inputs, outputs });
        }
        let fee = inputs - outputs;
        let ceiling = HIGH_FEE_RATE.saturating_mul(tx.serialized_size()? as u64);
        if fee > ceiling && !allow_high_fees {
            return Err(SimError::HighFee { fee, ceiling });
        }
        Ok((txid, fee))
    }

    /// Validate and queue `tx` for the next block.
    pub fn submit(&self, tx: &Transaction, allow_high_fees: bool) -> Result<Hash256, SimError> {
        let mut chain = self.chain.lock();
        let (txid, fee) = self.check(&chain, tx, allow_high_fees)?;
        chain.mempool.push(PoolEntry {
            txid,
            tx: tx.clone(),
            fee,
        });
        debug!(%txid, fee, "accepted transaction");
        Ok(txid)
    }
}

fn input_value(utxos: &HashMap<OutPoint, Coin>, tx: &Transaction) -> u64 {
    tx.inputs
        .iter()
        .filter_map(|i| utxos.get(&i.previous_output))
        .fold(0u64, |acc, c| acc.saturating_add(c.output.value))
}

fn coinbase_tx(height: u64, nonce: u64, value: u64, script: Vec<u8>) -> Transaction {
    let mut marker = height.to_le_bytes().to_vec();
    marker.extend_from_slice(&nonce.to_le_bytes());
    Transaction {
        version: TX_VERSION,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature_script: marker,
        }],
        outputs: vec![TxOutput { value, script }],
        lock_time: height,
    }
}

fn assemble(
    prev_hash: Hash256,
    height: u64,
    nonce: u64,
    transactions: Vec<Transaction>,
) -> Result<Block, SimError> {
    let txids = transactions
        .iter()
        .map(Transaction::txid)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Block {
        header: BlockHeader {
            version: BLOCK_VERSION,
            prev_hash,
            merkle_root: merkle_root(&txids),
            timestamp: GENESIS_TIMESTAMP + height * BLOCK_INTERVAL_SECS,
            height,
            nonce,
        },
        transactions,
    })
}

#[async_trait]
impl NodeClient for SimNode {
    /// Subscribe `feed` and replay every block above genesis through the
    /// current filter, so a wallet launched late still catches up.
    async fn notify_blocks(&self, feed: ChainFeed) -> Result<(), NodeError> {
        let mut chain = self.chain.lock();
        let mut replay = Vec::new();
        for connected in chain.blocks.iter().skip(1) {
            let mut txs = Vec::new();
            for tx in &connected.block.transactions {
                txs.push((tx.txid().map_err(rejected)?, tx.clone()));
            }
            replay.push((connected.block.header.to_bytes(), txs));
        }
        for (header, txs) in replay {
            let mut matched = Vec::new();
            for (txid, tx) in txs {
                if chain.filter.matches(txid, &tx) {
                    matched.push(tx.to_bytes().map_err(rejected)?);
                }
            }
            feed.on_block_connected(&header, &matched);
        }
        chain.subscribers.push(feed);
        Ok(())
    }

    async fn load_tx_filter(
        &self,
        reload: bool,
        addresses: Vec<Address>,
        outpoints: Vec<OutPoint>,
    ) -> Result<(), NodeError> {
        let mut chain = self.chain.lock();
        if reload {
            chain.filter = TxFilter::default();
        }
        chain
            .filter
            .pubkey_hashes
            .extend(addresses.iter().map(Address::pubkey_hash));
        chain.filter.outpoints.extend(outpoints);
        Ok(())
    }

    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<Hash256, NodeError> {
        self.submit(tx, allow_high_fees).map_err(rejected)
    }

    async fn get_best_block(&self) -> Result<(Hash256, u64), NodeError> {
        let chain = self.chain.lock();
        let tip = chain.tip();
        Ok((tip.hash, tip.block.height()))
    }
}

fn rejected(e: impl std::fmt::Display) -> NodeError {
    NodeError::Rejected(e.to_string())
}

impl Disposable for SimNode {
    fn name(&self) -> String {
        format!("sim-node({})", self.params.name)
    }

    /// Drop every subscription. The chain itself stays readable.
    fn dispose(&self) {
        self.chain.lock().subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwallet_core::params::SIMNET;
    use memwallet_core::script::signature_script;

    fn spend(node: &SimNode, outpoint: OutPoint, prev: &TxOutput, pay: u64) -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::unsigned(outpoint));
        tx.outputs.push(TxOutput { value: pay, script: vec![0x51] });
        let sig = signature_script(&tx, 0, &prev.script, &node.miner).unwrap();
        tx.inputs[0].signature_script = sig;
        tx
    }

    fn mined_coinbase(node: &SimNode, height: u64) -> (OutPoint, TxOutput) {
        let chain = node.chain.lock();
        let tx = &chain.blocks[height as usize].block.transactions[0];
        (OutPoint { txid: tx.txid().unwrap(), index: 0 }, tx.outputs[0].clone())
    }

    #[test]
    fn starts_at_genesis() {
        let node = SimNode::new(SIMNET);
        assert_eq!(node.tip_height(), 0);
        assert_eq!(node.disconnect_tip(), Err(SimError::Genesis));
    }

    #[test]
    fn mining_extends_chain_and_pays_miner() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(3).unwrap();
        assert_eq!(node.tip_height(), 3);
        let script = node.miner_address().script();
        assert_eq!(node.balance_of_script(&script), 4 * SIMNET.block_reward);
    }

    #[test]
    fn immature_coinbase_is_rejected_then_accepted() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(1).unwrap();
        let (outpoint, prev) = mined_coinbase(&node, 1);
        let tx = spend(&node, outpoint, &prev, prev.value - 1_000);
        assert!(matches!(
            node.submit(&tx, false),
            Err(SimError::ImmatureCoinbase { spendable_at: 17, .. })
        ));

        node.mine_blocks(SIMNET.coinbase_maturity).unwrap();
        let txid = node.submit(&tx, false).unwrap();
        assert!(node.in_mempool(&txid));
        assert_eq!(node.submit(&tx, false), Err(SimError::AlreadyKnown(txid)));
    }

    #[test]
    fn rejects_bad_signature_and_high_fee() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(SIMNET.coinbase_maturity + 1).unwrap();
        let (outpoint, prev) = mined_coinbase(&node, 1);

        let mut forged = spend(&node, outpoint, &prev, 1_000);
        forged.outputs[0].value = 2_000;
        assert!(matches!(node.submit(&forged, true), Err(SimError::Script { index: 0, .. })));

        let greedy = spend(&node, outpoint, &prev, 1_000);
        assert!(matches!(node.submit(&greedy, false), Err(SimError::HighFee { .. })));
        assert!(node.submit(&greedy, true).is_ok());
    }

    #[test]
    fn mempool_double_spend_rejected() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(SIMNET.coinbase_maturity + 1).unwrap();
        let (outpoint, prev) = mined_coinbase(&node, 1);
        node.submit(&spend(&node, outpoint, &prev, prev.value - 1_000), false).unwrap();
        let second = spend(&node, outpoint, &prev, prev.value - 2_000);
        assert_eq!(node.submit(&second, false), Err(SimError::DoubleSpend(outpoint)));
    }

    #[test]
    fn disconnect_returns_transactions_to_mempool() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(SIMNET.coinbase_maturity + 1).unwrap();
        let (outpoint, prev) = mined_coinbase(&node, 1);
        node.submit(&spend(&node, outpoint, &prev, prev.value - 1_000), false).unwrap();
        node.mine_block().unwrap();
        assert_eq!(node.mempool_len(), 0);
        assert!(!node.is_unspent(&outpoint));

        node.disconnect_tip().unwrap();
        assert_eq!(node.mempool_len(), 1);
        assert!(node.is_unspent(&outpoint));
    }

    #[test]
    fn reorg_replaces_blocks() {
        let node = SimNode::new(SIMNET);
        node.mine_blocks(5).unwrap();
        let old_tip = node.tip_hash();
        node.reorg(2, 3).unwrap();
        assert_eq!(node.tip_height(), 6);
        assert_ne!(node.tip_hash(), old_tip);
    }

    #[test]
    fn filter_watches_matching_outputs() {
        let mut filter = TxFilter::default();
        let pkh = Hash256([7; 32]);
        filter.pubkey_hashes.insert(pkh);
        let mut tx = coinbase_tx(1, 0, 50, memwallet_core::script::pay_to_pubkey_hash(&pkh));
        tx.outputs.push(TxOutput { value: 1, script: vec![0x51] });
        let txid = tx.txid().unwrap();
        assert!(filter.matches(txid, &tx));
        assert!(filter.outpoints.contains(&OutPoint { txid, index: 0 }));
        assert!(!filter.outpoints.contains(&OutPoint { txid, index: 1 }));

        let mut spender = Transaction::new();
        spender.inputs.push(TxInput::unsigned(OutPoint { txid, index: 0 }));
        spender.outputs.push(TxOutput { value: 1, script: vec![0x51] });
        assert!(filter.matches(spender.txid().unwrap(), &spender));
    }
}
