//! Wallet state applied as one unit: keychain, ledger, journal and height.
//!
//! Callers hold this behind a single `RwLock`. Only the sync engine calls
//! [`WalletState::connect`] and [`WalletState::disconnect`].

use std::collections::BTreeMap;

use tracing::{debug, warn};

use memwallet_core::params::NetworkParams;
use memwallet_core::types::{OutPoint, Transaction};

use crate::error::WalletError;
use crate::journal::{ReorgJournal, UndoEntry};
use crate::keys::{KeyChain, Seed};
use crate::ledger::{Utxo, UtxoLedger};

/// Counts reported after applying a connect or disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub created: usize,
    pub destroyed: usize,
}

#[derive(Debug)]
pub struct WalletState {
    pub keychain: KeyChain,
    pub ledger: UtxoLedger,
    pub journal: ReorgJournal,
    /// Height of the last applied update.
    pub current_height: u64,
    pub params: NetworkParams,
}

impl WalletState {
    pub fn new(seed: &Seed, params: NetworkParams) -> Self {
        Self {
            keychain: KeyChain::new(seed, params.network),
            ledger: UtxoLedger::new(),
            journal: ReorgJournal::new(),
            current_height: 0,
            params,
        }
    }

    /// Apply the wallet-relevant transactions of the block at `height`.
    ///
    /// Per transaction, owned outputs are added first, then tracked outputs
    /// spent by its inputs are removed. An output both created and spent
    /// within the block leaves no trace in the undo entry.
    pub fn connect(
        &mut self,
        height: u64,
        txs: &[Transaction],
    ) -> Result<ApplyResult, WalletError> {
        let mut undo = UndoEntry::default();

        for tx in txs {
            let txid = tx.txid()?;
            let coinbase = tx.is_coinbase();

            for (index, output) in tx.outputs.iter().enumerate() {
                let Some(owner_index) = self.keychain.owner_of(&output.script) else {
                    continue;
                };
                let outpoint = OutPoint { txid, index: index as u32 };
                let maturity_height = if coinbase {
                    self.params.maturity_height(height)
                } else {
                    0
                };
                self.ledger.insert(
                    outpoint,
                    Utxo {
                        value: output.value,
                        owner_index,
                        maturity_height,
                        locked: false,
                        script: output.script.clone(),
                    },
                );
                undo.created.insert(outpoint);
            }

            if coinbase {
                continue;
            }
            for input in &tx.inputs {
                let spent = input.previous_output;
                let Some(utxo) = self.ledger.remove(&spent) else {
                    continue;
                };
                if !undo.created.remove(&spent) {
                    undo.destroyed.insert(spent, utxo);
                }
            }
        }

        let result = ApplyResult {
            created: undo.created.len(),
            destroyed: undo.destroyed.len(),
        };
        if self.journal.record(height, undo).is_some() {
            warn!(height, "height connected twice; earlier undo entry replaced");
        }
        self.current_height = height;
        debug!(height, created = result.created, destroyed = result.destroyed, "applied connect");
        Ok(result)
    }

    /// Revert exactly what the connect at `height` did.
    pub fn disconnect(&mut self, height: u64) -> Result<ApplyResult, WalletError> {
        let undo = self
            .journal
            .take(height)
            .ok_or(WalletError::MissingUndo { height })?;

        let result = ApplyResult {
            created: undo.created.len(),
            destroyed: undo.destroyed.len(),
        };
        for outpoint in &undo.created {
            self.ledger.remove(outpoint);
        }
        for (outpoint, utxo) in undo.destroyed {
            self.ledger.insert(outpoint, utxo);
        }
        self.current_height = height.saturating_sub(1);
        debug!(height, removed = result.created, restored = result.destroyed, "applied disconnect");
        Ok(result)
    }

    pub fn confirmed_balance(&self) -> u64 {
        self.ledger.balance(self.current_height)
    }

    /// Spendable outputs at the current height.
    pub fn spendable(&self) -> Vec<(OutPoint, Utxo)> {
        self.ledger
            .spendable(self.current_height)
            .map(|(op, u)| (*op, u.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<OutPoint, Utxo> {
        self.ledger.snapshot()
    }
}
