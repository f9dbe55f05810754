//! The set of unspent outputs owned by the wallet.
//!
//! Keyed by outpoint. An output is spendable when it is unlocked and its
//! maturity height has been reached; locked or immature outputs stay in
//! the ledger but count toward neither balance nor coin selection.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use memwallet_core::types::OutPoint;

/// An output owned by one of the wallet's keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    /// Value in atoms.
    pub value: u64,
    /// KeyChain index of the owning key.
    pub owner_index: u32,
    /// First height at which the output may be spent. 0 for non-coinbase.
    pub maturity_height: u64,
    /// Reserved by a built but unconfirmed transaction.
    pub locked: bool,
    /// Locking script of the output.
    pub script: Vec<u8>,
}

impl Utxo {
    pub fn is_spendable(&self, height: u64) -> bool {
        !self.locked && self.maturity_height <= height
    }
}

#[derive(Debug, Default, Clone)]
pub struct UtxoLedger {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an output, returning the entry it replaced, if any.
    pub fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Option<Utxo> {
        self.utxos.insert(outpoint, utxo)
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Spendable outputs at `height`, in hash-map iteration order.
    pub fn spendable(&self, height: u64) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter().filter(move |(_, u)| u.is_spendable(height))
    }

    /// Sum of spendable values at `height`.
    pub fn balance(&self, height: u64) -> u64 {
        self.spendable(height)
            .fold(0u64, |acc, (_, u)| acc.saturating_add(u.value))
    }

    /// Mark an output as reserved. Returns false if it is not tracked.
    pub fn lock(&mut self, outpoint: &OutPoint) -> bool {
        match self.utxos.get_mut(outpoint) {
            Some(utxo) => {
                utxo.locked = true;
                true
            }
            None => false,
        }
    }

    /// Clear the reservation on an output. Returns false if it is not tracked.
    pub fn unlock(&mut self, outpoint: &OutPoint) -> bool {
        match self.utxos.get_mut(outpoint) {
            Some(utxo) => {
                utxo.locked = false;
                true
            }
            None => false,
        }
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.utxos.keys().copied().collect()
    }

    /// Ordered copy of the whole ledger.
    pub fn snapshot(&self) -> BTreeMap<OutPoint, Utxo> {
        self.utxos.iter().map(|(op, u)| (*op, u.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwallet_core::types::Hash256;

    fn op(n: u8) -> OutPoint {
        OutPoint { txid: Hash256([n; 32]), index: 0 }
    }

    fn utxo(value: u64, maturity_height: u64) -> Utxo {
        Utxo {
            value,
            owner_index: 0,
            maturity_height,
            locked: false,
            script: vec![],
        }
    }

    #[test]
    fn immature_outputs_excluded_from_balance() {
        let mut ledger = UtxoLedger::new();
        ledger.insert(op(1), utxo(300, 17));
        ledger.insert(op(2), utxo(5, 0));
        assert_eq!(ledger.balance(16), 5);
        assert_eq!(ledger.balance(17), 305);
    }

    #[test]
    fn locked_outputs_excluded_regardless_of_maturity() {
        let mut ledger = UtxoLedger::new();
        ledger.insert(op(1), utxo(100, 0));
        assert!(ledger.lock(&op(1)));
        assert_eq!(ledger.balance(u64::MAX), 0);
        assert_eq!(ledger.spendable(u64::MAX).count(), 0);
        assert!(ledger.unlock(&op(1)));
        assert_eq!(ledger.balance(0), 100);
    }

    #[test]
    fn lock_unknown_outpoint_reports_false() {
        let mut ledger = UtxoLedger::new();
        assert!(!ledger.lock(&op(9)));
        assert!(!ledger.unlock(&op(9)));
    }

    #[test]
    fn snapshot_is_ordered() {
        let mut ledger = UtxoLedger::new();
        ledger.insert(op(3), utxo(3, 0));
        ledger.insert(op(1), utxo(1, 0));
        let keys: Vec<_> = ledger.snapshot().into_keys().collect();
        assert_eq!(keys, vec![op(1), op(3)]);
    }
}
