//! Transaction assembly and signing.
//!
//! 1. Add outputs
//! 2. Fund them from a set of candidate outputs ([`TransactionBuilder::fund`])
//! 3. Build the unsigned transaction, appending change if any
//! 4. Sign every input with the key that owns the spent output

use memwallet_core::address::Address;
use memwallet_core::script::signature_script;
use memwallet_core::types::{OutPoint, Transaction, TxInput, TxOutput};

use crate::coin_selection::{CoinSelection, CoinSelector};
use crate::error::WalletError;
use crate::keys::KeyChain;
use crate::ledger::Utxo;

pub struct TransactionBuilder {
    outputs: Vec<TxOutput>,
    fee_rate: u64,
    lock_time: u64,
}

impl TransactionBuilder {
    /// A builder charging `fee_rate` atoms per serialized byte.
    pub fn new(fee_rate: u64) -> Self {
        Self {
            outputs: Vec::new(),
            fee_rate,
            lock_time: 0,
        }
    }

    pub fn add_output(&mut self, output: TxOutput) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn add_payment(&mut self, address: &Address, amount: u64) -> &mut Self {
        self.add_output(TxOutput {
            value: amount,
            script: address.script(),
        })
    }

    pub fn set_lock_time(&mut self, lock_time: u64) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Run coin selection over `candidates` for the current outputs.
    pub fn fund(
        &self,
        candidates: impl IntoIterator<Item = (OutPoint, Utxo)>,
    ) -> Result<CoinSelection, WalletError> {
        CoinSelector::select(candidates, &self.outputs, self.fee_rate)
    }

    /// Assemble the unsigned transaction.
    ///
    /// `change_script` receives `selection.change` as a final output when
    /// the change is non-zero. The fee is not recomputed for that output.
    pub fn build(&self, selection: &CoinSelection, change_script: Option<Vec<u8>>) -> Transaction {
        let mut tx = Transaction::new();
        tx.lock_time = self.lock_time;
        tx.inputs = selection
            .selected
            .iter()
            .map(|(outpoint, _)| TxInput::unsigned(*outpoint))
            .collect();
        tx.outputs = self.outputs.clone();
        if let Some(script) = change_script.filter(|_| selection.change > 0) {
            tx.outputs.push(TxOutput {
                value: selection.change,
                script,
            });
        }
        tx
    }

    /// Sign every input of `tx`. Input `i` must spend `selection.selected[i]`.
    pub fn sign(
        mut tx: Transaction,
        selection: &CoinSelection,
        keychain: &KeyChain,
    ) -> Result<Transaction, WalletError> {
        let mut scripts = Vec::with_capacity(selection.selected.len());
        for (i, (_, utxo)) in selection.selected.iter().enumerate() {
            let kp = keychain.keypair(utxo.owner_index)?;
            scripts.push(signature_script(&tx, i, &utxo.script, kp)?);
        }
        for (input, script) in tx.inputs.iter_mut().zip(scripts) {
            input.signature_script = script;
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwallet_core::address::Network;
    use memwallet_core::constants::COIN;
    use memwallet_core::script::verify_input;
    use memwallet_core::types::Hash256;

    use crate::keys::Seed;

    fn owned(kc: &mut KeyChain, n: u8, value: u64) -> (OutPoint, Utxo) {
        let (index, addr) = kc.next_address().unwrap();
        (
            OutPoint { txid: Hash256([n; 32]), index: 0 },
            Utxo {
                value,
                owner_index: index,
                maturity_height: 0,
                locked: false,
                script: addr.script(),
            },
        )
    }

    #[test]
    fn build_appends_change() {
        let mut kc = KeyChain::new(&Seed::from_bytes([1; 32]), Network::Simnet);
        let dest = Address::from_pubkey_hash(Hash256([9; 32]), Network::Simnet);
        let mut builder = TransactionBuilder::new(10);
        builder.add_payment(&dest, COIN);

        let sel = builder.fund(vec![owned(&mut kc, 1, 3 * COIN)]).unwrap();
        let tx = builder.build(&sel, Some(vec![0xCC; 37]));
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].value, sel.change);
        assert_eq!(tx.inputs.len(), 1);
        assert!(tx.inputs[0].signature_script.is_empty());
    }

    #[test]
    fn build_omits_zero_change() {
        let builder = TransactionBuilder::new(0);
        let sel = CoinSelection { selected: vec![], total: 5, fee: 0, change: 0 };
        let tx = builder.build(&sel, Some(vec![1]));
        assert!(tx.outputs.is_empty());
    }

    #[test]
    fn signed_inputs_verify() {
        let mut kc = KeyChain::new(&Seed::from_bytes([2; 32]), Network::Simnet);
        let dest = Address::from_pubkey_hash(Hash256([8; 32]), Network::Simnet);
        let mut builder = TransactionBuilder::new(10);
        builder.add_payment(&dest, 4 * COIN);

        let cands = vec![owned(&mut kc, 1, 2 * COIN), owned(&mut kc, 2, 3 * COIN)];
        let sel = builder.fund(cands).unwrap();
        assert_eq!(sel.selected.len(), 2);
        let tx = TransactionBuilder::sign(builder.build(&sel, None), &sel, &kc).unwrap();

        for (i, (_, utxo)) in sel.selected.iter().enumerate() {
            verify_input(&tx, i, &utxo.script).unwrap();
        }
    }

    #[test]
    fn sign_fails_for_unknown_owner() {
        let kc = KeyChain::new(&Seed::from_bytes([3; 32]), Network::Simnet);
        let (op, mut utxo) = {
            let mut other = KeyChain::new(&Seed::from_bytes([4; 32]), Network::Simnet);
            owned(&mut other, 1, COIN)
        };
        utxo.owner_index = 40;
        let sel = CoinSelection { selected: vec![(op, utxo)], total: COIN, fee: 0, change: 0 };
        let tx = TransactionBuilder::new(0).build(&sel, None);
        assert_eq!(
            TransactionBuilder::sign(tx, &sel, &kc),
            Err(WalletError::KeyNotFound(40))
        );
    }
}
