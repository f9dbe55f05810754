//! Greedy coin selection with a linear per-byte fee.
//!
//! Candidates are taken in the order supplied. After each addition the fee
//! is recomputed from the serialized size of the draft transaction plus one
//! worst-case unlocking script per input, and selection stops as soon as
//! `selected - fee >= target`. Every candidate is accumulated, including
//! ones worth less than the fee their own input adds.

use memwallet_core::script::MAX_SIGNATURE_SCRIPT_SIZE;
use memwallet_core::types::{OutPoint, Transaction, TxInput, TxOutput};

use crate::error::WalletError;
use crate::ledger::Utxo;

/// Result of coin selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub selected: Vec<(OutPoint, Utxo)>,
    /// Total value of `selected`.
    pub total: u64,
    /// Fee for the transaction without a change output.
    pub fee: u64,
    /// `total - target - fee`.
    pub change: u64,
}

pub struct CoinSelector;

impl CoinSelector {
    /// Select inputs paying for `outputs` at `fee_rate` atoms per byte.
    pub fn select(
        candidates: impl IntoIterator<Item = (OutPoint, Utxo)>,
        outputs: &[TxOutput],
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let target = Self::target(outputs)?;

        let mut draft = Transaction::new();
        draft.outputs = outputs.to_vec();

        let mut selected = Vec::new();
        let mut total = 0u64;
        let mut fee = Self::fee(&draft, fee_rate)?;

        for (outpoint, utxo) in candidates {
            draft.inputs.push(TxInput::unsigned(outpoint));
            fee = Self::fee(&draft, fee_rate)?;
            total = total.saturating_add(utxo.value);
            selected.push((outpoint, utxo));

            if total >= target.saturating_add(fee) {
                return Ok(CoinSelection {
                    selected,
                    total,
                    fee,
                    change: total - target - fee,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: total,
            need: target.saturating_add(fee),
        })
    }

    fn target(outputs: &[TxOutput]) -> Result<u64, WalletError> {
        if outputs.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        outputs.iter().enumerate().try_fold(0u64, |acc, (i, out)| {
            if out.value == 0 {
                return Err(WalletError::InvalidAmount(format!("output {i} has zero value")));
            }
            acc.checked_add(out.value)
                .ok_or_else(|| WalletError::InvalidAmount("total output value overflows".into()))
        })
    }

    /// Fee for `draft` once every input carries an unlocking script.
    pub fn fee(draft: &Transaction, fee_rate: u64) -> Result<u64, WalletError> {
        let size = draft.serialized_size()? + draft.inputs.len() * MAX_SIGNATURE_SCRIPT_SIZE;
        Ok((size as u64).saturating_mul(fee_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwallet_core::constants::COIN;
    use memwallet_core::types::Hash256;
    use proptest::prelude::*;

    fn candidate(n: u8, value: u64) -> (OutPoint, Utxo) {
        (
            OutPoint { txid: Hash256([n; 32]), index: 0 },
            Utxo {
                value,
                owner_index: 1,
                maturity_height: 0,
                locked: false,
                script: vec![0; 37],
            },
        )
    }

    fn pay(value: u64) -> Vec<TxOutput> {
        vec![TxOutput { value, script: vec![0; 37] }]
    }

    #[test]
    fn single_input_covers_target() {
        let sel = CoinSelector::select(vec![candidate(1, 10 * COIN)], &pay(COIN), 10).unwrap();
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.total, 10 * COIN);
        assert_eq!(sel.change, 10 * COIN - COIN - sel.fee);
    }

    #[test]
    fn stops_as_soon_as_target_met() {
        let cands = vec![candidate(1, 5 * COIN), candidate(2, 5 * COIN), candidate(3, 5 * COIN)];
        let sel = CoinSelector::select(cands, &pay(6 * COIN), 10).unwrap();
        assert_eq!(sel.selected.len(), 2);
    }

    #[test]
    fn fee_grows_with_inputs() {
        let one = CoinSelector::select(vec![candidate(1, 3 * COIN)], &pay(COIN), 10).unwrap();
        let two = CoinSelector::select(
            vec![candidate(1, COIN / 2), candidate(2, 3 * COIN)],
            &pay(COIN),
            10,
        )
        .unwrap();
        assert!(two.fee > one.fee);
    }

    #[test]
    fn fee_counts_signature_scripts() {
        let mut draft = Transaction::new();
        draft.outputs = pay(COIN);
        draft.inputs.push(TxInput::unsigned(OutPoint { txid: Hash256([1; 32]), index: 0 }));
        let estimated = CoinSelector::fee(&draft, 1).unwrap();
        draft.inputs[0].signature_script = vec![0; MAX_SIGNATURE_SCRIPT_SIZE];
        assert_eq!(estimated, draft.serialized_size().unwrap() as u64);
    }

    #[test]
    fn exact_amount_has_no_change() {
        let mut draft = Transaction::new();
        draft.outputs = pay(COIN);
        draft.inputs.push(TxInput::unsigned(OutPoint { txid: Hash256([1; 32]), index: 0 }));
        let fee = CoinSelector::fee(&draft, 10).unwrap();
        let sel = CoinSelector::select(vec![candidate(1, COIN + fee)], &pay(COIN), 10).unwrap();
        assert_eq!(sel.change, 0);
    }

    #[test]
    fn insufficient_reports_have_and_need() {
        let err = CoinSelector::select(vec![candidate(1, COIN)], &pay(2 * COIN), 10).unwrap_err();
        match err {
            WalletError::InsufficientFunds { have, need } => {
                assert_eq!(have, COIN);
                assert!(need > 2 * COIN);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_candidates_insufficient() {
        assert!(matches!(
            CoinSelector::select(Vec::new(), &pay(1), 1),
            Err(WalletError::InsufficientFunds { have: 0, .. })
        ));
    }

    #[test]
    fn dust_inputs_are_still_accumulated() {
        let cands = vec![candidate(1, 100), candidate(2, 5 * COIN)];
        let sel = CoinSelector::select(cands, &pay(COIN), 10).unwrap();
        assert_eq!(sel.selected.len(), 2);
        assert_eq!(sel.total, 5 * COIN + 100);
        assert_eq!(sel.change, sel.total - COIN - sel.fee);
    }

    #[test]
    fn rejects_bad_outputs() {
        assert_eq!(
            CoinSelector::select(vec![candidate(1, COIN)], &[], 1),
            Err(WalletError::NoOutputs)
        );
        assert!(matches!(
            CoinSelector::select(vec![candidate(1, COIN)], &pay(0), 1),
            Err(WalletError::InvalidAmount(_))
        ));
        let overflow = vec![
            TxOutput { value: u64::MAX, script: vec![] },
            TxOutput { value: 1, script: vec![] },
        ];
        assert!(matches!(
            CoinSelector::select(vec![candidate(1, COIN)], &overflow, 1),
            Err(WalletError::InvalidAmount(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn selection_covers_target_or_total_is_short(
            values in proptest::collection::vec(10_000u64..50 * COIN, 0..12),
            target in 1u64..200 * COIN,
            rate in 0u64..50,
        ) {
            let cands: Vec<_> = values.iter().enumerate()
                .map(|(i, v)| candidate(i as u8, *v))
                .collect();
            match CoinSelector::select(cands, &pay(target), rate) {
                Ok(sel) => {
                    prop_assert!(sel.total - sel.fee >= target);
                    prop_assert_eq!(sel.total, sel.selected.iter().map(|(_, u)| u.value).sum::<u64>());
                    prop_assert_eq!(sel.change, sel.total - target - sel.fee);
                }
                Err(WalletError::InsufficientFunds { have, need }) => {
                    prop_assert_eq!(have, values.iter().sum::<u64>());
                    prop_assert!(have < need);
                }
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
