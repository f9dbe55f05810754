//! Funding properties over real ledger contents.

use memwallet::{CoinSelector, TransactionBuilder, WalletError, WalletState};
use memwallet_core::constants::COIN;
use memwallet_core::script::verify_input;
use memwallet_core::types::TxOutput;
use memwallet_tests::helpers::*;
use proptest::prelude::*;

/// State holding one mature owned coinbase per value.
fn state_with(values: &[u64]) -> WalletState {
    let mut state = simnet_state(77);
    let script = state.keychain.coinbase_address().script();
    let txs: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let mut tx = coinbase(script.clone(), 1, value);
            tx.lock_time = i as u64;
            tx
        })
        .collect();
    state.connect(1, &txs).unwrap();
    state.connect(state.params.maturity_height(1), &[]).unwrap();
    state
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn funded_transactions_cover_outputs_and_fee(
        values in proptest::collection::vec(COIN / 100..20 * COIN, 1..10),
        amount in COIN / 10..60 * COIN,
        fee_rate in 1u64..200,
    ) {
        let state = state_with(&values);
        let outputs = vec![TxOutput { value: amount, script: foreign_script() }];
        let mut builder = TransactionBuilder::new(fee_rate);
        builder.add_output(outputs[0].clone());

        match builder.fund(state.spendable()) {
            Ok(selection) => {
                prop_assert!(selection.total >= amount + selection.fee);
                prop_assert_eq!(selection.total, amount + selection.fee + selection.change);

                let unsigned = builder.build(&selection, Some(state.keychain.coinbase_address().script()));
                let signed = TransactionBuilder::sign(unsigned, &selection, &state.keychain).unwrap();
                prop_assert_eq!(signed.total_output_value(), Some(selection.total - selection.fee));
                for (index, (_, utxo)) in selection.selected.iter().enumerate() {
                    prop_assert!(verify_input(&signed, index, &utxo.script).is_ok());
                }
            }
            Err(WalletError::InsufficientFunds { have, need }) => {
                prop_assert_eq!(have, values.iter().sum::<u64>());
                prop_assert!(need > amount);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}

#[test]
fn zero_value_output_is_invalid() {
    let state = state_with(&[COIN]);
    let outputs = [TxOutput { value: 0, script: foreign_script() }];
    let err = CoinSelector::select(state.spendable(), &outputs, 10).unwrap_err();
    assert!(matches!(err, WalletError::InvalidAmount(_)));
}

#[test]
fn empty_outputs_are_rejected() {
    let state = state_with(&[COIN]);
    assert_eq!(
        CoinSelector::select(state.spendable(), &[], 10),
        Err(WalletError::NoOutputs)
    );
}
