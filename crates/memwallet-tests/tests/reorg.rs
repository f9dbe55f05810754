//! Disconnect is the exact inverse of connect.

use memwallet::WalletState;
use memwallet_core::constants::COIN;
use memwallet_core::types::{OutPoint, Transaction, TxOutput};
use memwallet_harness::Harness;
use memwallet_tests::helpers::*;
use proptest::prelude::*;

/// What one generated block does.
#[derive(Debug, Clone)]
struct BlockPlan {
    coinbase_owned: bool,
    /// Spend the n-th tracked output (modulo ledger size), if any.
    spend: Option<usize>,
    /// Outputs of the spend: owned or foreign.
    spend_outputs: Vec<bool>,
    /// Create an owned output and spend it within the same block.
    create_and_spend: bool,
}

fn block_plan() -> impl Strategy<Value = BlockPlan> {
    (
        any::<bool>(),
        proptest::option::of(0usize..64),
        proptest::collection::vec(any::<bool>(), 1..4),
        any::<bool>(),
    )
        .prop_map(|(coinbase_owned, spend, spend_outputs, create_and_spend)| BlockPlan {
            coinbase_owned,
            spend,
            spend_outputs,
            create_and_spend,
        })
}

fn build_block(state: &mut WalletState, height: u64, plan: &BlockPlan) -> Vec<Transaction> {
    let owned = state.keychain.coinbase_address().script();
    let fresh = state.keychain.next_address().unwrap().1.script();

    let cb_script = if plan.coinbase_owned { owned.clone() } else { foreign_script() };
    let mut txs = vec![coinbase(cb_script, height, REWARD)];

    let tracked: Vec<OutPoint> = state.snapshot().into_keys().collect();
    if let (Some(n), false) = (plan.spend, tracked.is_empty()) {
        let outputs = plan
            .spend_outputs
            .iter()
            .map(|&mine| TxOutput {
                value: COIN,
                script: if mine { fresh.clone() } else { foreign_script() },
            })
            .collect();
        txs.push(spend(&[tracked[n % tracked.len()]], outputs));
    }

    if plan.create_and_spend {
        let mut parent = spend(&[OutPoint { txid: [height as u8; 32].into(), index: 9 }], vec![]);
        parent.outputs.push(TxOutput { value: 2 * COIN, script: owned });
        parent.lock_time = height;
        let parent_id = parent.txid().unwrap();
        let child = spend(
            &[OutPoint { txid: parent_id, index: 0 }],
            vec![TxOutput { value: COIN, script: foreign_script() }],
        );
        txs.push(parent);
        txs.push(child);
    }
    txs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn unwinding_restores_every_prior_state(plans in proptest::collection::vec(block_plan(), 1..24)) {
        let mut state = simnet_state(42);
        let mut history = Vec::new();

        for (i, plan) in plans.iter().enumerate() {
            let height = i as u64 + 1;
            let txs = build_block(&mut state, height, plan);
            history.push((state.snapshot(), state.current_height));
            state.connect(height, &txs).unwrap();
        }

        for height in (1..=plans.len() as u64).rev() {
            state.disconnect(height).unwrap();
            let (expected, expected_height) = history.pop().unwrap();
            prop_assert_eq!(state.snapshot(), expected);
            prop_assert_eq!(state.current_height, expected_height);
        }
        prop_assert!(state.ledger.is_empty());
        prop_assert!(state.journal.is_empty());
    }
}

#[test]
fn output_created_and_spent_in_one_block_leaves_no_trace() {
    let mut state = simnet_state(5);
    let plan = BlockPlan {
        coinbase_owned: false,
        spend: None,
        spend_outputs: vec![],
        create_and_spend: true,
    };
    let txs = build_block(&mut state, 1, &plan);
    let applied = state.connect(1, &txs).unwrap();
    assert_eq!(applied.created, 0);
    assert_eq!(applied.destroyed, 0);
    assert!(state.ledger.is_empty());
}

#[tokio::test]
async fn wallet_follows_a_node_reorg() {
    let harness = Harness::launch(&sim_config(12)).await.unwrap();
    let wallet = harness.wallet();
    let sim = harness.sim().unwrap();
    harness.with_mature_outputs(2).await.unwrap();

    let tx = wallet
        .create_transaction(pay(&sim.miner_address(), 50 * COIN), 10)
        .await
        .unwrap();
    sim.submit(&tx, true).unwrap();
    let change = tx.outputs[1].value;
    harness.mine_and_sync(1).await.unwrap();
    assert_eq!(wallet.confirmed_balance(), 2 * REWARD + change);

    // Block 19 is replaced; the spend is mined again in the new branch.
    sim.reorg(1, 2).unwrap();
    wallet.sync().await.unwrap();
    assert_eq!(wallet.synced_height(), 20);
    assert_eq!(sim.mempool_len(), 0);
    assert_eq!(wallet.confirmed_balance(), 3 * REWARD + change);
    assert!(!wallet.utxos().contains_key(&tx.inputs[0].previous_output));
}
