//! Shared builders for the integration tests.

use std::time::Duration;

use memwallet::{Seed, WalletState};
use memwallet_core::address::{Address, Network};
use memwallet_core::constants::COIN;
use memwallet_core::params::SIMNET;
use memwallet_core::types::{OutPoint, Transaction, TxInput, TxOutput};
use memwallet_harness::HarnessConfig;

/// Reward paid by every coinbase built here.
pub const REWARD: u64 = 300 * COIN;

/// Coinbase paying `value` to `script`. The height goes into the unlocking
/// script so coinbases at different heights get different txids.
pub fn coinbase(script: Vec<u8>, height: u64, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature_script: height.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value, script }],
        lock_time: height,
    }
}

/// Unsigned transaction spending `inputs` into `outputs`.
pub fn spend(inputs: &[OutPoint], outputs: Vec<TxOutput>) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs.iter().copied().map(TxInput::unsigned).collect(),
        outputs,
        lock_time: 0,
    }
}

/// Single output of `value` paying `address`.
pub fn pay(address: &Address, value: u64) -> Vec<TxOutput> {
    vec![TxOutput {
        value,
        script: address.script(),
    }]
}

/// A script nobody in the tests owns.
pub fn foreign_script() -> Vec<u8> {
    Address::from_pubkey_hash([0xEE; 32].into(), Network::Simnet).script()
}

/// Fresh simnet wallet state for `seed_byte`.
pub fn simnet_state(seed_byte: u8) -> WalletState {
    WalletState::new(&Seed::from_bytes([seed_byte; 32]), SIMNET)
}

/// Harness settings for a simulated node with a short poll interval.
pub fn sim_config(seed_index: u32) -> HarnessConfig {
    HarnessConfig {
        seed_index,
        sync_poll_interval: Duration::from_millis(5),
        ..HarnessConfig::default()
    }
}

/// Poll `condition` every few milliseconds for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
