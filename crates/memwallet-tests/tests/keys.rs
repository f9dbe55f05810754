//! Address derivation is a pure function of seed and index.

use memwallet::{KeyChain, Seed};
use memwallet_core::address::{Address, Network};
use memwallet_harness::Harness;
use memwallet_tests::helpers::*;

fn derive(seed: &Seed, count: usize) -> Vec<Address> {
    let mut chain = KeyChain::new(seed, Network::Simnet);
    (0..count).map(|_| chain.next_address().unwrap().1).collect()
}

#[test]
fn same_seed_same_addresses() {
    let seed = Seed::for_harness(3);
    assert_eq!(derive(&seed, 10), derive(&seed, 10));
    assert_ne!(derive(&seed, 3), derive(&Seed::for_harness(4), 3));
}

#[test]
fn coinbase_key_is_reserved() {
    let mut chain = KeyChain::new(&Seed::for_harness(0), Network::Simnet);
    assert_eq!(chain.next_index(), 1);
    let coinbase = chain.coinbase_address();
    assert_eq!(chain.address_at(0), Some(coinbase));

    let (index, first) = chain.next_address().unwrap();
    assert_eq!(index, 1);
    assert_ne!(first, coinbase);
    assert_eq!(chain.owner_of(&coinbase.script()), Some(0));
    assert_eq!(chain.owner_of(&first.script()), Some(1));
    assert_eq!(chain.owner_of(&foreign_script()), None);
}

#[test]
fn addresses_round_trip_through_text() {
    for address in derive(&Seed::for_harness(9), 5) {
        let text = address.to_string();
        assert!(text.starts_with("smw1"));
        assert_eq!(text.parse::<Address>().unwrap(), address);
    }
}

#[tokio::test]
async fn harnesses_with_the_same_index_agree() {
    let a = Harness::launch(&sim_config(51)).await.unwrap();
    let b = Harness::launch(&sim_config(51)).await.unwrap();
    let c = Harness::launch(&sim_config(52)).await.unwrap();

    assert_eq!(a.wallet().coinbase_address(), b.wallet().coinbase_address());
    assert_ne!(a.wallet().coinbase_address(), c.wallet().coinbase_address());
    assert_eq!(
        a.wallet().new_address().await.unwrap(),
        b.wallet().new_address().await.unwrap()
    );
}
