//! Seed management and deterministic key derivation.
//!
//! A root key is derived once from the seed with BLAKE3's KDF, and every
//! child key is derived from the root key and its 32-bit index. Index 0 is
//! reserved for the coinbase address; fresh addresses start at index 1 and
//! indexes are never reused.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use memwallet_core::address::{Address, Network};
use memwallet_core::crypto::KeyPair;
use memwallet_core::script::script_contains_hash;
use memwallet_core::types::Hash256;

use crate::error::WalletError;

const ROOT_KDF_CONTEXT: &str = "memwallet 2024-01-01 root key v1";
const CHILD_KDF_CONTEXT: &str = "memwallet 2024-01-01 child key v1";
const HARNESS_SEED_CONTEXT: &str = "memwallet 2024-01-01 harness seed v1";

/// Index of the key that receives coinbase outputs.
pub const COINBASE_INDEX: u32 = 0;

/// A 32-byte wallet seed. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Reproducible seed for the harness instance numbered `index`.
    ///
    /// Distinct indexes give unrelated key hierarchies, so concurrently
    /// running harnesses never share addresses.
    pub fn for_harness(index: u32) -> Self {
        Self {
            bytes: blake3::derive_key(HARNESS_SEED_CONTEXT, &index.to_le_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct RootKey([u8; 32]);

impl RootKey {
    fn from_seed(seed: &Seed) -> Self {
        Self(blake3::derive_key(ROOT_KDF_CONTEXT, seed.as_bytes()))
    }

    fn child(&self, index: u32) -> KeyPair {
        let mut ikm = [0u8; 36];
        ikm[..32].copy_from_slice(&self.0);
        ikm[32..].copy_from_slice(&index.to_le_bytes());
        let mut secret = blake3::derive_key(CHILD_KDF_CONTEXT, &ikm);
        ikm.zeroize();
        let kp = KeyPair::from_secret_bytes(secret);
        secret.zeroize();
        kp
    }
}

/// Deterministic key hierarchy with a monotonically advancing index.
pub struct KeyChain {
    root: RootKey,
    network: Network,
    next_index: u32,
    keypairs: HashMap<u32, KeyPair>,
    addresses: BTreeMap<u32, Address>,
    pubkey_hash_to_index: HashMap<Hash256, u32>,
}

impl KeyChain {
    /// Build the keychain and register the reserved coinbase key.
    pub fn new(seed: &Seed, network: Network) -> Self {
        let mut chain = Self {
            root: RootKey::from_seed(seed),
            network,
            next_index: COINBASE_INDEX + 1,
            keypairs: HashMap::new(),
            addresses: BTreeMap::new(),
            pubkey_hash_to_index: HashMap::new(),
        };
        chain.register(COINBASE_INDEX);
        chain
    }

    fn register(&mut self, index: u32) -> Address {
        let kp = self.root.child(index);
        let address = Address::from_public_key(&kp.public_key(), self.network);
        self.pubkey_hash_to_index.insert(address.pubkey_hash(), index);
        self.addresses.insert(index, address);
        self.keypairs.insert(index, kp);
        address
    }

    /// Derive and register the key at the next index.
    ///
    /// Fails once the index space is exhausted; the index is not advanced
    /// in that case.
    pub fn next_address(&mut self) -> Result<(u32, Address), WalletError> {
        let index = self.next_index;
        self.next_index = index.checked_add(1).ok_or_else(|| {
            WalletError::KeyDerivation(format!("child index space exhausted at {index}"))
        })?;
        Ok((index, self.register(index)))
    }

    pub fn coinbase_address(&self) -> Address {
        self.addresses[&COINBASE_INDEX]
    }

    pub fn address_at(&self, index: u32) -> Option<Address> {
        self.addresses.get(&index).copied()
    }

    pub fn keypair(&self, index: u32) -> Result<&KeyPair, WalletError> {
        self.keypairs.get(&index).ok_or(WalletError::KeyNotFound(index))
    }

    pub fn index_of(&self, pubkey_hash: &Hash256) -> Option<u32> {
        self.pubkey_hash_to_index.get(pubkey_hash).copied()
    }

    /// Index of the lowest registered key whose hash appears in `script`.
    pub fn owner_of(&self, script: &[u8]) -> Option<u32> {
        self.addresses
            .iter()
            .find(|(_, addr)| script_contains_hash(script, &addr.pubkey_hash()))
            .map(|(&index, _)| index)
    }

    /// Every registered address, in index order.
    pub fn addresses(&self) -> Vec<Address> {
        self.addresses.values().copied().collect()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    #[cfg(test)]
    pub(crate) fn set_next_index(&mut self, index: u32) {
        self.next_index = index;
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("network", &self.network)
            .field("next_index", &self.next_index)
            .field("registered", &self.addresses.len())
            .finish_non_exhaustive()
    }
}
