//! Ed25519 keys and the per-input signing hash.
//!
//! Uses ed25519-dalek for signatures and BLAKE3 for pubkey hashes and
//! signing hashes.
//!
//! # Signing scheme
//!
//! Each input is signed over a **sighash** that commits to:
//! - Transaction version and lock_time
//! - All input outpoints (txid + index)
//! - All outputs (value + locking script)
//! - The index of the input being signed
//! - The locking script of the output being spent
//!
//! Unlocking scripts are excluded, so inputs can be signed in any order.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash256, Transaction};

/// Ed25519 keypair.
///
/// The secret key is zeroized on drop by the underlying library.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// BLAKE3 hash of the raw key, as embedded in locking scripts.
    pub fn pubkey_hash(&self) -> Hash256 {
        pubkey_hash(&self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// BLAKE3 pubkey hash from raw public key bytes.
pub fn pubkey_hash(pubkey_bytes: &[u8; 32]) -> Hash256 {
    Hash256(blake3::hash(pubkey_bytes).into())
}

/// Compute the signing hash for one input of `tx`.
///
/// `prev_script` is the locking script of the output that input spends.
pub fn signing_hash(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::new();
    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.previous_output.txid.as_bytes());
        data.extend_from_slice(&input.previous_output.index.to_le_bytes());
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(&(output.script.len() as u64).to_le_bytes());
        data.extend_from_slice(&output.script);
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data.extend_from_slice(&(input_index as u64).to_le_bytes());

    data.extend_from_slice(&(prev_script.len() as u64).to_le_bytes());
    data.extend_from_slice(prev_script);

    Ok(Hash256(blake3::hash(&data).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn two_input_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![
                TxInput::unsigned(OutPoint { txid: Hash256([1; 32]), index: 0 }),
                TxInput::unsigned(OutPoint { txid: Hash256([2; 32]), index: 1 }),
            ],
            outputs: vec![TxOutput { value: 10 * COIN, script: vec![0x76; 35] }],
            lock_time: 0,
        }
    }

    #[test]
    fn keypair_from_secret_deterministic() {
        let kp1 = KeyPair::from_secret_bytes([42u8; 32]);
        let kp2 = KeyPair::from_secret_bytes([42u8; 32]);
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let kp = KeyPair::from_secret_bytes([9u8; 32]);
        let debug = format!("{kp:?}");
        assert!(debug.contains("public_key"));
        assert!(!debug.contains(&hex::encode(kp.secret_bytes())));
    }

    #[test]
    fn pubkey_hash_matches_standalone_fn() {
        let pk = KeyPair::from_secret_bytes([3u8; 32]).public_key();
        assert_eq!(pk.pubkey_hash(), pubkey_hash(&pk.to_bytes()));
    }

    #[test]
    fn pubkey_serde_json_roundtrip() {
        let pk = KeyPair::from_secret_bytes([5u8; 32]).public_key();
        let json = serde_json::to_string(&pk).unwrap();
        let pk2: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn sign_verify_message() {
        let kp = KeyPair::from_secret_bytes([11u8; 32]);
        let sig = kp.sign(b"shadow ledger");
        assert!(kp.public_key().verify(b"shadow ledger", &sig).is_ok());
        assert_eq!(
            kp.public_key().verify(b"other", &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn signing_hash_differs_per_input() {
        let tx = two_input_tx();
        let h0 = signing_hash(&tx, 0, b"script").unwrap();
        let h1 = signing_hash(&tx, 1, b"script").unwrap();
        assert_ne!(h0, h1);
    }

    #[test]
    fn signing_hash_commits_to_prev_script() {
        let tx = two_input_tx();
        assert_ne!(
            signing_hash(&tx, 0, b"a").unwrap(),
            signing_hash(&tx, 0, b"b").unwrap()
        );
    }

    #[test]
    fn signing_hash_ignores_unlocking_scripts() {
        let tx = two_input_tx();
        let mut signed = tx.clone();
        signed.inputs[1].signature_script = vec![9; 98];
        assert_eq!(
            signing_hash(&tx, 0, b"s").unwrap(),
            signing_hash(&signed, 0, b"s").unwrap()
        );
    }

    #[test]
    fn signing_hash_out_of_bounds() {
        let tx = two_input_tx();
        assert_eq!(
            signing_hash(&tx, 2, b""),
            Err(CryptoError::InputIndexOutOfBounds { index: 2, len: 2 })
        );
    }
}
