//! Single-signature pay-to-pubkey-hash scripts.
//!
//! Locking script (37 bytes):
//! `OP_DUP OP_BLAKE3 <push 32 pubkey_hash> OP_EQUALVERIFY OP_CHECKSIG`
//!
//! Unlocking script (98 bytes):
//! `<push 64 signature> <push 32 public key>`
//!
//! No other script forms are recognised.

use crate::crypto::{signing_hash, KeyPair, PublicKey};
use crate::error::ScriptError;
use crate::types::{Hash256, Transaction};

pub const OP_DUP: u8 = 0x76;
pub const OP_BLAKE3: u8 = 0xa8;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;

const PUSH_32: u8 = 0x20;
const PUSH_64: u8 = 0x40;

/// Length of a pay-to-pubkey-hash locking script.
pub const P2PKH_SCRIPT_SIZE: usize = 37;

/// Worst-case size of one unlocking script.
///
/// Ed25519 signatures are fixed-length, so this is also the exact size.
pub const MAX_SIGNATURE_SCRIPT_SIZE: usize = 1 + 64 + 1 + 32;

/// Build the locking script paying to `pubkey_hash`.
pub fn pay_to_pubkey_hash(pubkey_hash: &Hash256) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_SCRIPT_SIZE);
    script.push(OP_DUP);
    script.push(OP_BLAKE3);
    script.push(PUSH_32);
    script.extend_from_slice(pubkey_hash.as_bytes());
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Extract the pubkey hash from a pay-to-pubkey-hash locking script.
pub fn extract_pubkey_hash(script: &[u8]) -> Result<Hash256, ScriptError> {
    match script {
        [OP_DUP, OP_BLAKE3, PUSH_32, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(hash);
            Ok(Hash256(out))
        }
        _ => Err(ScriptError::NotPayToPubkeyHash),
    }
}

/// True if `script` carries `pubkey_hash` anywhere in its bytes.
///
/// This is the ownership test applied to incoming outputs. It is looser
/// than [`extract_pubkey_hash`] and matches any script embedding the hash.
pub fn script_contains_hash(script: &[u8], pubkey_hash: &Hash256) -> bool {
    script
        .windows(32)
        .any(|window| window == pubkey_hash.as_bytes())
}

/// Produce the unlocking script for input `input_index` of `tx`.
///
/// `prev_script` is the locking script of the output being spent; it must
/// pay to `keypair`'s pubkey hash.
pub fn signature_script(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
    keypair: &KeyPair,
) -> Result<Vec<u8>, ScriptError> {
    let public_key = keypair.public_key();
    let expected = extract_pubkey_hash(prev_script)?;
    if public_key.pubkey_hash() != expected {
        return Err(crate::error::CryptoError::PubkeyHashMismatch.into());
    }

    let sighash = signing_hash(tx, input_index, prev_script)?;
    let signature = keypair.sign(sighash.as_bytes());

    let mut script = Vec::with_capacity(MAX_SIGNATURE_SCRIPT_SIZE);
    script.push(PUSH_64);
    script.extend_from_slice(&signature);
    script.push(PUSH_32);
    script.extend_from_slice(&public_key.to_bytes());
    Ok(script)
}

/// Split an unlocking script into its signature and public key.
fn parse_signature_script(script: &[u8]) -> Result<([u8; 64], [u8; 32]), ScriptError> {
    if script.len() != MAX_SIGNATURE_SCRIPT_SIZE {
        return Err(ScriptError::MalformedSignatureScript(format!(
            "expected {MAX_SIGNATURE_SCRIPT_SIZE} bytes, got {}",
            script.len()
        )));
    }
    if script[0] != PUSH_64 || script[65] != PUSH_32 {
        return Err(ScriptError::MalformedSignatureScript(
            "unexpected push opcodes".into(),
        ));
    }
    let mut sig = [0u8; 64];
    sig.copy_from_slice(&script[1..65]);
    let mut pk = [0u8; 32];
    pk.copy_from_slice(&script[66..98]);
    Ok((sig, pk))
}

/// Verify input `input_index` of `tx` against the locking script it spends.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
) -> Result<(), ScriptError> {
    let input = tx.inputs.get(input_index).ok_or(
        crate::error::CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        },
    )?;
    let expected = extract_pubkey_hash(prev_script)?;
    let (sig, pk_bytes) = parse_signature_script(&input.signature_script)?;
    let pk = PublicKey::from_bytes(&pk_bytes)?;
    if pk.pubkey_hash() != expected {
        return Err(crate::error::CryptoError::PubkeyHashMismatch.into());
    }
    let sighash = signing_hash(tx, input_index, prev_script)?;
    pk.verify(sighash.as_bytes(), &sig)?;
    Ok(())
}
