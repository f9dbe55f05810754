//! Bech32m addresses.
//!
//! An address is a version byte plus a 32-byte BLAKE3 pubkey hash, encoded
//! with Bech32m ([BIP-350]) under a per-network human-readable prefix:
//!
//! | Network | Prefix  |
//! |---------|---------|
//! | Mainnet | `mw1`   |
//! | Testnet | `tmw1`  |
//! | Regtest | `rmw1`  |
//! | Simnet  | `smw1`  |
//!
//! [BIP-350]: https://github.com/bitcoin/bips/blob/master/bip-0350.mediawiki

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::PublicKey;
use crate::error::AddressError;
use crate::script::pay_to_pubkey_hash;
use crate::types::Hash256;

const BECH32M_CONST: u32 = 0x2bc8_30a3;
const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const CHECKSUM_LEN: usize = 6;

/// Current address version.
pub const ADDRESS_VERSION: u8 = 0;

/// Network an address (and a set of chain parameters) belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Regtest,
    Simnet,
}

impl Network {
    pub const ALL: [Network; 4] = [
        Network::Mainnet,
        Network::Testnet,
        Network::Regtest,
        Network::Simnet,
    ];

    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "mw",
            Network::Testnet => "tmw",
            Network::Regtest => "rmw",
            Network::Simnet => "smw",
        }
    }

    pub fn from_hrp(hrp: &str) -> Result<Self, AddressError> {
        Self::ALL
            .into_iter()
            .find(|n| n.hrp() == hrp)
            .ok_or_else(|| AddressError::UnknownNetwork(hrp.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
            Network::Simnet => "simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AddressError::UnknownNetwork(s.to_string()))
    }
}

/// A single-signature address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    pubkey_hash: Hash256,
}

impl Address {
    pub fn from_pubkey_hash(pubkey_hash: Hash256, network: Network) -> Self {
        Self { network, pubkey_hash }
    }

    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        Self::from_pubkey_hash(public_key.pubkey_hash(), network)
    }

    pub fn pubkey_hash(&self) -> Hash256 {
        self.pubkey_hash
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The pay-to-pubkey-hash locking script for this address.
    pub fn script(&self) -> Vec<u8> {
        pay_to_pubkey_hash(&self.pubkey_hash)
    }

    pub fn encode(&self) -> String {
        let hrp = self.network.hrp();
        let mut payload = vec![ADDRESS_VERSION];
        payload.extend(to_base32(self.pubkey_hash.as_bytes()));
        let checksum = create_checksum(hrp, &payload);

        let mut out = String::with_capacity(hrp.len() + 1 + payload.len() + CHECKSUM_LEN);
        out.push_str(hrp);
        out.push('1');
        out.extend(
            payload
                .iter()
                .chain(checksum.iter())
                .map(|&d| CHARSET[d as usize] as char),
        );
        out
    }

    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let has_lower = s.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = s.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::MixedCase);
        }
        let s = s.to_ascii_lowercase();

        let sep = s.rfind('1').ok_or(AddressError::MissingSeparator)?;
        if sep == 0 {
            return Err(AddressError::InvalidHrp);
        }
        let (hrp, rest) = (&s[..sep], &s[sep + 1..]);
        if rest.len() < CHECKSUM_LEN + 1 {
            return Err(AddressError::InvalidLength);
        }

        let data = rest
            .chars()
            .map(|c| {
                CHARSET
                    .iter()
                    .position(|&ch| ch as char == c)
                    .map(|p| p as u8)
                    .ok_or(AddressError::InvalidCharacter(c))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        if !verify_checksum(hrp, &data) {
            return Err(AddressError::InvalidChecksum);
        }
        let payload = &data[..data.len() - CHECKSUM_LEN];
        let version = payload[0];
        if version != ADDRESS_VERSION {
            return Err(AddressError::InvalidVersion(version));
        }

        let bytes = from_base32(&payload[1..]).ok_or(AddressError::InvalidPadding)?;
        let hash: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength)?;
        let network = Network::from_hrp(hrp)?;

        Ok(Self::from_pubkey_hash(Hash256(hash), network))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

fn polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    const GEN: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
    values.into_iter().fold(1u32, |chk, v| {
        let top = chk >> 25;
        let mut chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(v);
        for (i, g) in GEN.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
        chk
    })
}

fn hrp_expand(hrp: &str) -> impl Iterator<Item = u8> + '_ {
    hrp.bytes()
        .map(|c| c >> 5)
        .chain(std::iter::once(0))
        .chain(hrp.bytes().map(|c| c & 31))
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let values = hrp_expand(hrp)
        .chain(data.iter().copied())
        .chain([0u8; CHECKSUM_LEN]);
    let pm = polymod(values) ^ BECH32M_CONST;
    std::array::from_fn(|i| ((pm >> (5 * (5 - i))) & 31) as u8)
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    polymod(hrp_expand(hrp).chain(data.iter().copied())) == BECH32M_CONST
}

/// Regroup bytes into 5-bit values, zero-padding the final group.
fn to_base32(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((bytes.len() * 8).div_ceil(5));
    let (mut acc, mut bits) = (0u32, 0u32);
    for &b in bytes {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(((acc >> bits) & 31) as u8);
        }
    }
    if bits > 0 {
        out.push(((acc << (5 - bits)) & 31) as u8);
    }
    out
}

/// Regroup 5-bit values into bytes. Rejects non-zero or oversized padding.
fn from_base32(values: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * 5 / 8);
    let (mut acc, mut bits) = (0u32, 0u32);
    for &v in values {
        if v > 31 {
            return None;
        }
        acc = (acc << 5) | u32::from(v);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
        }
    }
    if bits >= 5 || (acc & ((1 << bits) - 1)) != 0 {
        return None;
    }
    Some(out)
}
