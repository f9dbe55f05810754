//! Protocol constants. All monetary values in atoms (1 coin = 10^8 atoms).

pub const COIN: u64 = 100_000_000;

/// Current transaction version.
pub const TX_VERSION: u64 = 1;

/// Current block header version.
pub const BLOCK_VERSION: u64 = 1;

/// Default relay fee rate in atoms per serialized byte.
pub const DEFAULT_FEE_RATE: u64 = 10;

/// Fee ceiling in atoms per byte above which a node rejects a broadcast
/// unless the caller passes `allow_high_fees`.
pub const HIGH_FEE_RATE: u64 = 10_000;
