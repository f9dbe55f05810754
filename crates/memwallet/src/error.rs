//! Wallet error types.

use memwallet_core::error::{CodecError, CryptoError, ScriptError, TransactionError};
use thiserror::Error;

/// Failures reported by the node collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The request never reached the node, or the reply was unreadable.
    #[error("transport: {0}")]
    Transport(String),

    /// The node processed the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Spendable outputs do not cover the requested amount plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Total spendable value in atoms.
        have: u64,
        /// Requested amount plus the fee in atoms.
        need: u64,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("transaction has no outputs")]
    NoOutputs,

    /// Child key derivation failed. Fatal.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error("key not found for index {0}")]
    KeyNotFound(u32),

    /// A disconnect arrived for a height the journal never recorded. Fatal.
    #[error("no undo entry for height {height}")]
    MissingUndo { height: u64 },

    /// Notification bytes could not be decoded. Fatal.
    #[error("decode: {0}")]
    Decode(#[from] CodecError),

    #[error("rpc: {0}")]
    Rpc(#[from] NodeError),

    /// The node refused or never received a broadcast.
    #[error("broadcast failed: {0}")]
    Broadcast(NodeError),

    /// The sync engine stopped after a fatal error.
    #[error("sync engine halted: {0}")]
    Halted(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl WalletError {
    /// True for errors that mean the shadow ledger can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WalletError::KeyDerivation(_)
                | WalletError::MissingUndo { .. }
                | WalletError::Decode(_)
                | WalletError::Halted(_)
        )
    }
}
