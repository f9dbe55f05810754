//! # memwallet - in-memory shadow ledger for blockchain integration tests.
//!
//! Mirrors the spendable outputs a node holds for a seed-derived key
//! hierarchy, applying block connect/disconnect notifications in arrival
//! order so tests can check balances and fund transactions without asking
//! the node on every call.
//!
//! # Modules
//!
//! - [`error`] - `WalletError` and `NodeError`
//! - [`keys`] - Seed, KeyChain, BLAKE3-based key derivation
//! - [`ledger`] - UTXO ledger with advisory locks
//! - [`journal`] - per-height undo records
//! - [`state`] - ledger, journal and keychain applied as one unit
//! - [`sync`] - Chain Sync Engine and the notification feed
//! - [`coin_selection`] - greedy funding
//! - [`builder`] - transaction assembly and signing
//! - [`node`] - the node collaborator interface
//! - [`config`] - wallet configuration
//! - [`wallet`] - the `Wallet` facade exposed to tests

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod journal;
pub mod keys;
pub mod ledger;
pub mod node;
pub mod state;
pub mod sync;
pub mod wallet;

pub use builder::TransactionBuilder;
pub use coin_selection::{CoinSelection, CoinSelector};
pub use config::{SelectionOrder, WalletConfig};
pub use error::{NodeError, WalletError};
pub use journal::{ReorgJournal, UndoEntry};
pub use keys::{KeyChain, Seed};
pub use ledger::{Utxo, UtxoLedger};
pub use node::NodeClient;
pub use state::WalletState;
pub use sync::{ChainFeed, ChainUpdate, EngineStatus, MalfunctionReporter, SyncEngine};
pub use wallet::Wallet;
