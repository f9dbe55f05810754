//! Integration and property tests for memwallet.
//!
//! The tests under `tests/` drive the shadow ledger directly, through the
//! `Wallet` facade, and against the simulated node. Shared builders live in
//! [`helpers`].

pub mod helpers;
