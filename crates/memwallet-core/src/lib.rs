//! # memwallet-core
//! Foundation types for the memwallet shadow ledger.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod params;
pub mod script;
pub mod types;
