//! # memwallet-harness - plumbing for tests that drive a shadow wallet.
//!
//! - [`disposable`] - registry of resources torn down on exit or malfunction
//! - [`scratch`] - temporary directories tracked by the registry
//! - [`config`] - `HarnessConfig` loaded from `MEMWALLET_*` variables
//! - [`logging`] - tracing subscriber setup
//! - [`rpc`] - JSON-RPC node client with bounded connection retry
//! - [`sim`] - in-process simulated node
//! - [`harness`] - node, wallet and registry bundled for a test

pub mod config;
pub mod disposable;
pub mod harness;
pub mod logging;
pub mod rpc;
pub mod scratch;
pub mod sim;

pub use config::HarnessConfig;
pub use disposable::{DisposableRegistry, Disposable, DisposeGuard};
pub use harness::Harness;
pub use rpc::RpcNodeClient;
pub use scratch::ScratchDir;
pub use sim::{SimError, SimNode};
