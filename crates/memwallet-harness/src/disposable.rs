//! Registry of resources that must be released when a test ends.
//!
//! Every resource a harness creates is registered here. Releasing happens
//! through the [`DisposeGuard`] returned on registration, through
//! [`DisposableRegistry::dispose_all`], or on a reported malfunction, where
//! everything still registered is disposed before the panic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use memwallet::{MalfunctionReporter, Wallet};

/// A resource with an explicit teardown step.
///
/// `dispose` must be idempotent; it may run from a guard, from
/// `dispose_all` and from the malfunction path.
pub trait Disposable: Send + Sync {
    fn name(&self) -> String;
    fn dispose(&self);
}

impl Disposable for Wallet {
    fn name(&self) -> String {
        format!("wallet({})", self.coinbase_address())
    }

    fn dispose(&self) {
        Wallet::dispose(self);
    }
}

#[derive(Default)]
pub struct DisposableRegistry {
    next_id: AtomicU64,
    assets: Mutex<BTreeMap<u64, Arc<dyn Disposable>>>,
}

impl std::fmt::Debug for DisposableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

impl DisposableRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track `asset` until its guard drops or the registry is drained.
    pub fn register(self: &Arc<Self>, asset: Arc<dyn Disposable>) -> DisposeGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, name = %asset.name(), "registered disposable");
        self.assets.lock().insert(id, asset);
        DisposeGuard {
            registry: Arc::downgrade(self),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.lock().is_empty()
    }

    /// Dispose one asset and forget it. No-op if already released.
    fn release(&self, id: u64) {
        let asset = self.assets.lock().remove(&id);
        if let Some(asset) = asset {
            debug!(id, name = %asset.name(), "disposing");
            asset.dispose();
        }
    }

    /// Dispose every registered asset, newest first.
    pub fn dispose_all(&self) {
        let drained = std::mem::take(&mut *self.assets.lock());
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "disposing all registered resources");
        for (id, asset) in drained.into_iter().rev() {
            debug!(id, name = %asset.name(), "disposing");
            asset.dispose();
        }
    }
}

impl MalfunctionReporter for DisposableRegistry {
    fn report(&self, reason: &str) -> ! {
        error!(%reason, "test setup malfunction, tearing down");
        self.dispose_all();
        panic!("test setup malfunction: {reason}");
    }
}

/// Releases its asset when dropped.
#[must_use = "dropping the guard disposes the resource immediately"]
#[derive(Debug)]
pub struct DisposeGuard {
    registry: Weak<DisposableRegistry>,
    id: u64,
}

impl DisposeGuard {
    /// Dispose now instead of at drop.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
    }
}
