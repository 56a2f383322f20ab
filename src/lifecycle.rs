//! Process-wide bookkeeping of live blocks: registration, statistics,
//! leak detection, emergency cleanup.
//!
//! A plain `std::sync::Mutex` around a `Vec` of observers: this subsystem
//! has no `await` points, so a sync mutex is the right tool, not an async
//! one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::block::EncryptedBlock;
use crate::error::Result;

/// A non-owning observer reference to a live block. `EncryptedBlock` is
/// `Send` (single-owner, moved between threads) but not `Sync`, so this
/// wrapper only ever stores a raw pointer and asserts `Send` itself; the
/// manager never dereferences it concurrently with the block's owner,
/// since all it does is count and, on `emergency_cleanup`, synchronously
/// reclaim blocks that were registered and never unregistered.
struct BlockObserver {
    id: u64,
    ptr: *mut EncryptedBlock,
    size: usize,
}

// Safety: the manager only inspects `ptr` while holding `registry`'s lock,
// and only dereferences it from `emergency_cleanup`/`get_active_blocks`,
// which the block's owner is expected to call only after giving up
// ownership (e.g. during shutdown). Ordinary use never dereferences it.
unsafe impl Send for BlockObserver {}

#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleStats {
    pub total_created: u64,
    pub total_destroyed: u64,
    pub bytes_outstanding: u64,
    pub peak_bytes: u64,
    pub currently_live: usize,
}

/// A report produced by [`BlockLifecycleManager::detect_memory_leaks`].
/// Non-empty `leaked_ids` means blocks remain registered at a point the
/// caller expected the registry to be quiet.
#[derive(Debug, Default, Clone)]
pub struct LeakReport {
    pub leaked_ids: Vec<u64>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.leaked_ids.is_empty()
    }
}

/// Process-wide registry of live blocks. Construct one per process (or
/// share via `Arc`); registration is independent of `EncryptedBlock::create`
/// — callers opt a block in with [`BlockLifecycleManager::register_block`].
pub struct BlockLifecycleManager {
    registry: Mutex<Vec<BlockObserver>>,
    next_id: AtomicU64,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    bytes_outstanding: AtomicU64,
    peak_bytes: AtomicU64,
    registered_count: AtomicUsize,
}

impl BlockLifecycleManager {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            bytes_outstanding: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            registered_count: AtomicUsize::new(0),
        }
    }

    /// Register `block` with the manager, returning an opaque id used to
    /// unregister it later. Takes `&mut EncryptedBlock` only to obtain a
    /// stable pointer; the manager does not otherwise touch the block
    /// while it remains registered.
    pub fn register_block(&self, block: &mut EncryptedBlock) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let size = block.get_payload_size();
        {
            let mut registry = self.registry.lock().unwrap();
            registry.push(BlockObserver {
                id,
                ptr: block as *mut EncryptedBlock,
                size,
            });
        }
        self.total_created.fetch_add(1, Ordering::SeqCst);
        self.registered_count.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.bytes_outstanding.fetch_add(size as u64, Ordering::SeqCst) + size as u64;
        self.peak_bytes.fetch_max(outstanding, Ordering::SeqCst);
        tracing::debug!(id, size, "block registered with lifecycle manager");
        Ok(id)
    }

    /// Unregister a previously registered block. Idempotent: unregistering
    /// an unknown id is a no-op, not an error, matching the destructor
    /// discipline where this is typically called from `Drop`-adjacent code
    /// that cannot propagate a `Result`.
    pub fn unregister_block(&self, id: u64) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(pos) = registry.iter().position(|o| o.id == id) {
            let observer = registry.remove(pos);
            drop(registry);
            self.total_destroyed.fetch_add(1, Ordering::SeqCst);
            self.registered_count.fetch_sub(1, Ordering::SeqCst);
            self.bytes_outstanding.fetch_sub(observer.size as u64, Ordering::SeqCst);
            tracing::debug!(id, "block unregistered");
        }
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            total_created: self.total_created.load(Ordering::SeqCst),
            total_destroyed: self.total_destroyed.load(Ordering::SeqCst),
            bytes_outstanding: self.bytes_outstanding.load(Ordering::SeqCst),
            peak_bytes: self.peak_bytes.load(Ordering::SeqCst),
            currently_live: self.registered_count.load(Ordering::SeqCst),
        }
    }

    /// The ids currently registered, for diagnostics.
    pub fn get_active_block_ids(&self) -> Vec<u64> {
        self.registry.lock().unwrap().iter().map(|o| o.id).collect()
    }

    /// Walk every tracked block and securely wipe its payload in place,
    /// then clear the registry. Intended for process shutdown, where the
    /// caller has already given up ordinary ownership discipline.
    ///
    /// # Safety
    /// Every registered block's owner must have relinquished concurrent
    /// access before calling this — typical use is at shutdown, after the
    /// allocator above this subsystem has stopped handing out blocks.
    pub unsafe fn emergency_cleanup(&self) -> usize {
        let mut registry = self.registry.lock().unwrap();
        let count = registry.len();
        for observer in registry.drain(..) {
            // SAFETY: caller's contract above.
            unsafe {
                (*observer.ptr).secure_wipe();
            }
            self.total_destroyed.fetch_add(1, Ordering::SeqCst);
            self.bytes_outstanding.fetch_sub(observer.size as u64, Ordering::SeqCst);
        }
        self.registered_count.store(0, Ordering::SeqCst);
        tracing::warn!(count, "emergency cleanup wiped all registered blocks");
        count
    }

    /// Non-empty iff blocks remain registered — call at a point in the
    /// embedding application's lifecycle where the registry is expected to
    /// be empty (e.g. after a request completes).
    pub fn detect_memory_leaks(&self) -> LeakReport {
        let leaked_ids = self.get_active_block_ids();
        if !leaked_ids.is_empty() {
            tracing::warn!(count = leaked_ids.len(), "lifecycle manager detected leaked blocks");
        }
        LeakReport { leaked_ids }
    }
}

impl Default for BlockLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CryptoContext, ReferenceContext};
    use std::sync::Arc;

    #[test]
    fn register_and_unregister_tracks_stats() {
        let manager = BlockLifecycleManager::new();
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        let id = manager.register_block(&mut block).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.currently_live, 1);
        assert_eq!(stats.total_created, 1);
        assert!(stats.bytes_outstanding > 0);

        manager.unregister_block(id);
        let stats = manager.stats();
        assert_eq!(stats.currently_live, 0);
        assert_eq!(stats.total_destroyed, 1);
        assert_eq!(stats.bytes_outstanding, 0);
    }

    #[test]
    fn leak_detection_reports_registered_blocks() {
        let manager = BlockLifecycleManager::new();
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        manager.register_block(&mut block).unwrap();

        let report = manager.detect_memory_leaks();
        assert!(!report.is_clean());
        assert_eq!(report.leaked_ids.len(), 1);
    }

    #[test]
    fn emergency_cleanup_wipes_and_clears_registry() {
        let manager = BlockLifecycleManager::new();
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        block.write_payload(0, b"secret").unwrap();
        manager.register_block(&mut block).unwrap();

        let wiped = unsafe { manager.emergency_cleanup() };
        assert_eq!(wiped, 1);
        assert!(block.payload().iter().all(|&b| b == 0));
        assert!(manager.detect_memory_leaks().is_clean());
    }
}
