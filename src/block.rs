//! `EncryptedBlock`: the allocator block itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zeroize::Zeroize;

use crate::context::{next_counter, CryptoContext};
use crate::error::{BlockError, Result};
use crate::header::{self, footer_size, header_size, BlockFooter, BlockHeader, BlockStatus, MIN_BLOCK_SIZE};
use crate::limits::BlockLimits;
use crate::scalar::{EncryptedAddress, EncryptedInt, EncryptedSize};
use crate::version::BlockVersion;

/// An allocator block whose metadata lives as ciphertexts and whose payload
/// is a plain byte buffer. Single-owner: non-`Clone`, movable.
pub struct EncryptedBlock {
    pub(crate) ctx: Arc<dyn CryptoContext>,
    pub(crate) header: BlockHeader,
    pub(crate) footer: BlockFooter,
    payload: Vec<u8>,
    payload_capacity: usize,
    is_locked: AtomicBool,
}

/// Result of a successful [`EncryptedBlock::split_block`]: left and right
/// halves, in address order.
pub struct SplitOutcome {
    pub left: EncryptedBlock,
    pub right: EncryptedBlock,
}

impl EncryptedBlock {
    fn validate_requested_size(ctx: &Arc<dyn CryptoContext>, size: i64) -> Result<()> {
        if !ctx.is_initialized() {
            return Err(BlockError::UninitializedContext);
        }
        let reserved = (header_size() + footer_size()) as i64;
        if size < MIN_BLOCK_SIZE {
            return Err(BlockError::InvalidSize {
                size,
                reason: "below MIN_BLOCK_SIZE",
            });
        }
        if size < reserved {
            return Err(BlockError::InvalidSize {
                size,
                reason: "below HEADER_SIZE + FOOTER_SIZE",
            });
        }
        Ok(())
    }

    /// Create a block of the given encrypted size, using default [`BlockLimits`].
    pub fn create(ctx: Arc<dyn CryptoContext>, encrypted_size: EncryptedSize) -> Result<Self> {
        Self::create_with_limits(ctx, encrypted_size, BlockLimits::default())
    }

    /// Create a block of the given encrypted size, enforcing `limits`.
    pub fn create_with_limits(
        ctx: Arc<dyn CryptoContext>,
        encrypted_size: EncryptedSize,
        limits: BlockLimits,
    ) -> Result<Self> {
        let size = encrypted_size.decrypt()?;
        Self::validate_requested_size(&ctx, size)?;

        let reserved = header_size() + footer_size();
        let payload_capacity = size as usize - reserved;
        if payload_capacity > limits.max_payload_bytes {
            return Err(BlockError::PayloadTooLarge {
                requested: payload_capacity,
                limit: limits.max_payload_bytes,
            });
        }

        let ts = next_counter();
        let header = BlockHeader::new(ctx.clone(), encrypted_size.clone(), ts)?;
        let footer = BlockFooter::new(ctx.clone(), encrypted_size)?;

        let mut block = Self {
            ctx,
            header,
            footer,
            payload: vec![0u8; payload_capacity],
            payload_capacity,
            is_locked: AtomicBool::new(false),
        };
        block.recompute_checksums()?;
        tracing::debug!(size, payload_capacity, "block created");
        Ok(block)
    }

    /// Reconstruct a block from already-decoded header/footer/payload,
    /// used by [`crate::serializer::BlockSerializer::deserialize`]. Does
    /// not itself validate integrity; callers check that separately.
    pub(crate) fn from_parts(
        ctx: Arc<dyn CryptoContext>,
        header: BlockHeader,
        footer: BlockFooter,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let payload_capacity = payload.len();
        Ok(Self {
            ctx,
            header,
            footer,
            payload,
            payload_capacity,
            is_locked: AtomicBool::new(false),
        })
    }

    /// Create a block by encrypting a plaintext size, using default [`BlockLimits`].
    pub fn create_from_plaintext_size(ctx: Arc<dyn CryptoContext>, n: i64) -> Result<Self> {
        Self::create_from_plaintext_size_with_limits(ctx, n, BlockLimits::default())
    }

    /// Create a block by encrypting a plaintext size, enforcing `limits`.
    pub fn create_from_plaintext_size_with_limits(
        ctx: Arc<dyn CryptoContext>,
        n: i64,
        limits: BlockLimits,
    ) -> Result<Self> {
        if n < 0 || n as usize > limits.max_plaintext_create_size {
            return Err(BlockError::InvalidSize {
                size: n,
                reason: "exceeds the configured plaintext create ceiling",
            });
        }
        let encrypted_size = EncryptedSize::new(ctx.clone(), n)?;
        Self::create_with_limits(ctx, encrypted_size, limits)
    }

    /// Current decrypted status.
    pub fn get_status(&self) -> Result<BlockStatus> {
        BlockStatus::from_i64(self.header.status.decrypt()?)
    }

    pub fn is_free(&self) -> Result<bool> {
        Ok(self.get_status()? == BlockStatus::Free)
    }

    pub fn is_allocated(&self) -> Result<bool> {
        Ok(self.get_status()? == BlockStatus::Allocated)
    }

    /// Transition to `new`, rejecting edges not on [`BlockStatus::valid_transitions`].
    pub fn set_status(&mut self, new: BlockStatus) -> Result<()> {
        let current = self.get_status()?;
        if !current.can_transition_to(new) {
            return Err(BlockError::InvalidTransition { from: current, to: new });
        }
        self.header.status = EncryptedInt::new(self.ctx.clone(), new as i64)?;
        self.update_timestamp()?;
        tracing::debug!(from = %current, to = %new, "status transition");
        Ok(())
    }

    pub fn get_plaintext_size(&self) -> Result<usize> {
        Ok(self.header.size.decrypt()? as usize)
    }

    pub fn get_payload_size(&self) -> usize {
        self.payload_capacity
    }

    pub fn get_encrypted_size(&self) -> &EncryptedSize {
        &self.header.size
    }

    fn encode_address(&self, addr: u64) -> Result<EncryptedAddress> {
        let value = i64::try_from(addr)
            .map_err(|_| BlockError::InvalidSize { size: addr as i64, reason: "address exceeds i64 range" })?;
        EncryptedAddress::new(self.ctx.clone(), value)
    }

    pub fn set_next(&mut self, addr: u64) -> Result<()> {
        self.header.next = self.encode_address(addr)?;
        self.update_timestamp()
    }

    pub fn set_prev(&mut self, addr: u64) -> Result<()> {
        self.header.prev = self.encode_address(addr)?;
        self.update_timestamp()
    }

    pub fn get_next(&self) -> Result<u64> {
        Ok(self.header.next.decrypt()? as u64)
    }

    pub fn get_prev(&self) -> Result<u64> {
        Ok(self.header.prev.decrypt()? as u64)
    }

    /// Bump `ts_modified` from the process-wide monotonic counter, then
    /// recompute checksums so the header stays self-consistent. Called by
    /// every other mutator; safe (if redundant) to call directly.
    pub fn update_timestamp(&mut self) -> Result<()> {
        let ts = next_counter();
        self.header.ts_modified = EncryptedInt::new(self.ctx.clone(), ts)?;
        self.recompute_checksums()
    }

    pub fn get_creation_time(&self) -> Result<i64> {
        self.header.ts_created.decrypt()
    }

    pub fn get_modification_time(&self) -> Result<i64> {
        self.header.ts_modified.decrypt()
    }

    pub fn get_version(&self) -> Result<BlockVersion> {
        Ok(BlockVersion::unpack(self.header.version.decrypt()?))
    }

    pub fn is_version_compatible(&self, required: BlockVersion) -> Result<bool> {
        Ok(self.get_version()?.is_compatible_with(required))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Direct mutable access to the payload buffer. Callers must invoke
    /// [`EncryptedBlock::recompute_checksums`] afterward; prefer
    /// [`EncryptedBlock::write_payload`] when a single bounded write
    /// suffices, since it does this for you.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Write `data` at `offset` within the payload buffer and recompute
    /// checksums, bounds-checked against `payload_capacity`.
    pub fn write_payload(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .ok_or(BlockError::PayloadTooLarge { requested: usize::MAX, limit: self.payload_capacity })?;
        if end > self.payload_capacity {
            return Err(BlockError::PayloadTooLarge { requested: end, limit: self.payload_capacity });
        }
        self.payload[offset..end].copy_from_slice(data);
        self.recompute_checksums()
    }

    fn scalars_equal(&self, a: &EncryptedInt, b: &EncryptedInt) -> Result<bool> {
        a.equals(b)
    }

    /// Recompute header checksum, payload checksum, and MAC from the
    /// current decrypted field values, per the polynomial hash defined in
    /// the crate docs. Must be called (and is, automatically) after any
    /// mutation to size, status, links, timestamps, or payload.
    pub fn recompute_checksums(&mut self) -> Result<()> {
        if header::TAG_MODULUS >= self.ctx.plaintext_modulus() {
            return Err(BlockError::PlaintextOutOfRange {
                value: header::TAG_MODULUS,
                limit: self.ctx.plaintext_modulus(),
            });
        }
        let size = self.header.size.decrypt()?;
        let status = self.header.status.decrypt()?;
        let ts_created = self.header.ts_created.decrypt()?;
        let ts_modified = self.header.ts_modified.decrypt()?;

        let h = header::header_checksum(size, status, ts_created, ts_modified);
        self.header.checksum = EncryptedInt::new(self.ctx.clone(), h)?;

        let p = header::payload_checksum(&self.payload);
        self.footer.payload_checksum = EncryptedInt::new(self.ctx.clone(), p)?;

        let m = header::mac(h, p, size);
        self.footer.mac = EncryptedInt::new(self.ctx.clone(), m)?;

        Ok(())
    }

    pub fn verify_magic_number(&self) -> Result<bool> {
        let expected = EncryptedInt::new(self.ctx.clone(), header::MAGIC)?;
        self.scalars_equal(&self.footer.magic, &expected)
    }

    pub fn verify_size_consistency(&self) -> Result<bool> {
        self.footer.size_verify.equals(&self.header.size)
    }

    fn verify_header_checksum(&self) -> Result<bool> {
        let size = self.header.size.decrypt()?;
        let status = self.header.status.decrypt()?;
        let ts_created = self.header.ts_created.decrypt()?;
        let ts_modified = self.header.ts_modified.decrypt()?;
        let expected = header::header_checksum(size, status, ts_created, ts_modified);
        let expected_ct = EncryptedInt::new(self.ctx.clone(), expected)?;
        self.scalars_equal(&self.header.checksum, &expected_ct)
    }

    fn verify_payload_checksum(&self) -> Result<bool> {
        let expected = header::payload_checksum(&self.payload);
        let expected_ct = EncryptedInt::new(self.ctx.clone(), expected)?;
        self.scalars_equal(&self.footer.payload_checksum, &expected_ct)
    }

    fn verify_mac(&self) -> Result<bool> {
        let h = self.header.checksum.decrypt()?;
        let p = self.footer.payload_checksum.decrypt()?;
        let size = self.header.size.decrypt()?;
        let expected = header::mac(h, p, size);
        let expected_ct = EncryptedInt::new(self.ctx.clone(), expected)?;
        self.scalars_equal(&self.footer.mac, &expected_ct)
    }

    /// Checks every invariant from the crate docs' block invariant list,
    /// short-circuiting `Ok(false)` on the first mismatch rather than
    /// erroring — a failed check is a negative result, not a crypto error.
    pub fn validate_integrity(&self) -> Result<bool> {
        if !self.verify_magic_number()? {
            return Ok(false);
        }
        if !self.verify_size_consistency()? {
            return Ok(false);
        }
        if !self.verify_header_checksum()? {
            return Ok(false);
        }
        if !self.verify_payload_checksum()? {
            return Ok(false);
        }
        if !self.verify_mac()? {
            return Ok(false);
        }
        let size = self.header.size.decrypt()?;
        if size < MIN_BLOCK_SIZE || (size as usize) < header_size() + footer_size() {
            return Ok(false);
        }
        if BlockStatus::from_i64(self.header.status.decrypt()?).is_err() {
            return Ok(false);
        }
        if self.payload_capacity != size as usize - header_size() - footer_size() {
            return Ok(false);
        }
        let ts_created = self.header.ts_created.decrypt()?;
        let ts_modified = self.header.ts_modified.decrypt()?;
        if ts_modified < ts_created {
            return Ok(false);
        }
        Ok(true)
    }

    /// Run [`EncryptedBlock::validate_integrity`] and turn a negative
    /// result into an error, for call sites that want `?` propagation
    /// instead of a bool check.
    pub fn self_test(&self) -> Result<()> {
        if self.validate_integrity()? {
            Ok(())
        } else {
            Err(BlockError::IntegrityViolation(
                "block failed its own integrity self-test".into(),
            ))
        }
    }

    /// Zero the payload buffer. Also run automatically on drop.
    pub fn secure_wipe(&mut self) {
        self.payload.zeroize();
    }

    #[cfg(all(unix, feature = "mlock"))]
    pub fn lock_memory(&mut self) -> Result<()> {
        if self.payload.is_empty() {
            self.is_locked.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let ptr = self.payload.as_ptr() as *const libc::c_void;
        let rc = unsafe { libc::mlock(ptr, self.payload.len()) };
        if rc != 0 {
            return Err(BlockError::ResourceFailure(format!(
                "mlock failed with errno {}",
                std::io::Error::last_os_error()
            )));
        }
        self.is_locked.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[cfg(not(all(unix, feature = "mlock")))]
    pub fn lock_memory(&mut self) -> Result<()> {
        self.is_locked.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[cfg(all(unix, feature = "mlock"))]
    pub fn unlock_memory(&mut self) -> Result<()> {
        if !self.payload.is_empty() {
            let ptr = self.payload.as_ptr() as *const libc::c_void;
            let rc = unsafe { libc::munlock(ptr, self.payload.len()) };
            if rc != 0 {
                return Err(BlockError::ResourceFailure(format!(
                    "munlock failed with errno {}",
                    std::io::Error::last_os_error()
                )));
            }
        }
        self.is_locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[cfg(not(all(unix, feature = "mlock")))]
    pub fn unlock_memory(&mut self) -> Result<()> {
        self.is_locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked.load(Ordering::SeqCst)
    }

    /// Human-readable summary for logs/CLI `inspect` output. Decrypts
    /// every field, so don't call this on a hot path.
    pub fn debug_info(&self) -> String {
        let status = self
            .get_status()
            .map(|s| s.to_string())
            .unwrap_or_else(|e| format!("<unreadable: {e}>"));
        let size = self.get_plaintext_size().unwrap_or(0);
        let version = self.get_version().map(|v| v.to_string()).unwrap_or_else(|_| "?".into());
        let valid = self.validate_integrity().unwrap_or(false);
        format!(
            "EncryptedBlock {{ size: {size}, status: {status}, version: {version}, \
             payload_capacity: {}, locked: {}, integrity_valid: {valid} }}",
            self.payload_capacity,
            self.is_locked()
        )
    }

    /// Split this free block into two at `split_size`. On success `self`
    /// is transitioned to `CORRUPTED` and left empty (payload zeroed); on
    /// any failure after the `SPLITTING` transition, `self` is restored to
    /// `FREE` and the error is surfaced.
    pub fn split_block(&mut self, split_size: EncryptedSize, limits: BlockLimits) -> Result<SplitOutcome> {
        if self.get_status()? != BlockStatus::Free {
            return Err(BlockError::InvalidSize {
                size: 0,
                reason: "split requires a FREE block",
            });
        }
        let total = self.get_plaintext_size()? as i64;
        let left_size = split_size.decrypt()?;
        let right_size = total - left_size;
        if left_size >= total {
            return Err(BlockError::InvalidSize { size: left_size, reason: "split_size must be < block size" });
        }
        if left_size < MIN_BLOCK_SIZE || right_size < MIN_BLOCK_SIZE {
            return Err(BlockError::InvalidSize { size: left_size, reason: "both halves must be >= MIN_BLOCK_SIZE" });
        }

        self.set_status(BlockStatus::Splitting)?;

        let attempt = (|| -> Result<SplitOutcome> {
            let mut left = EncryptedBlock::create_with_limits(self.ctx.clone(), split_size, limits)?;
            let right_size_ct = EncryptedSize::new(self.ctx.clone(), right_size)?;
            let mut right = EncryptedBlock::create_with_limits(self.ctx.clone(), right_size_ct, limits)?;

            let left_copy = left.payload_capacity.min(self.payload_capacity);
            left.payload[..left_copy].copy_from_slice(&self.payload[..left_copy]);

            let remaining = self.payload_capacity - left_copy;
            let right_copy = right.payload_capacity.min(remaining);
            right.payload[..right_copy].copy_from_slice(&self.payload[left_copy..left_copy + right_copy]);

            let prev = self.get_prev()?;
            let next = self.get_next()?;
            left.set_prev(prev)?;
            right.set_next(next)?;
            // This call's contract is to link `left.next`/`right.prev` to
            // each other, and fix up the stale `self.prev`/`self.next`
            // back-pointers, once the caller has assigned `left` and
            // `right` real addresses — not here, since a freshly split
            // block is a value with no address of its own yet (it is moved
            // out of the allocator's address space by this call). A
            // deliberate deviation from linking siblings inline: see
            // DESIGN.md.

            left.recompute_checksums()?;
            right.recompute_checksums()?;

            Ok(SplitOutcome { left, right })
        })();

        match attempt {
            Ok(outcome) => {
                self.set_status(BlockStatus::Corrupted)?;
                self.secure_wipe();
                tracing::debug!(left = outcome.left.payload_capacity, right = outcome.right.payload_capacity, "block split");
                Ok(outcome)
            }
            Err(e) => {
                self.set_status(BlockStatus::Free)?;
                tracing::warn!(error = %e, "split failed, rolled back to FREE");
                Err(e)
            }
        }
    }

    /// Merge two free blocks into one. On success both inputs are
    /// transitioned to `CORRUPTED`; on failure after the `MERGING`
    /// transition, both are restored to `FREE`.
    pub fn merge_blocks(b1: &mut EncryptedBlock, b2: &mut EncryptedBlock, limits: BlockLimits) -> Result<EncryptedBlock> {
        if b1.get_status()? != BlockStatus::Free || b2.get_status()? != BlockStatus::Free {
            return Err(BlockError::InvalidTransition { from: BlockStatus::Free, to: BlockStatus::Merging });
        }
        if !Arc::ptr_eq(&b1.ctx, &b2.ctx) {
            return Err(BlockError::CryptoFailure("merge requires blocks on the same crypto context".into()));
        }

        b1.set_status(BlockStatus::Merging)?;
        b2.set_status(BlockStatus::Merging)?;

        let attempt = (|| -> Result<EncryptedBlock> {
            let merged_size = b1.get_plaintext_size()? as i64 + b2.get_plaintext_size()? as i64;
            let merged_size_ct = EncryptedSize::new(b1.ctx.clone(), merged_size)?;
            let mut merged = EncryptedBlock::create_with_limits(b1.ctx.clone(), merged_size_ct, limits)?;

            let head = b1.payload_capacity.min(merged.payload_capacity);
            merged.payload[..head].copy_from_slice(&b1.payload[..head]);
            let remaining = merged.payload_capacity - head;
            let tail = b2.payload_capacity.min(remaining);
            merged.payload[head..head + tail].copy_from_slice(&b2.payload[..tail]);

            let prev = b1.get_prev()?;
            let next = b2.get_next()?;
            merged.set_prev(prev)?;
            merged.set_next(next)?;
            merged.recompute_checksums()?;
            Ok(merged)
        })();

        match attempt {
            Ok(merged) => {
                b1.set_status(BlockStatus::Corrupted)?;
                b1.secure_wipe();
                b2.set_status(BlockStatus::Corrupted)?;
                b2.secure_wipe();
                tracing::debug!(size = merged.payload_capacity, "blocks merged");
                Ok(merged)
            }
            Err(e) => {
                b1.set_status(BlockStatus::Free)?;
                b2.set_status(BlockStatus::Free)?;
                tracing::warn!(error = %e, "merge failed, rolled back to FREE");
                Err(e)
            }
        }
    }
}

impl Drop for EncryptedBlock {
    fn drop(&mut self) {
        self.secure_wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReferenceContext;

    fn ctx() -> Arc<dyn CryptoContext> {
        Arc::new(ReferenceContext::new())
    }

    #[test]
    fn create_from_plaintext_size_basic() {
        let block = EncryptedBlock::create_from_plaintext_size(ctx(), 256).unwrap();
        assert_eq!(block.get_plaintext_size().unwrap(), 256);
        assert!(block.is_free().unwrap());
        assert!(block.validate_integrity().unwrap());
    }

    #[test]
    fn below_min_size_rejected() {
        let err = EncryptedBlock::create_from_plaintext_size(ctx(), 32).unwrap_err();
        assert!(matches!(err, BlockError::InvalidSize { .. }));
    }

    #[test]
    fn uninitialized_context_rejected() {
        let c: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::uninitialized());
        let err = EncryptedBlock::create_from_plaintext_size(c, 128).unwrap_err();
        assert!(matches!(err, BlockError::UninitializedContext));
    }

    #[test]
    fn allocate_then_free_roundtrip() {
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx(), 256).unwrap();
        let t0 = block.get_modification_time().unwrap();
        block.set_status(BlockStatus::Allocated).unwrap();
        let t1 = block.get_modification_time().unwrap();
        block.set_status(BlockStatus::Free).unwrap();
        let t2 = block.get_modification_time().unwrap();
        assert!(t1 > t0);
        assert!(t2 > t1);
        assert!(block.validate_integrity().unwrap());
    }

    #[test]
    fn split_requires_free_status() {
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx(), 256).unwrap();
        block.set_status(BlockStatus::Allocated).unwrap();
        let c = ctx();
        let split_size = EncryptedSize::new(c, 128).unwrap();
        let err = block.split_block(split_size, BlockLimits::default()).unwrap_err();
        assert!(matches!(err, BlockError::InvalidSize { .. }));
    }

    #[test]
    fn split_then_merge_round_trip() {
        let c = ctx();
        let mut block = EncryptedBlock::create_from_plaintext_size(c.clone(), 256).unwrap();
        let split_size = EncryptedSize::new(c.clone(), 128).unwrap();
        let outcome = block.split_block(split_size, BlockLimits::default()).unwrap();
        assert_eq!(block.get_status().unwrap(), BlockStatus::Corrupted);
        assert_eq!(outcome.left.get_plaintext_size().unwrap() + outcome.right.get_plaintext_size().unwrap(), 256);
        assert!(outcome.left.validate_integrity().unwrap());
        assert!(outcome.right.validate_integrity().unwrap());

        let mut left = outcome.left;
        let mut right = outcome.right;
        let merged = EncryptedBlock::merge_blocks(&mut left, &mut right, BlockLimits::default()).unwrap();
        assert_eq!(merged.get_plaintext_size().unwrap(), 256);
        assert_eq!(left.get_status().unwrap(), BlockStatus::Corrupted);
        assert_eq!(right.get_status().unwrap(), BlockStatus::Corrupted);
        assert!(merged.validate_integrity().unwrap());
    }

    #[test]
    fn tamper_detected_by_validate_integrity() {
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx(), 256).unwrap();
        assert!(block.validate_integrity().unwrap());
        block.footer.magic = EncryptedInt::new(block.ctx.clone(), 1).unwrap();
        assert!(!block.validate_integrity().unwrap());
    }
}
