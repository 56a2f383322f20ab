//! Single-block and chain-level corruption/tampering detection.

use std::time::Instant;

use crate::block::EncryptedBlock;
use crate::context::counter_snapshot;
use crate::error::Result;
use crate::header::BlockStatus;
use crate::version::BlockVersion;

/// Output of [`BlockValidator::comprehensive_validation`] and
/// [`BlockValidator::validate_chain`]. Always produced, even for an invalid
/// block or chain — a failed validation is data, not an error.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub blocks_checked: usize,
    pub elapsed_microseconds: u64,
}

impl ValidationReport {
    fn push_error(&mut self, msg: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(msg.into());
    }

    fn push_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Stateless; every method borrows the blocks it checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockValidator {
    required_version: BlockVersion,
}

impl BlockValidator {
    pub fn new() -> Self {
        Self {
            required_version: BlockVersion::CURRENT,
        }
    }

    /// Validate against a specific installed version rather than the
    /// crate's own current version — useful when embedding this validator
    /// in a context that pins an older compatible schema.
    pub fn with_required_version(required_version: BlockVersion) -> Self {
        Self { required_version }
    }

    fn check_single(&self, block: &EncryptedBlock, report: &mut ValidationReport) -> Result<()> {
        if !block.verify_magic_number()? {
            report.push_error("magic number mismatch");
        }
        if !block.verify_size_consistency()? {
            report.push_error("size_verify does not match header.size");
        }
        if !block.validate_integrity()? {
            report.push_error("header checksum, payload checksum, or MAC mismatch");
        }

        let version = block.get_version()?;
        if !version.is_compatible_with(self.required_version) {
            report.push_error(format!(
                "block version {version} is incompatible with installed version {}",
                self.required_version
            ));
        }

        let ts_created = block.get_creation_time()?;
        let ts_modified = block.get_modification_time()?;
        if ts_modified < ts_created {
            report.push_error("ts_modified precedes ts_created");
        }
        let snapshot = counter_snapshot();
        if ts_created > snapshot || ts_modified > snapshot {
            report.push_error("timestamp is ahead of the process-wide counter snapshot");
        }

        if block.get_status().is_err() {
            report.push_error("status value outside the enumerated range");
        }

        Ok(())
    }

    /// Run every single-block check and return a report; never short-circuits
    /// on the first failure so all applicable issues are surfaced at once.
    pub fn comprehensive_validation(&self, block: &EncryptedBlock) -> Result<ValidationReport> {
        let start = Instant::now();
        let mut report = ValidationReport {
            is_valid: true,
            blocks_checked: 1,
            ..Default::default()
        };
        self.check_single(block, &mut report)?;
        report.elapsed_microseconds = start.elapsed().as_micros() as u64;
        Ok(report)
    }

    /// Validate an ordered chain. `blocks` pairs each block with the
    /// address it is known to live at; this subsystem has no allocator of
    /// its own, so chain-level checks that need "where is this block"
    /// (link continuity, region overlap) take that address from the caller
    /// rather than inferring it.
    pub fn validate_chain(&self, blocks: &[(u64, &EncryptedBlock)]) -> Result<ValidationReport> {
        let start = Instant::now();
        let mut report = ValidationReport {
            is_valid: true,
            blocks_checked: blocks.len(),
            ..Default::default()
        };

        let mut corrupted_count = 0usize;
        for (addr, block) in blocks {
            self.check_single(block, &mut report)?;
            if block.get_status()? == BlockStatus::Corrupted {
                corrupted_count += 1;
            }
            let _ = addr;
        }

        for pair in blocks.windows(2) {
            let (addr_a, a) = pair[0];
            let (addr_b, b) = pair[1];
            let a_next = a.get_next()?;
            let b_prev = b.get_prev()?;
            if a_next != addr_b {
                report.push_error(format!(
                    "link discontinuity: block at {addr_a:#x} points next to {a_next:#x}, expected {addr_b:#x}"
                ));
            }
            if b_prev != addr_a {
                report.push_error(format!(
                    "link discontinuity: block at {addr_b:#x} points prev to {b_prev:#x}, expected {addr_a:#x}"
                ));
            }
        }

        let mut regions: Vec<(u64, u64)> = Vec::with_capacity(blocks.len());
        for (addr, block) in blocks {
            let size = block.get_plaintext_size()? as u64;
            regions.push((*addr, *addr + size));
        }
        regions.sort_unstable();
        for pair in regions.windows(2) {
            if pair[0].1 > pair[1].0 {
                report.push_error(format!(
                    "overlapping regions: [{:#x}, {:#x}) and [{:#x}, {:#x})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                ));
            }
        }

        if !blocks.is_empty() {
            let fraction_corrupted = corrupted_count as f64 / blocks.len() as f64;
            if fraction_corrupted > 0.5 {
                report.push_warning(format!(
                    "{corrupted_count} of {} blocks ({:.0}%) are CORRUPTED",
                    blocks.len(),
                    fraction_corrupted * 100.0
                ));
            }
        }

        report.elapsed_microseconds = start.elapsed().as_micros() as u64;
        if !report.errors.is_empty() {
            tracing::warn!(errors = report.errors.len(), "chain validation found errors");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReferenceContext;
    use std::sync::Arc;

    #[test]
    fn valid_block_passes() {
        let ctx: Arc<dyn crate::context::CryptoContext> = Arc::new(ReferenceContext::new());
        let block = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        let report = BlockValidator::new().comprehensive_validation(&block).unwrap();
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.blocks_checked, 1);
    }

    #[test]
    fn future_timestamp_detected() {
        let ctx: Arc<dyn crate::context::CryptoContext> = Arc::new(ReferenceContext::new());
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        let far_future = counter_snapshot() + 1_000_000;
        block.header.ts_modified = crate::scalar::EncryptedInt::new(ctx, far_future).unwrap();

        let report = BlockValidator::new().comprehensive_validation(&block).unwrap();
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("ahead of the process-wide counter")));
    }

    #[test]
    fn chain_link_discontinuity_detected() {
        let ctx: Arc<dyn crate::context::CryptoContext> = Arc::new(ReferenceContext::new());
        let mut a = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        let b = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        a.set_next(0xDEAD).unwrap();
        let report = BlockValidator::new()
            .validate_chain(&[(0x1000, &a), (0x2000, &b)])
            .unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("link discontinuity")));
    }

    #[test]
    fn chain_overlap_detected() {
        let ctx: Arc<dyn crate::context::CryptoContext> = Arc::new(ReferenceContext::new());
        let a = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        let b = EncryptedBlock::create_from_plaintext_size(ctx, 256).unwrap();
        let report = BlockValidator::new()
            .validate_chain(&[(0x1000, &a), (0x1080, &b)])
            .unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("overlapping")));
    }
}
