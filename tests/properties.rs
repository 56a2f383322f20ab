//! Property-based checks of the universal invariants and the split/merge
//! laws, exercised over generated sizes and payloads rather than the fixed
//! scenarios in `tests/invariants.rs`.

use std::sync::Arc;

use cryptoblock::{
    BlockLimits, BlockStatus, CryptoContext, EncryptedBlock, EncryptedSize, ReferenceContext, MIN_BLOCK_SIZE,
};
use proptest::prelude::*;

fn ctx() -> Arc<dyn CryptoContext> {
    Arc::new(ReferenceContext::new())
}

fn arb_size() -> impl Strategy<Value = i64> {
    MIN_BLOCK_SIZE..4096i64
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256)
}

proptest! {
    #[test]
    fn created_block_satisfies_universal_invariants(size in arb_size(), payload in arb_payload()) {
        let block_ctx = ctx();
        let mut block = EncryptedBlock::create_from_plaintext_size(block_ctx, size).unwrap();
        let write_len = payload.len().min(block.get_payload_size());
        block.write_payload(0, &payload[..write_len]).unwrap();

        prop_assert!(block.validate_integrity().unwrap());
        prop_assert!(block.verify_magic_number().unwrap());
        prop_assert!(block.verify_size_consistency().unwrap());
        prop_assert_eq!(block.get_plaintext_size().unwrap() as i64, size);
        prop_assert!(block.get_plaintext_size().unwrap() as i64 >= MIN_BLOCK_SIZE);
        prop_assert!(block.get_modification_time().unwrap() >= block.get_creation_time().unwrap());
    }

    #[test]
    fn split_preserves_total_size_and_corrupts_parent(
        total in (2 * MIN_BLOCK_SIZE)..4096i64,
        split_fraction in 0.05f64..0.95f64,
    ) {
        let block_ctx = ctx();
        let mut block = EncryptedBlock::create_from_plaintext_size(block_ctx.clone(), total).unwrap();
        let left_size = ((total as f64) * split_fraction) as i64;
        let left_size = left_size.clamp(MIN_BLOCK_SIZE, total - MIN_BLOCK_SIZE);
        let split_size = EncryptedSize::new(block_ctx, left_size).unwrap();

        let outcome = block.split_block(split_size, BlockLimits::default()).unwrap();

        prop_assert_eq!(
            outcome.left.get_plaintext_size().unwrap() + outcome.right.get_plaintext_size().unwrap(),
            total as usize
        );
        prop_assert_eq!(block.get_status().unwrap(), BlockStatus::Corrupted);
        prop_assert!(outcome.left.validate_integrity().unwrap());
        prop_assert!(outcome.right.validate_integrity().unwrap());
    }

    #[test]
    fn merge_preserves_total_size_and_corrupts_inputs(
        a_size in MIN_BLOCK_SIZE..2048i64,
        b_size in MIN_BLOCK_SIZE..2048i64,
    ) {
        let block_ctx = ctx();
        let mut a = EncryptedBlock::create_from_plaintext_size(block_ctx.clone(), a_size).unwrap();
        let mut b = EncryptedBlock::create_from_plaintext_size(block_ctx, b_size).unwrap();
        let merged = EncryptedBlock::merge_blocks(&mut a, &mut b, BlockLimits::default()).unwrap();

        prop_assert_eq!(merged.get_plaintext_size().unwrap() as i64, a_size + b_size);
        prop_assert_eq!(a.get_status().unwrap(), BlockStatus::Corrupted);
        prop_assert_eq!(b.get_status().unwrap(), BlockStatus::Corrupted);
        prop_assert!(merged.validate_integrity().unwrap());
    }
}
