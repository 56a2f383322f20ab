#![no_main]

use std::sync::Arc;

use cryptoblock::{BlockLimits, BlockSerializer, BlockValidator, CryptoContext, ReferenceContext};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static CTX: Lazy<Arc<dyn CryptoContext>> =
    Lazy::new(|| Arc::new(ReferenceContext::deterministic(0x1234_5678, ReferenceContext::DEFAULT_MODULUS)));

// Exercises the "skip the integrity gate, then validate" path the CLI's
// `validate` command uses, since that's the one that must cope with
// arbitrarily tampered bytes without panicking.
fuzz_target!(|data: &[u8]| {
    if let Ok(block) = BlockSerializer::new().deserialize_unchecked(CTX.clone(), data, BlockLimits::default()) {
        let _ = BlockValidator::new().comprehensive_validation(&block);
    }
});
