#![no_main]

use std::sync::Arc;

use cryptoblock::{BlockSerializer, CryptoContext, ReferenceContext};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static CTX: Lazy<Arc<dyn CryptoContext>> =
    Lazy::new(|| Arc::new(ReferenceContext::deterministic(0x1234_5678, ReferenceContext::DEFAULT_MODULUS)));

// The deserializer must never panic on arbitrary input, regardless of
// whether it came from this context or was simply mutated bytes.
fuzz_target!(|data: &[u8]| {
    let _ = BlockSerializer::new().deserialize(CTX.clone(), data);
});
