//! Allocator memory blocks whose metadata lives as homomorphically
//! encrypted ciphertexts.
//!
//! An [`EncryptedBlock`] owns a header and footer of encrypted scalars
//! (size, status, link pointers, timestamps, checksums, a MAC, and a magic
//! constant) plus a plaintext payload buffer. An attacker with read access
//! to a block's in-memory representation cannot recover its size,
//! allocation status, link topology, or timestamps without the decryption
//! key held by a [`CryptoContext`] — yet split, merge, and validation still
//! work, through a mix of homomorphic arithmetic (for the comparisons
//! integrity checking needs) and controlled decryptions (for the few
//! operations that must branch on plaintext).
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use cryptoblock::{BlockStatus, CryptoContext, EncryptedBlock, ReferenceContext};
//!
//! let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
//! let mut block = EncryptedBlock::create_from_plaintext_size(ctx, 256)?;
//! assert!(block.is_free()?);
//! block.set_status(BlockStatus::Allocated)?;
//! assert!(block.validate_integrity()?);
//! # Ok::<(), cryptoblock::BlockError>(())
//! ```
//!
//! ## What this crate does not do
//!
//! The real homomorphic-encryption context (key generation, parameter
//! selection, ciphertext wire format, the actual homomorphic add/subtract)
//! is an external collaborator, consumed through the [`CryptoContext`]
//! trait. [`ReferenceContext`] is this crate's own deterministic stand-in
//! for tests, benches, fuzz targets, and the CLI — it provides none of a
//! real scheme's confidentiality properties. This crate also has no
//! free-list or allocation policy, no heap manager, and no logging sink of
//! its own; it only emits `tracing` events at its own operation seams for
//! whatever sink the embedding application wires up.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

mod block;
mod context;
mod error;
mod header;
mod lifecycle;
mod limits;
mod scalar;
mod serializer;
mod validator;
mod version;

pub use block::{EncryptedBlock, SplitOutcome};
pub use context::{interpret_as_unix_seconds, Ciphertext, CryptoContext, ReferenceContext};
pub use error::{BlockError, Result};
pub use header::{footer_size, header_size, BlockStatus, MAGIC, MIN_BLOCK_SIZE, TAG_MODULUS};
pub use lifecycle::{BlockLifecycleManager, LeakReport, LifecycleStats};
pub use limits::BlockLimits;
pub use scalar::{
    AddressRole, EncryptedAddress, EncryptedInt, EncryptedScalar, EncryptedSize, IntRole, ScalarRole, SizeRole,
};
pub use serializer::BlockSerializer;
pub use validator::{BlockValidator, ValidationReport};
pub use version::BlockVersion;
