//! Defensive ceilings surfaced as configuration rather than hard-coded.
//!
//! The 1 MiB payload ceiling and the 786,432 plaintext-size ceiling are
//! conservative guesses, not values derived from any particular homomorphic
//! scheme's parameters. Callers that know their scheme's real limits should
//! construct a [`BlockLimits`] and use the `_with_limits` constructors.

/// Upper bounds enforced by [`crate::block::EncryptedBlock`] construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    /// Largest payload buffer `create`/`create_with_limits` will allocate.
    pub max_payload_bytes: usize,
    /// Largest plaintext accepted by `create_from_plaintext_size`.
    pub max_plaintext_create_size: usize,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1 << 20,
            max_plaintext_create_size: 786_432,
        }
    }
}
