//! The `CryptoContext` boundary and a deterministic reference implementation.
//!
//! The real homomorphic-encryption context — key generation, parameter
//! selection, ciphertext encode/decode, the actual homomorphic add/subtract —
//! is an external collaborator of this crate (see the crate's top-level
//! docs). [`CryptoContext`] is the trait that boundary is expressed as;
//! embedders back it with a real scheme (e.g. BFV/BGV via an FHE library).
//!
//! [`ReferenceContext`] is this crate's own stand-in, used by its tests,
//! benches, fuzz targets, and CLI demo, so known-answer tests have something
//! deterministic to run against: clearly documented, and **not a security
//! boundary**. Its "ciphertexts" are an additive mask over a fixed modulus,
//! not a cryptographic construction.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{BlockError, Result};

/// An opaque ciphertext produced by a [`CryptoContext`]'s encryption of a
/// single integer. The block subsystem only ever moves these around, adds
/// and subtracts them through the context, and serializes their byte form —
/// it never interprets the bytes directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    raw: i64,
}

impl Ciphertext {
    pub(crate) fn from_raw(raw: i64) -> Self {
        Self { raw }
    }

    pub(crate) fn raw(&self) -> i64 {
        self.raw
    }
}

/// Boundary consumed from the homomorphic-encryption context.
///
/// Implementations must be safe to share across the blocks that reference
/// them (`Arc<dyn CryptoContext>`), since many blocks typically share one
/// context.
pub trait CryptoContext: Send + Sync {
    /// Whether this context has completed key/parameter setup. Blocks must
    /// refuse to use an uninitialized context.
    fn is_initialized(&self) -> bool;

    /// The scheme's plaintext modulus. Every plaintext integer that enters a
    /// ciphertext through this context must be strictly less than this
    /// value (and non-negative).
    fn plaintext_modulus(&self) -> i64;

    /// Encrypt a single plaintext integer.
    fn encrypt(&self, value: i64) -> Result<Ciphertext>;

    /// Decrypt a ciphertext back to its plaintext integer.
    fn decrypt(&self, ct: &Ciphertext) -> Result<i64>;

    /// Homomorphic addition: `decrypt(add(a, b)) == decrypt(a) + decrypt(b)`.
    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext>;

    /// Homomorphic subtraction: `decrypt(subtract(a, b)) == decrypt(a) - decrypt(b)`.
    fn subtract(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext>;

    /// Opaque byte representation, for serialization.
    fn ciphertext_to_bytes(&self, ct: &Ciphertext) -> Vec<u8>;

    /// Inverse of [`CryptoContext::ciphertext_to_bytes`].
    fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<Ciphertext>;
}

fn euclid_mod(value: i64, modulus: i64) -> i64 {
    value.rem_euclid(modulus)
}

/// Deterministic, non-production stand-in for a real homomorphic context.
///
/// `encrypt(v)` stores `(v + mask) mod modulus`; `add`/`subtract` fold the
/// mask back in so the result is itself a valid single-masked ciphertext.
/// This gives the crate something to build and test the block algebra
/// against without pulling in an actual FHE library, which is out of scope
/// for this crate. It provides none of the real scheme's confidentiality
/// properties — do not use it to protect anything.
#[derive(Debug)]
pub struct ReferenceContext {
    mask: i64,
    modulus: i64,
    initialized: bool,
}

impl ReferenceContext {
    /// Default plaintext modulus: comfortably above the 1 MiB default
    /// payload ceiling plus header/footer overhead, while still well clear
    /// of `i64` overflow for the additive homomorphism above.
    pub const DEFAULT_MODULUS: i64 = 2_097_152;

    /// Construct a context with a random mask, suitable for tests that don't
    /// care about reproducibility.
    pub fn new() -> Self {
        Self::with_modulus(Self::DEFAULT_MODULUS)
    }

    /// Construct a context with a random mask and an explicit modulus.
    pub fn with_modulus(modulus: i64) -> Self {
        let mut buf = [0u8; 8];
        // getrandom failure here would mean the OS RNG is unavailable; fall
        // back to a fixed mask rather than panicking, since this context is
        // a test fixture, not production code.
        let mask = if getrandom::getrandom(&mut buf).is_ok() {
            i64::from_le_bytes(buf).rem_euclid(modulus)
        } else {
            0x5a5a_5a5a
        };
        Self {
            mask,
            modulus,
            initialized: true,
        }
    }

    /// Construct a context with a caller-chosen mask, for reproducible KATs.
    pub fn deterministic(mask: i64, modulus: i64) -> Self {
        Self {
            mask: mask.rem_euclid(modulus),
            modulus,
            initialized: true,
        }
    }

    /// Construct a context that reports itself as uninitialized, for
    /// exercising the `UninitializedContext` error path.
    pub fn uninitialized() -> Self {
        Self {
            mask: 0,
            modulus: Self::DEFAULT_MODULUS,
            initialized: false,
        }
    }
}

impl Default for ReferenceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoContext for ReferenceContext {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn plaintext_modulus(&self) -> i64 {
        self.modulus
    }

    fn encrypt(&self, value: i64) -> Result<Ciphertext> {
        if !self.initialized {
            return Err(BlockError::UninitializedContext);
        }
        if value < 0 || value >= self.modulus {
            return Err(BlockError::PlaintextOutOfRange {
                value,
                limit: self.modulus,
            });
        }
        Ok(Ciphertext::from_raw(euclid_mod(value + self.mask, self.modulus)))
    }

    fn decrypt(&self, ct: &Ciphertext) -> Result<i64> {
        if !self.initialized {
            return Err(BlockError::UninitializedContext);
        }
        Ok(euclid_mod(ct.raw() - self.mask, self.modulus))
    }

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        if !self.initialized {
            return Err(BlockError::UninitializedContext);
        }
        Ok(Ciphertext::from_raw(euclid_mod(
            a.raw() + b.raw() - self.mask,
            self.modulus,
        )))
    }

    fn subtract(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        if !self.initialized {
            return Err(BlockError::UninitializedContext);
        }
        Ok(Ciphertext::from_raw(euclid_mod(
            a.raw() - b.raw() + self.mask,
            self.modulus,
        )))
    }

    fn ciphertext_to_bytes(&self, ct: &Ciphertext) -> Vec<u8> {
        ct.raw().to_be_bytes().to_vec()
    }

    fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<Ciphertext> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BlockError::MalformedEncoding("ciphertext must be 8 bytes".into()))?;
        Ok(Ciphertext::from_raw(i64::from_be_bytes(arr)))
    }
}

/// Process-wide monotonic counter backing `ts_created`/`ts_modified`.
///
/// Not wall-clock time: unix epoch seconds would overflow the plaintext
/// modulus almost immediately, so timestamps here are ordering tokens, not
/// calendar values. See [`interpret_as_unix_seconds`] for the opt-in
/// conversion when a caller supplies a real clock mapping.
static TIMESTAMP_COUNTER: AtomicI64 = AtomicI64::new(1);

pub(crate) fn next_counter() -> i64 {
    TIMESTAMP_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Current value of the counter, without advancing it. A legitimately
/// assigned timestamp is always strictly less than any snapshot taken
/// afterward, since assigning one already advanced the counter past it;
/// the validator uses this to flag a timestamp that claims to be from the
/// future relative to this process's own counter.
pub(crate) fn counter_snapshot() -> i64 {
    TIMESTAMP_COUNTER.load(Ordering::SeqCst)
}

/// Map a counter tick back to unix seconds, given the tick that corresponds
/// to `epoch_unix_seconds` and the real-world duration each tick
/// represents. This subsystem never calls this itself; it exists purely for
/// consumers who have an external clock source and want calendar semantics,
/// per the crate's timestamp design notes above.
pub fn interpret_as_unix_seconds(
    counter_value: i64,
    reference_counter: i64,
    reference_unix_seconds: i64,
    seconds_per_tick: i64,
) -> i64 {
    reference_unix_seconds + (counter_value - reference_counter) * seconds_per_tick
}
