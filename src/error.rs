//! Error types for the encrypted block subsystem.

use std::fmt;

use crate::header::BlockStatus;

/// Everything that can go wrong while creating, mutating, validating, or
/// serializing an [`crate::block::EncryptedBlock`].
#[derive(Debug)]
pub enum BlockError {
    /// The supplied `CryptoContext` has not been initialized.
    UninitializedContext,
    /// A plaintext integer exceeded the scheme's small modulus.
    PlaintextOutOfRange { value: i64, limit: i64 },
    /// A requested block size was below the allocator floor, or otherwise
    /// inconsistent with the header/footer reservation.
    InvalidSize { size: i64, reason: &'static str },
    /// A payload buffer would exceed the configured ceiling.
    PayloadTooLarge { requested: usize, limit: usize },
    /// `set_status` was asked to perform a transition that isn't on the
    /// allowed edge list for the current state.
    InvalidTransition { from: BlockStatus, to: BlockStatus },
    /// A mutating or validating method was called on a null/absent operand
    /// (e.g. `merge_blocks` given a corrupted block).
    NullOperand(&'static str),
    /// The underlying `CryptoContext` reported an encrypt/decrypt failure.
    CryptoFailure(String),
    /// A checksum, MAC, magic number, or size-verify field did not match.
    IntegrityViolation(String),
    /// Allocation of the payload buffer failed, or a resource (e.g. a page
    /// lock) could not be obtained.
    ResourceFailure(String),
    /// The serialized byte string was truncated, malformed, or carried an
    /// incompatible version.
    MalformedEncoding(String),
    /// `BlockVersion` of serialized data is incompatible with the version
    /// this build understands.
    IncompatibleVersion { found: u64, installed: u64 },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UninitializedContext => write!(f, "crypto context is not initialized"),
            Self::PlaintextOutOfRange { value, limit } => write!(
                f,
                "plaintext value {value} exceeds the permitted ceiling of {limit}"
            ),
            Self::InvalidSize { size, reason } => write!(f, "invalid block size {size}: {reason}"),
            Self::PayloadTooLarge { requested, limit } => write!(
                f,
                "payload of {requested} bytes exceeds the configured limit of {limit} bytes"
            ),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            Self::NullOperand(what) => write!(f, "missing required operand: {what}"),
            Self::CryptoFailure(msg) => write!(f, "cryptographic operation failed: {msg}"),
            Self::IntegrityViolation(msg) => write!(f, "integrity check failed: {msg}"),
            Self::ResourceFailure(msg) => write!(f, "resource allocation failed: {msg}"),
            Self::MalformedEncoding(msg) => write!(f, "malformed serialized block: {msg}"),
            Self::IncompatibleVersion { found, installed } => write!(
                f,
                "serialized block version {found} is incompatible with installed version {installed}"
            ),
        }
    }
}

impl std::error::Error for BlockError {}

/// Crate-wide result alias; every fallible public operation returns this.
pub type Result<T> = core::result::Result<T, BlockError>;
