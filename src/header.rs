//! Block status state machine and the fixed header/footer record schema.

use std::fmt;
use std::sync::Arc;

use crate::context::CryptoContext;
use crate::error::{BlockError, Result};
use crate::scalar::{EncryptedAddress, EncryptedInt, EncryptedSize};
use crate::version::BlockVersion;

/// Fixed magic constant stored (encrypted) in every footer.
pub const MAGIC: i64 = 0xBE;
/// Smallest size a block may be created with.
pub const MIN_BLOCK_SIZE: i64 = 128;
/// Modulus integrity tags (checksums, MAC) are reduced into. Kept well
/// below any realistic plaintext modulus so a scheme with a small modulus
/// can still hold these fields.
pub const TAG_MODULUS: i64 = 65_537;

/// Reserved header size, in bytes: eight scalar fields at one machine word each.
pub const fn header_size() -> usize {
    8 * std::mem::size_of::<usize>()
}

/// Reserved footer size, in bytes: four scalar fields at one machine word each.
pub const fn footer_size() -> usize {
    4 * std::mem::size_of::<usize>()
}

/// The block allocation status. Transitions are restricted; see
/// [`BlockStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum BlockStatus {
    Free = 0,
    Allocated = 1,
    Corrupted = 2,
    Merging = 3,
    Splitting = 4,
}

impl BlockStatus {
    /// The edges permitted out of this state. Empty for `Corrupted`, the
    /// sole terminal state.
    pub fn valid_transitions(self) -> &'static [BlockStatus] {
        match self {
            BlockStatus::Free => &[BlockStatus::Allocated, BlockStatus::Splitting, BlockStatus::Merging],
            BlockStatus::Allocated => &[BlockStatus::Free],
            BlockStatus::Splitting => &[BlockStatus::Corrupted, BlockStatus::Free],
            BlockStatus::Merging => &[BlockStatus::Corrupted, BlockStatus::Free],
            BlockStatus::Corrupted => &[],
        }
    }

    pub fn can_transition_to(self, target: BlockStatus) -> bool {
        (target == BlockStatus::Corrupted && self != BlockStatus::Corrupted)
            || self.valid_transitions().contains(&target)
    }

    pub(crate) fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(BlockStatus::Free),
            1 => Ok(BlockStatus::Allocated),
            2 => Ok(BlockStatus::Corrupted),
            3 => Ok(BlockStatus::Merging),
            4 => Ok(BlockStatus::Splitting),
            other => Err(BlockError::IntegrityViolation(format!(
                "decrypted status {other} is outside the enumerated range"
            ))),
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::Free => "FREE",
            BlockStatus::Allocated => "ALLOCATED",
            BlockStatus::Corrupted => "CORRUPTED",
            BlockStatus::Merging => "MERGING",
            BlockStatus::Splitting => "SPLITTING",
        };
        f.write_str(s)
    }
}

/// Eight encrypted scalar fields, in the declaration order the serializer
/// writes them.
pub struct BlockHeader {
    pub size: EncryptedSize,
    pub status: EncryptedInt,
    pub next: EncryptedAddress,
    pub prev: EncryptedAddress,
    pub ts_created: EncryptedInt,
    pub ts_modified: EncryptedInt,
    pub checksum: EncryptedInt,
    pub version: EncryptedSize,
}

impl BlockHeader {
    pub(crate) fn new(
        ctx: Arc<dyn CryptoContext>,
        size: EncryptedSize,
        ts: i64,
    ) -> Result<Self> {
        Ok(Self {
            size,
            status: EncryptedInt::new(ctx.clone(), BlockStatus::Free as i64)?,
            next: EncryptedAddress::new(ctx.clone(), 0)?,
            prev: EncryptedAddress::new(ctx.clone(), 0)?,
            ts_created: EncryptedInt::new(ctx.clone(), ts)?,
            ts_modified: EncryptedInt::new(ctx.clone(), ts)?,
            checksum: EncryptedInt::new(ctx.clone(), 0)?,
            version: EncryptedSize::new(ctx, BlockVersion::CURRENT.pack())?,
        })
    }
}

/// Four encrypted scalar fields, in the declaration order the serializer
/// writes them.
pub struct BlockFooter {
    pub magic: EncryptedInt,
    pub payload_checksum: EncryptedInt,
    pub size_verify: EncryptedSize,
    pub mac: EncryptedInt,
}

impl BlockFooter {
    pub(crate) fn new(ctx: Arc<dyn CryptoContext>, size_verify: EncryptedSize) -> Result<Self> {
        Ok(Self {
            magic: EncryptedInt::new(ctx.clone(), MAGIC)?,
            payload_checksum: EncryptedInt::new(ctx.clone(), 0)?,
            size_verify,
            mac: EncryptedInt::new(ctx, 0)?,
        })
    }
}

/// `h = 1; for f in (size, status, ts_created mod 2^16, ts_modified mod 2^16): h = (h*31 + f) mod TAG_MODULUS`
pub(crate) fn header_checksum(size: i64, status: i64, ts_created: i64, ts_modified: i64) -> i64 {
    let fields = [size, status, ts_created & 0xFFFF, ts_modified & 0xFFFF];
    let mut h: i64 = 1;
    for f in fields {
        h = (h * 31 + f).rem_euclid(TAG_MODULUS);
    }
    h
}

/// `p = 0; for b in payload: p = (p*31 + b) mod TAG_MODULUS`
pub(crate) fn payload_checksum(payload: &[u8]) -> i64 {
    let mut p: i64 = 0;
    for &b in payload {
        p = (p * 31 + b as i64).rem_euclid(TAG_MODULUS);
    }
    p
}

/// `m = MAGIC; for f in (header_checksum, payload_checksum, size): m = (m*37 + f) mod TAG_MODULUS`
pub(crate) fn mac(header_checksum: i64, payload_checksum: i64, size: i64) -> i64 {
    let mut m: i64 = MAGIC;
    for f in [header_checksum, payload_checksum, size] {
        m = (m * 37 + f).rem_euclid(TAG_MODULUS);
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transition_table() {
        assert!(BlockStatus::Free.can_transition_to(BlockStatus::Allocated));
        assert!(BlockStatus::Free.can_transition_to(BlockStatus::Splitting));
        assert!(BlockStatus::Allocated.can_transition_to(BlockStatus::Free));
        assert!(!BlockStatus::Allocated.can_transition_to(BlockStatus::Splitting));
        assert!(BlockStatus::Splitting.can_transition_to(BlockStatus::Corrupted));
        assert!(BlockStatus::Splitting.can_transition_to(BlockStatus::Free));
        assert!(!BlockStatus::Corrupted.can_transition_to(BlockStatus::Free));
        assert!(BlockStatus::Merging.can_transition_to(BlockStatus::Corrupted));
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(header_checksum(128, 0, 1, 1), header_checksum(128, 0, 1, 1));
        assert_ne!(header_checksum(128, 0, 1, 1), header_checksum(129, 0, 1, 1));
    }
}
