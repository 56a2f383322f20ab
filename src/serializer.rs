//! Canonical byte layout for a block and for chains of blocks.
//!
//! Layout: `[version:packed i64][header fields][footer fields][payload_size][payload bytes]`,
//! each scalar field written via the context's opaque ciphertext-byte
//! representation. Chain framing uses a length-prefixed TLV discipline: a
//! `u32` block count, then one `[u32 length][bytes]` record per block.

use std::sync::Arc;

use crate::block::EncryptedBlock;
use crate::context::CryptoContext;
use crate::error::{BlockError, Result};
use crate::header::{BlockFooter, BlockHeader};
use crate::limits::BlockLimits;
use crate::scalar::{EncryptedAddress, EncryptedInt, EncryptedSize};
use crate::version::BlockVersion;

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_len_prefixed<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a [u8]> {
    if buf.len() < *cursor + 4 {
        return Err(BlockError::MalformedEncoding("truncated length prefix".into()));
    }
    let len = u32::from_be_bytes(buf[*cursor..*cursor + 4].try_into().unwrap()) as usize;
    *cursor += 4;
    if buf.len() < *cursor + len {
        return Err(BlockError::MalformedEncoding("truncated field".into()));
    }
    let slice = &buf[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

/// Stateless codec; holds only the version this build expects on read.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockSerializer {
    required_version: BlockVersion,
}

impl BlockSerializer {
    pub fn new() -> Self {
        Self {
            required_version: BlockVersion::CURRENT,
        }
    }

    pub fn with_required_version(required_version: BlockVersion) -> Self {
        Self { required_version }
    }

    pub fn serialize(&self, block: &EncryptedBlock) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&block.header.version.decrypt()?.to_be_bytes());

        write_len_prefixed(&mut out, &block.header.size.to_bytes());
        write_len_prefixed(&mut out, &block.header.status.to_bytes());
        write_len_prefixed(&mut out, &block.header.next.to_bytes());
        write_len_prefixed(&mut out, &block.header.prev.to_bytes());
        write_len_prefixed(&mut out, &block.header.ts_created.to_bytes());
        write_len_prefixed(&mut out, &block.header.ts_modified.to_bytes());
        write_len_prefixed(&mut out, &block.header.checksum.to_bytes());
        write_len_prefixed(&mut out, &block.header.version.to_bytes());

        write_len_prefixed(&mut out, &block.footer.magic.to_bytes());
        write_len_prefixed(&mut out, &block.footer.payload_checksum.to_bytes());
        write_len_prefixed(&mut out, &block.footer.size_verify.to_bytes());
        write_len_prefixed(&mut out, &block.footer.mac.to_bytes());

        out.extend_from_slice(&(block.payload().len() as u64).to_be_bytes());
        out.extend_from_slice(block.payload());
        Ok(out)
    }

    /// Parse, reject on version incompatibility, reconstruct the block,
    /// and validate its integrity before returning it.
    pub fn deserialize(&self, ctx: Arc<dyn CryptoContext>, bytes: &[u8]) -> Result<EncryptedBlock> {
        self.deserialize_with_limits(ctx, bytes, BlockLimits::default())
    }

    pub fn deserialize_with_limits(
        &self,
        ctx: Arc<dyn CryptoContext>,
        bytes: &[u8],
        limits: BlockLimits,
    ) -> Result<EncryptedBlock> {
        let block = self.deserialize_unchecked(ctx, bytes, limits)?;
        if !block.validate_integrity()? {
            return Err(BlockError::IntegrityViolation(
                "deserialized block failed its integrity check".into(),
            ));
        }
        Ok(block)
    }

    /// Like [`BlockSerializer::deserialize_with_limits`] but skips the
    /// final integrity gate, so callers that want a [`ValidationReport`]
    /// for a possibly-tampered block (e.g. the `validate` CLI command) can
    /// see the failure details instead of a bare decode error.
    ///
    /// [`ValidationReport`]: crate::validator::ValidationReport
    pub fn deserialize_unchecked(
        &self,
        ctx: Arc<dyn CryptoContext>,
        bytes: &[u8],
        limits: BlockLimits,
    ) -> Result<EncryptedBlock> {
        if bytes.len() < 8 {
            return Err(BlockError::MalformedEncoding("buffer shorter than the version field".into()));
        }
        let packed_version = i64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let found_version = BlockVersion::unpack(packed_version);
        if !found_version.is_compatible_with(self.required_version) {
            return Err(BlockError::IncompatibleVersion {
                found: packed_version as u64,
                installed: self.required_version.pack() as u64,
            });
        }

        let mut cursor = 8usize;
        let size = EncryptedSize::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let status = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let next = EncryptedAddress::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let prev = EncryptedAddress::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let ts_created = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let ts_modified = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let checksum = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let version = EncryptedSize::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;

        let magic = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let payload_checksum = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let size_verify = EncryptedSize::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;
        let mac = EncryptedInt::from_bytes(ctx.clone(), read_len_prefixed(bytes, &mut cursor)?)?;

        if bytes.len() < cursor + 8 {
            return Err(BlockError::MalformedEncoding("truncated payload length".into()));
        }
        let payload_len = u64::from_be_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;
        if payload_len > limits.max_payload_bytes {
            return Err(BlockError::PayloadTooLarge { requested: payload_len, limit: limits.max_payload_bytes });
        }
        if bytes.len() < cursor + payload_len {
            return Err(BlockError::MalformedEncoding("truncated payload".into()));
        }
        let payload = bytes[cursor..cursor + payload_len].to_vec();

        let header = BlockHeader {
            size,
            status,
            next,
            prev,
            ts_created,
            ts_modified,
            checksum,
            version,
        };
        let footer = BlockFooter {
            magic,
            payload_checksum,
            size_verify,
            mac,
        };

        EncryptedBlock::from_parts(ctx, header, footer, payload)
    }

    /// `[u32 block count][[u32 length][bytes]]*`
    pub fn serialize_block_chain(&self, blocks: &[&EncryptedBlock]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        for block in blocks {
            let encoded = self.serialize(block)?;
            write_len_prefixed(&mut out, &encoded);
        }
        Ok(out)
    }

    pub fn deserialize_block_chain(
        &self,
        ctx: Arc<dyn CryptoContext>,
        bytes: &[u8],
    ) -> Result<Vec<EncryptedBlock>> {
        if bytes.len() < 4 {
            return Err(BlockError::MalformedEncoding("truncated chain count".into()));
        }
        let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut cursor = 4usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let record = read_len_prefixed(bytes, &mut cursor)?;
            blocks.push(self.deserialize(ctx.clone(), record)?);
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReferenceContext;

    #[test]
    fn round_trip_preserves_fields_and_payload() {
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let mut block = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        block.write_payload(0, b"hello").unwrap();

        let codec = BlockSerializer::new();
        let bytes = codec.serialize(&block).unwrap();
        let restored = codec.deserialize(ctx, &bytes).unwrap();

        assert_eq!(restored.get_plaintext_size().unwrap(), block.get_plaintext_size().unwrap());
        assert_eq!(restored.payload(), block.payload());
        assert!(restored.validate_integrity().unwrap());
    }

    #[test]
    fn incompatible_version_rejected() {
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let block = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        let codec = BlockSerializer::new();
        let bytes = codec.serialize(&block).unwrap();

        let future_reader = BlockSerializer::with_required_version(BlockVersion::new(2, 0, 0, 0));
        let err = future_reader.deserialize(ctx, &bytes).unwrap_err();
        assert!(matches!(err, BlockError::IncompatibleVersion { .. }));
    }

    #[test]
    fn chain_round_trip() {
        let ctx: Arc<dyn CryptoContext> = Arc::new(ReferenceContext::new());
        let a = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 256).unwrap();
        let b = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 384).unwrap();
        let codec = BlockSerializer::new();
        let bytes = codec.serialize_block_chain(&[&a, &b]).unwrap();
        let restored = codec.deserialize_block_chain(ctx, &bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].get_plaintext_size().unwrap(), 256);
        assert_eq!(restored[1].get_plaintext_size().unwrap(), 384);
    }
}
