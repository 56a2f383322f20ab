//! Typed ciphertext wrappers.
//!
//! One generic struct, three zero-sized role markers, so `EncryptedSize`,
//! `EncryptedInt`, and `EncryptedAddress` share an implementation but stay
//! distinct at the API boundary (you cannot accidentally add a size to an
//! address).

use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::{Ciphertext, CryptoContext};
use crate::error::{BlockError, Result};

mod sealed {
    pub trait Sealed {}
}

/// Marker for the semantic role a scalar plays. Not implementable outside
/// this crate; the three markers below are exhaustive.
pub trait ScalarRole: sealed::Sealed {
    const NAME: &'static str;
}

/// Role marker for block/payload sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRole;
/// Role marker for general integer fields (status, timestamps, checksums, MAC, magic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRole;
/// Role marker for link/address fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRole;

impl sealed::Sealed for SizeRole {}
impl sealed::Sealed for IntRole {}
impl sealed::Sealed for AddressRole {}

impl ScalarRole for SizeRole {
    const NAME: &'static str = "size";
}
impl ScalarRole for IntRole {
    const NAME: &'static str = "int";
}
impl ScalarRole for AddressRole {
    const NAME: &'static str = "address";
}

/// A ciphertext of one integer, tagged at the type level with its semantic
/// role. Value-like: [`Clone`] produces an independent logical value
/// sharing the same context reference, matching the plaintext-integer
/// semantics it stands in for.
pub struct EncryptedScalar<R: ScalarRole> {
    ct: Ciphertext,
    ctx: Arc<dyn CryptoContext>,
    _role: PhantomData<R>,
}

impl<R: ScalarRole> EncryptedScalar<R> {
    /// Encrypt `value` under `ctx`, tagged with this scalar's role.
    pub fn new(ctx: Arc<dyn CryptoContext>, value: i64) -> Result<Self> {
        if !ctx.is_initialized() {
            return Err(BlockError::UninitializedContext);
        }
        let ct = ctx.encrypt(value)?;
        Ok(Self {
            ct,
            ctx,
            _role: PhantomData,
        })
    }

    pub(crate) fn from_ciphertext(ctx: Arc<dyn CryptoContext>, ct: Ciphertext) -> Self {
        Self {
            ct,
            ctx,
            _role: PhantomData,
        }
    }

    pub(crate) fn ciphertext(&self) -> &Ciphertext {
        &self.ct
    }

    /// The context this scalar is encrypted under.
    pub fn context(&self) -> &Arc<dyn CryptoContext> {
        &self.ctx
    }

    /// Recover the plaintext integer.
    pub fn decrypt(&self) -> Result<i64> {
        self.ctx.decrypt(&self.ct)
    }

    fn require_same_context(&self, other: &Self) -> Result<()> {
        if !Arc::ptr_eq(&self.ctx, &other.ctx) {
            return Err(BlockError::CryptoFailure(format!(
                "{} scalars belong to different crypto contexts",
                R::NAME
            )));
        }
        Ok(())
    }

    /// Homomorphic addition against another scalar sharing this context.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.require_same_context(other)?;
        let ct = self.ctx.add(&self.ct, &other.ct)?;
        Ok(Self::from_ciphertext(self.ctx.clone(), ct))
    }

    /// Homomorphic subtraction against another scalar sharing this context.
    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.require_same_context(other)?;
        let ct = self.ctx.subtract(&self.ct, &other.ct)?;
        Ok(Self::from_ciphertext(self.ctx.clone(), ct))
    }

    /// Whether `self` and `other` decrypt to the same value, checked via
    /// homomorphic subtraction and a zero-decrypt rather than decrypting
    /// either operand directly.
    pub fn equals(&self, other: &Self) -> Result<bool> {
        let diff = self.subtract(other)?;
        Ok(diff.decrypt()? == 0)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        self.ctx.ciphertext_to_bytes(&self.ct)
    }

    pub(crate) fn from_bytes(ctx: Arc<dyn CryptoContext>, bytes: &[u8]) -> Result<Self> {
        let ct = ctx.ciphertext_from_bytes(bytes)?;
        Ok(Self::from_ciphertext(ctx, ct))
    }
}

impl<R: ScalarRole> Clone for EncryptedScalar<R> {
    fn clone(&self) -> Self {
        Self {
            ct: self.ct.clone(),
            ctx: self.ctx.clone(),
            _role: PhantomData,
        }
    }
}

impl<R: ScalarRole> std::fmt::Debug for EncryptedScalar<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedScalar")
            .field("role", &R::NAME)
            .field("ciphertext", &self.ct)
            .finish()
    }
}

/// A ciphertext-encoded block or payload size.
pub type EncryptedSize = EncryptedScalar<SizeRole>;
/// A ciphertext-encoded general integer (status, timestamp, checksum, MAC, magic).
pub type EncryptedInt = EncryptedScalar<IntRole>;
/// A ciphertext-encoded link/address value.
pub type EncryptedAddress = EncryptedScalar<AddressRole>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReferenceContext;

    fn ctx() -> Arc<dyn CryptoContext> {
        Arc::new(ReferenceContext::new())
    }

    #[test]
    fn add_and_subtract_round_trip() {
        let c = ctx();
        let a = EncryptedSize::new(c.clone(), 100).unwrap();
        let b = EncryptedSize::new(c.clone(), 28).unwrap();
        assert_eq!(a.add(&b).unwrap().decrypt().unwrap(), 128);
        assert_eq!(a.subtract(&b).unwrap().decrypt().unwrap(), 72);
    }

    #[test]
    fn equals_detects_tamper() {
        let c = ctx();
        let a = EncryptedInt::new(c.clone(), 42).unwrap();
        let b = EncryptedInt::new(c.clone(), 42).unwrap();
        let d = EncryptedInt::new(c.clone(), 43).unwrap();
        assert!(a.equals(&b).unwrap());
        assert!(!a.equals(&d).unwrap());
    }

    #[test]
    fn mismatched_context_rejected() {
        let a = EncryptedInt::new(ctx(), 1).unwrap();
        let b = EncryptedInt::new(ctx(), 1).unwrap();
        assert!(a.add(&b).is_err());
    }
}
