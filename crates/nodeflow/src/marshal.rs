//! Buffer marshaling across the trust boundary.
//!
//! Variable-length values cross the boundary in two steps: a zero-argument
//! length query that stages the value host-side, then a fill call that
//! copies it into a guest-allocated region of exactly that size. Regions are
//! call-scoped; neither side keeps a reference past the call that produced
//! or consumed it.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::scope::{FillFn, LengthFn};

/// Immutable call-scoped view of guest memory handed to a raw primitive.
#[derive(Debug)]
pub struct Region<'a> {
    bytes: &'a [u8],
}

impl<'a> Region<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub const fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copy the region out. Host glue must call this rather than hold the
    /// borrow past the primitive call.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.bytes)
    }
}

/// Mutable call-scoped destination for a host fill.
#[derive(Debug)]
pub struct RegionMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> RegionMut<'a> {
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Copy `src` into the start of the region.
    ///
    /// # Errors
    /// Fails with [`Error::UndersizedRegion`] if the region cannot hold
    /// `src` in full.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        if src.len() > self.bytes.len() {
            return Err(Error::UndersizedRegion {
                staged: src.len(),
                region: self.bytes.len(),
            });
        }
        self.bytes[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }
}

/// Holds one value between the length query that staged it and the fill
/// call that consumes it. No staleness guarantee beyond that pairing.
#[derive(Debug, Default)]
pub struct StagedCell(Mutex<Option<Bytes>>);

impl StagedCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value and return its byte length.
    pub fn stage(&self, value: Bytes) -> usize {
        let len = value.len();
        *self.0.lock() = Some(value);
        len
    }

    /// Remove the staged value, if any.
    pub fn take(&self) -> Option<Bytes> {
        self.0.lock().take()
    }

    /// Drop any staged value without consuming it.
    pub fn clear(&self) {
        *self.0.lock() = None;
    }
}

/// Run the length-then-fill protocol for one staged value.
///
/// A zero length answer means nothing is staged; the fill call is skipped
/// and empty bytes are returned. Otherwise the destination is allocated at
/// exactly the reported size and the host must fill all of it.
pub(crate) fn fetch_staged(length: &LengthFn, fill: &FillFn) -> Result<Bytes> {
    let staged = length().map_err(Error::Host)?;
    if staged == 0 {
        return Ok(Bytes::new());
    }

    let mut buf = BytesMut::zeroed(staged);
    let wrote = fill(RegionMut::new(&mut buf)).map_err(Error::Host)?;
    if wrote != staged {
        return Err(Error::Host(
            std::io::Error::other(format!("staged fill wrote {wrote} of {staged} bytes")).into(),
        ));
    }
    Ok(buf.freeze())
}
