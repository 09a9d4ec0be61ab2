//! Guest-reachable scope and raw primitive bindings.
//!
//! The host installs raw primitives under known names before guest code
//! runs. Capability bootstrap captures direct handles to the primitives it
//! consumes, then revokes the names, leaving only the vetted namespaces
//! resolvable from guest code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::api::fs::FileFlag;
use crate::error::{Error, Result};
use crate::host::{BoxError, FileStat, WriteHandle};
use crate::marshal::{Region, RegionMut};

pub type LengthFn = Arc<dyn Fn() -> core::result::Result<usize, BoxError> + Send + Sync>;
pub type FillFn =
    Arc<dyn Fn(RegionMut<'_>) -> core::result::Result<usize, BoxError> + Send + Sync>;
pub type PushFn = Arc<dyn Fn(Region<'_>) -> core::result::Result<usize, BoxError> + Send + Sync>;
pub type ExchangeFn =
    Arc<dyn Fn(Region<'_>) -> core::result::Result<Bytes, BoxError> + Send + Sync>;
pub type StatFn =
    Arc<dyn Fn(&str, FileFlag) -> core::result::Result<FileStat, BoxError> + Send + Sync>;
pub type ReadAtFn = Arc<
    dyn Fn(&str, RegionMut<'_>, u64, FileFlag) -> core::result::Result<usize, BoxError>
        + Send
        + Sync,
>;
pub type WriteAtFn = Arc<
    dyn Fn(&str, Region<'_>, u64, FileFlag) -> core::result::Result<usize, BoxError> + Send + Sync,
>;
pub type OpenWriteFn =
    Arc<dyn Fn(&str, FileFlag) -> core::result::Result<WriteHandle, BoxError> + Send + Sync>;
pub type SignalFn = Arc<dyn Fn() -> core::result::Result<(), BoxError> + Send + Sync>;

/// A raw host primitive, bound into guest scope under a known name until
/// its capability module revokes it.
#[derive(Clone)]
pub enum Primitive {
    /// Zero-argument byte-size query for the next staged value.
    Length(LengthFn),
    /// Host writes the staged value into the given region.
    Fill(FillFn),
    /// Guest hands a filled region to the host.
    Push(PushFn),
    /// Guest hands a filled region to the host and receives bytes back.
    Exchange(ExchangeFn),
    /// Path metadata query.
    Stat(StatFn),
    /// Positioned read into a region.
    ReadAt(ReadAtFn),
    /// Positioned write from a region.
    WriteAt(WriteAtFn),
    /// Obtain a host-owned write handle.
    OpenWrite(OpenWriteFn),
    /// Bare control signal (lock, unlock).
    Signal(SignalFn),
}

impl Primitive {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Length(_) => "length",
            Self::Fill(_) => "fill",
            Self::Push(_) => "push",
            Self::Exchange(_) => "exchange",
            Self::Stat(_) => "stat",
            Self::ReadAt(_) => "read-at",
            Self::WriteAt(_) => "write-at",
            Self::OpenWrite(_) => "open-write",
            Self::Signal(_) => "signal",
        }
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Primitive").field(&self.kind()).finish()
    }
}

/// Handle captured out of a [`Scope`] at bootstrap time.
///
/// A missing (or mis-shaped) binding does not fail bootstrap; the first
/// call through the handle fails with [`Error::UnavailablePrimitive`].
pub(crate) struct Captured<T> {
    name: &'static str,
    handle: Option<T>,
}

impl<T> Captured<T> {
    pub(crate) fn get(&self) -> Result<&T> {
        self.handle
            .as_ref()
            .ok_or(Error::UnavailablePrimitive(self.name))
    }
}

/// Names resolvable from guest code, mapping to raw primitives until
/// revocation.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: HashMap<&'static str, Primitive>,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a raw primitive under `name`, replacing any previous binding.
    pub fn bind(&mut self, name: &'static str, primitive: Primitive) {
        self.bindings.insert(name, primitive);
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Primitive> {
        self.bindings.get(name)
    }

    /// Remove `name` from guest reach. Returns whether it was bound.
    pub fn revoke(&mut self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

macro_rules! capture_impl {
    ($($method:ident => $variant:ident as $ty:ty;)*) => {
        impl Scope {
            $(
                pub(crate) fn $method(&self, name: &'static str) -> Captured<$ty> {
                    let handle = match self.bindings.get(name) {
                        Some(Primitive::$variant(f)) => Some(Arc::clone(f)),
                        _ => None,
                    };
                    Captured { name, handle }
                }
            )*
        }
    };
}

capture_impl! {
    capture_length => Length as LengthFn;
    capture_fill => Fill as FillFn;
    capture_push => Push as PushFn;
    capture_exchange => Exchange as ExchangeFn;
    capture_stat => Stat as StatFn;
    capture_read_at => ReadAt as ReadAtFn;
    capture_write_at => WriteAt as WriteAtFn;
    capture_open_write => OpenWrite as OpenWriteFn;
    capture_signal => Signal as SignalFn;
}
