use bytes::Bytes;

use crate::api::fs::FileFlag;
use crate::marshal::{Region, RegionMut};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Size and metadata of a host-side file, as reported by the stat primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

/// Opaque handle to a host-side write stream. Lifecycle is host-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteHandle(pub u64);

/// Host side of the node invocation primitives.
///
/// Every payload is an envelope: UTF-8 JSON bytes. The install glue copies
/// guest regions before calling into this trait, so implementations may
/// retain the `Bytes` they receive.
pub trait NodeHost: Send + Sync + 'static {
    /// Current message for the open firing.
    fn message(&self) -> Result<Bytes, BoxError>;

    /// Descriptor of the firing node's configuration.
    fn descriptor(&self) -> Result<Bytes, BoxError>;

    /// Snapshot of the persisted context store. Process-wide, no
    /// transactional isolation.
    fn context(&self) -> Result<Bytes, BoxError>;

    /// Remove and return one item from the per-session pending queue, or
    /// `None` when drained.
    fn pop(&self) -> Result<Option<Bytes>, BoxError>;

    fn send(&self, payload: Bytes) -> Result<(), BoxError>;

    fn done(&self, payload: Bytes) -> Result<(), BoxError>;

    fn warn(&self, payload: Bytes) -> Result<(), BoxError>;

    /// Raise a named event, distinct from the primary message path.
    fn emit(&self, payload: Bytes) -> Result<(), BoxError>;

    /// Store a final value read by the host after the guest terminates.
    fn set_result(&self, payload: Bytes) -> Result<(), BoxError>;

    /// Declare a node type in the host's registry.
    fn register(&self, payload: Bytes) -> Result<(), BoxError>;
}

/// Host side of the filesystem primitives.
pub trait FsHost: Send + Sync + 'static {
    fn stat(&self, path: &str, flag: FileFlag) -> Result<FileStat, BoxError>;

    /// Read into `dst` starting at byte `position` of the file. Returns the
    /// number of bytes read.
    fn read(
        &self,
        path: &str,
        dst: RegionMut<'_>,
        position: u64,
        flag: FileFlag,
    ) -> Result<usize, BoxError>;

    /// Write `src` starting at byte `position` of the file. Returns the
    /// number of bytes written.
    fn write(
        &self,
        path: &str,
        src: Region<'_>,
        position: u64,
        flag: FileFlag,
    ) -> Result<usize, BoxError>;

    fn open_write(&self, path: &str, flag: FileFlag) -> Result<WriteHandle, BoxError>;
}

/// Host side of the network primitive: one pass-through request.
///
/// The payload is a request envelope; the return value is whatever the host
/// produced, success or error, as envelope bytes. No retry, redirect, or
/// timeout logic lives at this seam.
pub trait HttpHost: Send + Sync + 'static {
    fn request(&self, envelope: Bytes) -> Result<Bytes, BoxError>;
}

/// Host side of the shared mutual-exclusion primitive.
///
/// The mutex is non-reentrant. A second `lock` before `unlock` must block
/// or fail; `unlock` without a matching `lock` must be rejected.
pub trait LockHost: Send + Sync + 'static {
    fn lock(&self) -> Result<(), BoxError>;

    fn unlock(&self) -> Result<(), BoxError>;
}
