//! Filesystem capability.
//!
//! Wraps the raw stat/read/write/open primitives into the vetted file API.
//! Access control happens in the install glue, host-side of the primitive
//! boundary, driven by glob pattern lists.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use glob::{Pattern, PatternError};
use parking_lot::Mutex;
use tracing::warn;

use crate::TRACE_TARGET_BRIDGE;
use crate::error::{Error, Result};
use crate::host::{BoxError, FileStat, FsHost, WriteHandle};
use crate::marshal::{Region, RegionMut};
use crate::scope::{Captured, OpenWriteFn, Primitive, ReadAtFn, Scope, StatFn, WriteAtFn};
use crate::value::ScriptValue;

pub const STAT: &str = "__fs_stat";
pub const READ: &str = "__fs_read";
pub const WRITE: &str = "__fs_write";
pub const OPEN_WRITE: &str = "__fs_open_write";

/// Every raw name this capability consumes at bootstrap.
pub const CONSUMED: &[&str] = &[STAT, READ, WRITE, OPEN_WRITE];

/// Node-style open flag strings.
///
/// `ax` and `ax+` collapse to the same exclusive-append mode; there is no
/// distinct read side once the create-new constraint applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFlag {
    /// `r`
    Read,
    /// `a`
    Append,
    /// `a+`
    AppendCreate,
    /// `ax`, `ax+`
    AppendExclusive,
    /// `w`
    Write,
    /// `wx`
    WriteExclusive,
    /// `w+`
    ReadWrite,
    /// `wx+`
    ReadWriteExclusive,
}

impl FileFlag {
    /// Parse a flag string, rejected before any host call.
    ///
    /// # Errors
    /// Fails with [`Error::TypeMismatch`] on an unknown flag.
    pub fn parse(flag: &str) -> Result<Self> {
        match flag {
            "r" => Ok(Self::Read),
            "a" => Ok(Self::Append),
            "a+" => Ok(Self::AppendCreate),
            "ax" | "ax+" => Ok(Self::AppendExclusive),
            "w" => Ok(Self::Write),
            "wx" => Ok(Self::WriteExclusive),
            "w+" => Ok(Self::ReadWrite),
            "wx+" => Ok(Self::ReadWriteExclusive),
            _ => Err(Error::TypeMismatch("unknown file flag")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Append => "a",
            Self::AppendCreate => "a+",
            Self::AppendExclusive => "ax",
            Self::Write => "w",
            Self::WriteExclusive => "wx",
            Self::ReadWrite => "w+",
            Self::ReadWriteExclusive => "wx+",
        }
    }

    fn open_options(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::Append => options.append(true).create(true),
            Self::AppendCreate => options.read(true).append(true).create(true),
            Self::AppendExclusive => options.append(true).create_new(true),
            Self::Write => options.write(true).create(true).truncate(true),
            Self::WriteExclusive => options.write(true).create_new(true),
            Self::ReadWrite => options.read(true).write(true).create(true).truncate(true),
            Self::ReadWriteExclusive => options.read(true).write(true).create_new(true),
        };
        options
    }

    const fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Glob-based access lists for guest file I/O. Default: nothing allowed.
///
/// A path is readable when it matches any read-allow pattern and no
/// read-deny pattern; writable likewise.
#[derive(Debug, Clone, Default)]
pub struct FsPolicy {
    read_allow: Vec<Pattern>,
    read_deny: Vec<Pattern>,
    write_allow: Vec<Pattern>,
    write_deny: Vec<Pattern>,
}

impl FsPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow everything. For tests and trusted embeddings.
    #[must_use]
    pub fn permissive() -> Self {
        let everything: Vec<Pattern> = ["**", "/**"]
            .iter()
            .map(|p| Pattern::new(p).expect("static pattern"))
            .collect();
        Self {
            read_allow: everything.clone(),
            read_deny: vec![],
            write_allow: everything,
            write_deny: vec![],
        }
    }

    /// # Errors
    /// Fails if `pattern` is not a valid glob.
    pub fn allow_read(mut self, pattern: &str) -> core::result::Result<Self, PatternError> {
        self.read_allow.push(Pattern::new(pattern)?);
        Ok(self)
    }

    /// # Errors
    /// Fails if `pattern` is not a valid glob.
    pub fn deny_read(mut self, pattern: &str) -> core::result::Result<Self, PatternError> {
        self.read_deny.push(Pattern::new(pattern)?);
        Ok(self)
    }

    /// # Errors
    /// Fails if `pattern` is not a valid glob.
    pub fn allow_write(mut self, pattern: &str) -> core::result::Result<Self, PatternError> {
        self.write_allow.push(Pattern::new(pattern)?);
        Ok(self)
    }

    /// # Errors
    /// Fails if `pattern` is not a valid glob.
    pub fn deny_write(mut self, pattern: &str) -> core::result::Result<Self, PatternError> {
        self.write_deny.push(Pattern::new(pattern)?);
        Ok(self)
    }

    #[must_use]
    pub fn can_read(&self, path: &str) -> bool {
        self.read_allow.iter().any(|p| p.matches(path))
            && !self.read_deny.iter().any(|p| p.matches(path))
    }

    #[must_use]
    pub fn can_write(&self, path: &str) -> bool {
        self.write_allow.iter().any(|p| p.matches(path))
            && !self.write_deny.iter().any(|p| p.matches(path))
    }
}

fn denied(op: &'static str, path: &str) -> BoxError {
    warn!(target: TRACE_TARGET_BRIDGE, path, op, "file access denied by policy");
    std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("{op} access to {path} denied by policy"),
    )
    .into()
}

/// Install the raw filesystem primitives over `host`, with `policy`
/// enforced before any host operation runs.
pub fn install_fs(scope: &mut Scope, host: Arc<dyn FsHost>, policy: FsPolicy) {
    let policy = Arc::new(policy);

    {
        let host = Arc::clone(&host);
        let policy = Arc::clone(&policy);
        scope.bind(
            STAT,
            Primitive::Stat(Arc::new(move |path, flag| {
                if !policy.can_read(path) {
                    return Err(denied("read", path));
                }
                host.stat(path, flag)
            })),
        );
    }
    {
        let host = Arc::clone(&host);
        let policy = Arc::clone(&policy);
        scope.bind(
            READ,
            Primitive::ReadAt(Arc::new(move |path, dst, position, flag| {
                if !policy.can_read(path) {
                    return Err(denied("read", path));
                }
                host.read(path, dst, position, flag)
            })),
        );
    }
    {
        let host = Arc::clone(&host);
        let policy = Arc::clone(&policy);
        scope.bind(
            WRITE,
            Primitive::WriteAt(Arc::new(move |path, src, position, flag| {
                if !policy.can_write(path) {
                    return Err(denied("write", path));
                }
                host.write(path, src, position, flag)
            })),
        );
    }
    scope.bind(
        OPEN_WRITE,
        Primitive::OpenWrite(Arc::new(move |path, flag| {
            if !policy.can_write(path) {
                return Err(denied("write", path));
            }
            host.open_write(path, flag)
        })),
    );
}

/// The vetted filesystem namespace.
pub struct FsApi {
    stat: Captured<StatFn>,
    read: Captured<ReadAtFn>,
    write: Captured<WriteAtFn>,
    open: Captured<OpenWriteFn>,
}

impl FsApi {
    /// Capture the filesystem primitives out of `scope` and revoke their
    /// names.
    #[must_use]
    pub fn bootstrap(scope: &mut Scope) -> Self {
        let api = Self {
            stat: scope.capture_stat(STAT),
            read: scope.capture_read_at(READ),
            write: scope.capture_write_at(WRITE),
            open: scope.capture_open_write(OPEN_WRITE),
        };
        for name in CONSUMED {
            scope.revoke(name);
        }
        api
    }

    /// # Errors
    /// Fails on an unknown flag or a host error.
    pub fn stat(&self, path: &str, flag: &str) -> Result<FileStat> {
        let flag = FileFlag::parse(flag)?;
        (self.stat.get()?)(path, flag).map_err(Error::Host)
    }

    /// Read a whole file: stat for size, allocate an exact-size buffer,
    /// fill it through the positioned-read primitive.
    ///
    /// # Errors
    /// Fails on an unknown flag or a host error.
    pub fn read_file(&self, path: &str, flag: &str) -> Result<Bytes> {
        let flag = FileFlag::parse(flag)?;
        let stat = (self.stat.get()?)(path, flag).map_err(Error::Host)?;
        let size = usize::try_from(stat.size)
            .map_err(|e| Error::Host(std::io::Error::other(e).into()))?;

        let mut buf = BytesMut::zeroed(size);
        let read = (self.read.get()?)(path, RegionMut::new(&mut buf), 0, flag)
            .map_err(Error::Host)?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    /// Partial read of `len` bytes starting at `offset`. Returns the byte
    /// count actually read and the buffer truncated to it, so callers can
    /// stream a file without loading it whole.
    ///
    /// # Errors
    /// Fails on an unknown flag or a host error.
    pub fn read_chunk(
        &self,
        path: &str,
        offset: u64,
        len: usize,
        flag: &str,
    ) -> Result<(usize, Bytes)> {
        let flag = FileFlag::parse(flag)?;
        let mut buf = BytesMut::zeroed(len);
        let read = (self.read.get()?)(path, RegionMut::new(&mut buf), offset, flag)
            .map_err(Error::Host)?;
        buf.truncate(read);
        Ok((read, buf.freeze()))
    }

    /// Write `data` at `offset`. `data` must be a concrete byte buffer;
    /// every other shape is rejected before any host call, with no
    /// implicit coercion.
    ///
    /// # Errors
    /// Fails with [`Error::TypeMismatch`] for non-buffer data or an
    /// unknown flag, otherwise on host errors.
    pub fn write_file(
        &self,
        path: &str,
        data: &ScriptValue,
        offset: u64,
        flag: &str,
    ) -> Result<usize> {
        let flag = FileFlag::parse(flag)?;
        let Some(buf) = data.as_buffer() else {
            return Err(Error::TypeMismatch("write data must be a byte buffer"));
        };
        (self.write.get()?)(path, Region::new(buf), offset, flag).map_err(Error::Host)
    }

    /// Obtain a host-side handle for later positioned writes. The handle's
    /// lifecycle is host-owned.
    ///
    /// # Errors
    /// Fails on an unknown flag or a host error.
    pub fn open_write(&self, path: &str, flag: &str) -> Result<WriteHandle> {
        let flag = FileFlag::parse(flag)?;
        (self.open.get()?)(path, flag).map_err(Error::Host)
    }

    /// Directory listing has no contract yet.
    ///
    /// # Errors
    /// Always fails with [`Error::Unsupported`].
    pub fn list_dir(&self, _path: &str) -> Result<Vec<String>> {
        Err(Error::Unsupported("list_dir"))
    }
}

/// Reference [`FsHost`] over the local filesystem.
///
/// Positioned reads and writes reopen the file per call; write handles go
/// into a host-owned table keyed by id.
#[derive(Debug, Default)]
pub struct LocalFsHost {
    handles: Mutex<HashMap<u64, std::fs::File>>,
    next_handle: AtomicU64,
}

impl LocalFsHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FsHost for LocalFsHost {
    fn stat(&self, path: &str, flag: FileFlag) -> core::result::Result<FileStat, BoxError> {
        let file = flag.open_options().open(path)?;
        Ok(FileStat {
            size: file.metadata()?.len(),
        })
    }

    fn read(
        &self,
        path: &str,
        mut dst: RegionMut<'_>,
        position: u64,
        flag: FileFlag,
    ) -> core::result::Result<usize, BoxError> {
        let mut file = flag.open_options().open(path)?;
        file.seek(SeekFrom::Start(position))?;

        let buf = dst.as_mut_slice();
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn write(
        &self,
        path: &str,
        src: Region<'_>,
        position: u64,
        flag: FileFlag,
    ) -> core::result::Result<usize, BoxError> {
        if !flag.is_write() {
            return Err(std::io::Error::other("read-only flag for a write").into());
        }
        let mut file = flag.open_options().open(path)?;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(src.as_slice())?;
        file.flush()?;
        Ok(src.len())
    }

    fn open_write(
        &self,
        path: &str,
        flag: FileFlag,
    ) -> core::result::Result<WriteHandle, BoxError> {
        if !flag.is_write() {
            return Err(std::io::Error::other("read-only flag for a write handle").into());
        }
        let file = flag.open_options().open(path)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(id, file);
        Ok(WriteHandle(id))
    }
}
