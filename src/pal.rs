//! Platform abstraction for file I/O.
//!
//! Everything that touches the operating system lives here: file creation,
//! sizing, durability barriers, positional reads and writes, and read-only
//! shared memory maps. The rest of the engine deals exclusively in
//! [`FileHandle`] and [`memmap2::Mmap`] values and never opens a file on
//! its own.
//!
//! Positional I/O uses `pread`/`pwrite` (via [`std::os::unix::fs::FileExt`])
//! so that concurrent readers and the single writer can issue requests
//! against non-overlapping offsets without sharing a seek cursor.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt as _;
use memmap2::Mmap;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Flags supplied when a database file is created or opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreationFlags: u32 {
        /// Durability barriers ([`FileHandle::fsync`]) actually sync; when
        /// unset they are no-ops and the file is only consistent on clean
        /// close.
        const DURABLE = 1;
    }
}

/// An open database file together with its cached size.
///
/// The file is locked exclusively for the lifetime of the handle, so two
/// processes cannot open the same database in read-write mode at once. The
/// lock is released when the handle is dropped.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    path: PathBuf,
    size: AtomicU64,
    flags: CreationFlags,
}

impl FileHandle {
    /// Create the file at `path` if it does not exist, open it for
    /// read/write, and take an exclusive lock on it.
    ///
    /// # Errors
    ///
    /// * [`Error::Busy`] -- another handle already holds the lock.
    /// * [`Error::Io`] -- the file could not be opened or created.
    pub fn create(path: &Path, flags: CreationFlags) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        file.try_lock_exclusive().map_err(|err| {
            if err.kind() == std::io::ErrorKind::WouldBlock {
                Error::Busy
            } else {
                Error::Io(err)
            }
        })?;

        let size = file.metadata()?.len();

        Ok(FileHandle {
            file,
            path: path.to_path_buf(),
            size: AtomicU64::new(size),
            flags,
        })
    }

    /// Grow the file so that it is at least `minimum_size` bytes, without
    /// exceeding `maximum_size`. The file is never shrunk. The final size is
    /// recorded on the handle.
    ///
    /// # Errors
    ///
    /// * [`Error::NoSpace`] -- the requested minimum exceeds `maximum_size`.
    /// * [`Error::Io`] -- the resize failed.
    pub fn set_size(&self, minimum_size: u64, maximum_size: u64) -> Result<()> {
        if minimum_size > maximum_size {
            return Err(Error::NoSpace(format!(
                "cannot grow {} to {minimum_size} bytes, the limit is {maximum_size}",
                self.path.display()
            )));
        }
        if self.size() < minimum_size {
            self.file.set_len(minimum_size)?;
            self.size.store(minimum_size, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Flush all written data to the underlying device.
    ///
    /// A no-op unless the handle was created with
    /// [`CreationFlags::DURABLE`].
    pub fn fsync(&self) -> Result<()> {
        if self.flags.contains(CreationFlags::DURABLE) {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Positional read: fill `buf` from `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Positional write: write all of `buf` at `offset`.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Map the whole file as a read-only shared span.
    ///
    /// The returned map is immutable from the point of view of this process;
    /// all writes go through [`write_at`](Self::write_at).
    pub fn map(&self) -> Result<Mmap> {
        // Safety: the handle holds an exclusive lock on the file, so no
        // other process truncates it while the map is alive; in-process
        // writers only ever extend the file.
        let map = unsafe { Mmap::map(&self.file)? };
        Ok(map)
    }

    /// The current size of the file in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// The path the file was opened at.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
