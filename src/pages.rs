//! Low-level page I/O for corvus.
//!
//! The engine views the database file as a flat sequence of fixed-size
//! **pages** ([`PAGE_SIZE`] = 4 096 bytes each), addressed by a 64-bit page
//! number; the byte offset of page `n` is `n * PAGE_SIZE`. A multi-page
//! allocation is physically contiguous.
//!
//! Reads come either from the read-only shared map held by a transaction's
//! snapshot (mmap mode) or from page buffers fetched with positional reads
//! (buffered mode, selected with `avoid_mmap_io`). Writes always use
//! positional file writes -- the map is never written through, which keeps
//! the crash story simple.
//!
//! This module deals exclusively in raw page bytes. Page *meaning* (kinds,
//! allocation state, tree layout) lives in the layers above.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pal::FileHandle;
use crate::PageTransform;

/// Every page in the database file is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// An owned, in-memory image of one contiguous page run.
///
/// Write transactions keep these in their modified set (the copy-on-write
/// shadow of the file) and buffered-mode transactions keep them in their
/// working set. The buffer is exactly `number_of_pages * PAGE_SIZE` bytes,
/// except for key-only placeholder records, which carry no buffer at all.
#[derive(Debug)]
pub struct PageBuf {
    /// First page of the run.
    pub page_num: u64,
    /// Length of the run in pages.
    pub number_of_pages: u32,
    /// The page bytes; empty for placeholder records.
    pub data: Box<[u8]>,
}

impl PageBuf {
    /// A zero-filled buffer covering `number_of_pages` pages.
    pub fn zeroed(page_num: u64, number_of_pages: u32) -> PageBuf {
        PageBuf {
            page_num,
            number_of_pages,
            data: vec![0u8; number_of_pages as usize * PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// A key-only record with no backing buffer.
    pub fn placeholder(page_num: u64) -> PageBuf {
        PageBuf {
            page_num,
            number_of_pages: 0,
            data: Box::default(),
        }
    }
}

/// Reject a request whose byte range does not fit inside `map_size`.
#[inline]
pub fn check_bounds(page_num: u64, number_of_pages: u32, map_size: u64) -> Result<()> {
    let offset = page_num * PAGE_SIZE as u64;
    let len = number_of_pages as u64 * PAGE_SIZE as u64;
    if offset + len > map_size {
        return Err(Error::OutOfRange { page_num, map_size });
    }
    Ok(())
}

/// Read a page run with a positional read, applying the transform hook if
/// one is configured (buffered mode).
pub fn read(
    handle: &FileHandle,
    transform: Option<&Arc<dyn PageTransform>>,
    page_num: u64,
    number_of_pages: u32,
) -> Result<PageBuf> {
    let mut page = PageBuf::zeroed(page_num, number_of_pages);
    handle.read_at(page_num * PAGE_SIZE as u64, &mut page.data)?;
    if let Some(t) = transform {
        t.after_read(page_num, &mut page.data);
    }
    Ok(page)
}

/// Write a page run with a positional write.
///
/// When a transform hook is configured the bytes are ciphered into a
/// scratch copy first, so the caller's buffer keeps the plain contents.
pub fn write(
    handle: &FileHandle,
    transform: Option<&Arc<dyn PageTransform>>,
    page_num: u64,
    data: &[u8],
) -> Result<()> {
    debug_assert_eq!(data.len() % PAGE_SIZE, 0);
    let offset = page_num * PAGE_SIZE as u64;
    match transform {
        Some(t) => {
            let mut scratch = data.to_vec();
            t.before_write(page_num, &mut scratch);
            handle.write_at(offset, &scratch)
        }
        None => handle.write_at(offset, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::CreationFlags;
    use tempfile::TempDir;

    #[test]
    fn bounds_check_rejects_past_the_map() {
        assert!(check_bounds(0, 1, PAGE_SIZE as u64).is_ok());
        assert!(check_bounds(1, 1, PAGE_SIZE as u64).is_err());
        // A multi-page run that starts inside but ends outside.
        let err = check_bounds(1, 2, 2 * PAGE_SIZE as u64).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { page_num: 1, .. }));
    }

    #[test]
    fn write_then_read_page_run() {
        let dir = TempDir::new().unwrap();
        let handle =
            FileHandle::create(&dir.path().join("try"), CreationFlags::empty()).unwrap();
        handle.set_size(128 * 1024, u64::MAX).unwrap();

        let mut page = PageBuf::zeroed(3, 2);
        page.data[0] = 0xCA;
        page.data[2 * PAGE_SIZE - 1] = 0xFE;
        write(&handle, None, 3, &page.data).unwrap();

        let back = read(&handle, None, 3, 2).unwrap();
        assert_eq!(back.data[0], 0xCA);
        assert_eq!(back.data[2 * PAGE_SIZE - 1], 0xFE);
    }
}
