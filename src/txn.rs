//! Transactions: copy-on-write page modification, allocation, and the
//! commit protocol.
//!
//! The engine runs a **single writer** next to any number of readers. A
//! transaction captures an immutable snapshot `{map, number_of_pages}` at
//! creation; a write transaction additionally owns a *modified set* -- a
//! [`PagesMap`] of private page buffers shadowing the file image. Nothing
//! a writer does is observable until `commit` publishes the buffers with
//! positional writes.
//!
//! ## Commit protocol
//!
//! 1. Stamp the file header (transaction id, page count) in the private
//!    copy of page 0.
//! 2. Write every modified data page, then every modified metadata page
//!    except page 0.
//! 3. `fsync`.
//! 4. Write page 0, which carries both the block-0 metadata entries and
//!    the header.
//! 5. `fsync`.
//!
//! The header travels last: a crash anywhere before step 4 leaves the old
//! header on disk, and the pages written in steps 1-3 belong to a
//! transaction that was never acknowledged. Recovery on open is therefore
//! pure validation.
//!
//! ## Free-page reuse
//!
//! Pages freed by a committed transaction are not handed out again while a
//! reader that predates the free is still alive (`can_free_after_tx_id`);
//! within the freeing transaction itself, only pages it also allocated may
//! be recycled. Both rules are enforced by a veto on allocator candidates.

use std::sync::Arc;

use log::debug;

use crate::bitmap;
use crate::error::{Error, Result};
use crate::meta::{
    entry_index_of, is_metadata_page, metadata_page_of, validate_metadata_page, FileHeader,
    PageMetadata, METADATA_ENTRY_SIZE, PAGES_IN_METADATA,
};
use crate::pagemap::PagesMap;
use crate::pages::{self, PageBuf, PAGE_SIZE};
use crate::{DbState, FreedRun, Snapshot};

bitflags::bitflags! {
    /// Transaction flavor and lifecycle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u32 {
        /// Immutable snapshot view; may run concurrently with others.
        const READ = 1;
        /// The exclusive writer.
        const WRITE = 2;
        /// `commit` has run on this transaction.
        const COMMITTED = 4;
    }
}

/// Bits of free space tracked by one bitmap page.
const BITS_PER_BITMAP_PAGE: u64 = PAGE_SIZE as u64 * 8;

/// A read or write transaction over an open database.
///
/// Transactions borrow the database, which rules out closing the database
/// while any transaction is live. Dropping a transaction aborts it: every
/// private buffer is released and nothing reaches the file.
pub struct Transaction<'db> {
    db: &'db DbState,
    flags: TxFlags,
    snapshot: Arc<Snapshot>,
    id: u64,
    /// Copy-on-write page buffers, keyed by first page of the run.
    modified: PagesMap,
    /// Buffered-mode page cache; unused in mmap mode.
    working_set: PagesMap,
    /// Runs freed by this transaction (key-only records carrying the run
    /// length).
    freed: PagesMap,
    /// First pages of runs allocated by this transaction.
    allocated: PagesMap,
    /// Freed-by-other-transactions runs this writer must not recycle yet.
    blocked: Vec<FreedRun>,
    /// Snapshot id of the oldest live reader at creation time; freeing is
    /// unrestricted when no reader is alive (`u64::MAX`).
    can_free_after_tx_id: u64,
}

impl<'db> Transaction<'db> {
    /// Create a transaction. Called through `Database::read_tx` /
    /// `Database::write_tx`.
    pub(crate) fn new(db: &'db DbState, flags: TxFlags) -> Result<Transaction<'db>> {
        debug_assert!(flags.contains(TxFlags::READ) ^ flags.contains(TxFlags::WRITE));

        if flags.contains(TxFlags::WRITE) {
            db.acquire_writer()?;
        }
        let snapshot = db.current_snapshot();
        let (id, blocked, can_free_after) = if flags.contains(TxFlags::WRITE) {
            let oldest = db.oldest_live_reader();
            (
                snapshot.last_committed_tx_id + 1,
                db.take_blocked_frees(oldest),
                oldest,
            )
        } else {
            db.register_reader(snapshot.last_committed_tx_id);
            (snapshot.last_committed_tx_id, Vec::new(), u64::MAX)
        };

        Ok(Transaction {
            db,
            flags,
            snapshot,
            id,
            modified: PagesMap::new(8),
            working_set: PagesMap::new(8),
            freed: PagesMap::new(8),
            allocated: PagesMap::new(8),
            blocked,
            can_free_after_tx_id: can_free_after,
        })
    }

    /// This transaction's id: the id it will commit under (writers) or the
    /// last committed id it observes (readers).
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total pages in this transaction's snapshot of the file.
    #[inline]
    pub fn number_of_pages(&self) -> u64 {
        self.snapshot.number_of_pages
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.flags.contains(TxFlags::WRITE) {
            return Err(Error::InvalidArgument(
                "write operation on a read transaction".into(),
            ));
        }
        if self.flags.contains(TxFlags::COMMITTED) {
            return Err(Error::InvalidState(
                "the transaction has already been committed".into(),
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Raw page access (no metadata involved)
    // ---------------------------------------------------------------------

    /// Read `number_of_pages` pages starting at `page_num`.
    ///
    /// A writer sees its own modifications; everything else comes from the
    /// snapshot map (mmap mode) or from positional reads cached in the
    /// working set (buffered mode).
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfRange`] -- the run does not fit inside the snapshot.
    /// * [`Error::Io`] -- a buffered read failed.
    pub fn raw_get_page(&mut self, page_num: u64, number_of_pages: u32) -> Result<&[u8]> {
        let n = number_of_pages.max(1);
        if self.modified.lookup(page_num).is_some() {
            return Ok(&self.modified.lookup(page_num).unwrap().data);
        }
        pages::check_bounds(page_num, n, self.snapshot.map_size)?;

        match &self.snapshot.map {
            Some(map) => {
                let offset = page_num as usize * PAGE_SIZE;
                Ok(&map[offset..offset + n as usize * PAGE_SIZE])
            }
            None => {
                if self.working_set.lookup(page_num).is_none() {
                    let page = pages::read(
                        &self.db.handle,
                        self.db.options.transform.as_ref(),
                        page_num,
                        n,
                    )?;
                    self.working_set.put_new(page)?;
                }
                Ok(&self.working_set.lookup(page_num).unwrap().data)
            }
        }
    }

    /// Fetch `number_of_pages` pages starting at `page_num` for
    /// modification, copying the current contents into a private buffer on
    /// first touch.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] -- called on a read transaction.
    /// * [`Error::InvalidState`] -- the transaction already committed.
    /// * [`Error::OutOfRange`] / [`Error::Io`] -- fetching the original
    ///   failed.
    pub fn raw_modify_page(&mut self, page_num: u64, number_of_pages: u32) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        let n = number_of_pages.max(1);
        if self.modified.lookup(page_num).is_none() {
            pages::check_bounds(page_num, n, self.snapshot.map_size)?;
            let mut copy = PageBuf::zeroed(page_num, n);
            {
                let original = self.read_original(page_num, n)?;
                copy.data.copy_from_slice(original);
            }
            self.modified.put_new(copy)?;
        }
        Ok(&mut self.modified.lookup_mut(page_num).unwrap().data)
    }

    /// The pristine snapshot image of a run, bypassing the modified set.
    fn read_original(&mut self, page_num: u64, n: u32) -> Result<&[u8]> {
        match &self.snapshot.map {
            Some(map) => {
                let offset = page_num as usize * PAGE_SIZE;
                Ok(&map[offset..offset + n as usize * PAGE_SIZE])
            }
            None => {
                if self.working_set.lookup(page_num).is_none() {
                    let page = pages::read(
                        &self.db.handle,
                        self.db.options.transform.as_ref(),
                        page_num,
                        n,
                    )?;
                    self.working_set.put_new(page)?;
                }
                Ok(&self.working_set.lookup(page_num).unwrap().data)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Metadata access
    // ---------------------------------------------------------------------

    /// Decode the metadata entry describing `page_num`.
    pub fn metadata(&mut self, page_num: u64) -> Result<PageMetadata> {
        let meta_page = metadata_page_of(page_num);
        let index = entry_index_of(page_num);
        let page = self.raw_get_page(meta_page, 1)?;
        let own = PageMetadata::decode(&page[..METADATA_ENTRY_SIZE])?;
        validate_metadata_page(meta_page, &own)?;
        PageMetadata::decode(&page[index * METADATA_ENTRY_SIZE..(index + 1) * METADATA_ENTRY_SIZE])
    }

    /// Write the metadata entry describing `page_num` through the
    /// copy-on-write path.
    ///
    /// The first modification inside an untouched 128-page block
    /// materializes the block's metadata page: its self-entry is stamped
    /// and its free bit is cleared so it can never be handed out as data.
    pub fn set_metadata(&mut self, page_num: u64, entry: &PageMetadata) -> Result<()> {
        self.ensure_writable()?;
        let meta_page = metadata_page_of(page_num);
        let index = entry_index_of(page_num);

        let own = {
            let page = self.raw_modify_page(meta_page, 1)?;
            PageMetadata::decode(&page[..METADATA_ENTRY_SIZE])?
        };
        validate_metadata_page(meta_page, &own)?;

        if meta_page != 0 && own.is_free() {
            let page = self.modified.lookup_mut(meta_page).unwrap();
            PageMetadata::Metadata.encode(&mut page.data[..METADATA_ENTRY_SIZE]);
            self.clear_bitmap_bits(meta_page, 1)?;
            debug!("materialized metadata page {meta_page}");
        }

        let page = self.modified.lookup_mut(meta_page).unwrap();
        entry.encode(&mut page.data[index * METADATA_ENTRY_SIZE..(index + 1) * METADATA_ENTRY_SIZE]);
        Ok(())
    }

    /// The file header, as this transaction sees it.
    pub fn file_header(&mut self) -> Result<FileHeader> {
        match self.metadata(0)? {
            PageMetadata::FileHeader(header) => Ok(header),
            _ => Err(Error::Corruption("the file header entry is missing".into())),
        }
    }

    // ---------------------------------------------------------------------
    // Metadata-aware page access
    // ---------------------------------------------------------------------

    /// Read the allocation starting at `page_num`; the run length comes
    /// from the metadata entry.
    pub fn get_page(&mut self, page_num: u64) -> Result<&[u8]> {
        let n = self.metadata(page_num)?.number_of_pages();
        self.raw_get_page(page_num, n)
    }

    /// Modify the allocation starting at `page_num`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] -- the page is free; allocate it first.
    pub fn modify_page(&mut self, page_num: u64) -> Result<&mut [u8]> {
        let entry = self.metadata(page_num)?;
        if entry.is_free() {
            return Err(Error::InvalidState(format!(
                "tried to modify free page {page_num}, allocate it first"
            )));
        }
        self.raw_modify_page(page_num, entry.number_of_pages())
    }

    // ---------------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------------

    /// Allocate a run of free pages near `near_position` and record
    /// `entry` (which fixes both the page kind and the run length) in the
    /// metadata. Returns the first page of the run, which is ready to
    /// modify: a zeroed buffer for it is already in the modified set.
    ///
    /// Runs of 128 pages or more are padded by one page when their length
    /// is an exact block multiple, so that the shifted run never starts on
    /// a metadata page; the padded length is what the metadata records.
    ///
    /// # Errors
    ///
    /// [`Error::NoSpace`] -- no qualifying run exists and the file cannot
    /// grow any further.
    pub fn allocate_page(&mut self, entry: PageMetadata, near_position: u64) -> Result<u64> {
        self.ensure_writable()?;
        let requested = entry.number_of_pages().max(1) as u64;
        let effective = if requested >= PAGES_IN_METADATA && requested % PAGES_IN_METADATA == 0 {
            requested + 1
        } else {
            requested
        };

        let position = match self.find_allocation(effective, near_position)? {
            Some(position) => position,
            None => {
                self.grow_file(effective)?;
                self.find_allocation(effective, near_position)?.ok_or_else(|| {
                    Error::NoSpace(format!("no free run of {effective} pages after growth"))
                })?
            }
        };

        self.clear_bitmap_bits(position, effective)?;
        self.set_metadata(position, &with_number_of_pages(entry, effective as u32))?;
        self.allocated.try_add(position)?;

        // Hand the caller a zeroed, ready-to-modify buffer.
        match self.modified.lookup_mut(position) {
            Some(existing) => {
                *existing = PageBuf::zeroed(position, effective as u32);
            }
            None => self
                .modified
                .put_new(PageBuf::zeroed(position, effective as u32))?,
        }

        debug!(
            "tx {} allocated {effective} page(s) at {position}",
            self.id
        );
        Ok(position)
    }

    /// Free the allocation starting at `page_num`: the bitmap bits are
    /// re-set, the metadata entry becomes `free`, and any metadata pages
    /// covered by a large run are zeroed back to their untouched state.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] -- the page is already free.
    pub fn free_page(&mut self, page_num: u64) -> Result<()> {
        self.ensure_writable()?;
        let entry = self.metadata(page_num)?;
        if entry.is_free() {
            return Err(Error::InvalidState(format!(
                "page {page_num} was already freed"
            )));
        }
        let n = entry.number_of_pages();

        self.set_metadata(page_num, &PageMetadata::Free)?;
        self.set_bitmap_bits(page_num, n as u64)?;

        // A large run swallows the metadata pages inside it; restore them
        // to the untouched all-zero state.
        let mut inner = metadata_page_of(page_num) + PAGES_IN_METADATA;
        while inner < page_num + n as u64 {
            let page = self.raw_modify_page(inner, 1)?;
            page.fill(0);
            inner += PAGES_IN_METADATA;
        }

        self.freed.try_add(page_num)?;
        self.freed.lookup_mut(page_num).unwrap().number_of_pages = n;

        debug!("tx {} freed {n} page(s) at {page_num}", self.id);
        Ok(())
    }

    /// Search the bitmap for an acceptable run, vetoing pages that live
    /// readers may still observe.
    fn find_allocation(&mut self, space_required: u64, near_position: u64) -> Result<Option<u64>> {
        let header = self.file_header()?;
        let bm_start = header.free_space_bitmap as u64;
        let bm_pages = self.metadata(bm_start)?.number_of_pages();
        let total_pages = self.snapshot.number_of_pages;

        let bits = self.raw_get_page(bm_start, bm_pages)?.to_vec();

        let blocked = &self.blocked;
        let freed = &self.freed;
        let allocated = &self.allocated;
        let veto = |position: u64| {
            let end = position + space_required;
            let hits_blocked = blocked.iter().any(|run| {
                position < run.page_num + run.number_of_pages as u64 && run.page_num < end
            });
            // Runs this transaction freed (but did not itself allocate)
            // may still be observed by readers; keep them off limits.
            let hits_own_free = freed.iter().any(|run| {
                allocated.lookup(run.page_num).is_none()
                    && position < run.page_num + run.number_of_pages.max(1) as u64
                    && run.page_num < end
            });
            hits_blocked || hits_own_free
        };

        Ok(bitmap::find_free_run(
            &bits,
            total_pages,
            space_required,
            near_position,
            veto,
        ))
    }

    fn clear_bitmap_bits(&mut self, start: u64, len: u64) -> Result<()> {
        let header = self.file_header()?;
        let bm_start = header.free_space_bitmap as u64;
        let bm_pages = self.metadata(bm_start)?.number_of_pages();
        let bits = self.raw_modify_page(bm_start, bm_pages)?;
        bitmap::clear_range(bits, start, len);
        Ok(())
    }

    fn set_bitmap_bits(&mut self, start: u64, len: u64) -> Result<()> {
        let header = self.file_header()?;
        let bm_start = header.free_space_bitmap as u64;
        let bm_pages = self.metadata(bm_start)?.number_of_pages();
        let bits = self.raw_modify_page(bm_start, bm_pages)?;
        if !bitmap::set_range(bits, start, len) {
            return Err(Error::InvalidState(format!(
                "double free of pages [{start}, {})",
                start + len
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // File growth
    // ---------------------------------------------------------------------

    /// Double the file (bounded by `maximum_size`), remap, and mark the new
    /// pages free; relocates the bitmap when it no longer covers the file.
    fn grow_file(&mut self, space_required: u64) -> Result<()> {
        let old_pages = self.snapshot.number_of_pages;
        let old_size = old_pages * PAGE_SIZE as u64;
        let maximum = self.db.options.maximum_size;

        let mut target = (old_size * 2)
            .max(old_size + 128 * 1024)
            .max((old_pages + space_required) * PAGE_SIZE as u64);
        target = target.min(maximum);
        target -= target % PAGE_SIZE as u64;
        if target <= old_size {
            return Err(Error::NoSpace(format!(
                "the file is full and cannot grow past {maximum} bytes"
            )));
        }

        let new_pages = target / PAGE_SIZE as u64;
        if new_pages > u32::MAX as u64 {
            return Err(Error::NoSpace(
                "the page count no longer fits the file header".into(),
            ));
        }
        self.db.handle.set_size(target, maximum)?;

        let map = if self.db.options.avoid_mmap_io {
            None
        } else {
            Some(Arc::new(self.db.handle.map()?))
        };
        self.snapshot = Arc::new(Snapshot {
            map,
            map_size: target,
            number_of_pages: new_pages,
            last_committed_tx_id: self.snapshot.last_committed_tx_id,
        });

        let header = self.file_header()?;
        let bm_start = header.free_space_bitmap as u64;
        let bm_pages = self.metadata(bm_start)?.number_of_pages();
        let coverage = bm_pages as u64 * BITS_PER_BITMAP_PAGE;

        if new_pages <= coverage {
            let bits = self.raw_modify_page(bm_start, bm_pages)?;
            if !bitmap::set_range(bits, old_pages, new_pages - old_pages) {
                return Err(Error::Corruption(
                    "pages past the end of the file were marked free".into(),
                ));
            }
        } else {
            self.relocate_bitmap(bm_start, bm_pages, old_pages, new_pages)?;
        }

        debug!(
            "tx {} grew the file from {old_pages} to {new_pages} pages",
            self.id
        );
        Ok(())
    }

    /// Build a larger bitmap image covering `new_pages`, find it a home
    /// inside itself, and swap it into the file header. The old bitmap run
    /// becomes free space.
    fn relocate_bitmap(
        &mut self,
        old_start: u64,
        old_pages_in_bitmap: u32,
        old_pages: u64,
        new_pages: u64,
    ) -> Result<()> {
        let new_bm_pages = ((new_pages + BITS_PER_BITMAP_PAGE - 1) / BITS_PER_BITMAP_PAGE) as u32;
        let effective = if new_bm_pages as u64 >= PAGES_IN_METADATA
            && new_bm_pages as u64 % PAGES_IN_METADATA == 0
        {
            new_bm_pages + 1
        } else {
            new_bm_pages
        };

        let mut image = vec![0u8; effective as usize * PAGE_SIZE];
        {
            let old_bits = self.raw_get_page(old_start, old_pages_in_bitmap)?;
            let old_len = ((old_pages + 7) / 8) as usize;
            image[..old_len].copy_from_slice(&old_bits[..old_len]);
        }
        if !bitmap::set_range(&mut image, old_pages, new_pages - old_pages) {
            return Err(Error::Corruption(
                "pages past the end of the file were marked free".into(),
            ));
        }
        // The old bitmap pages are released by the swap.
        if !bitmap::set_range(&mut image, old_start, old_pages_in_bitmap as u64) {
            return Err(Error::Corruption("the old bitmap run was not allocated".into()));
        }

        let home = bitmap::find_free_run(&image, new_pages, effective as u64, old_start, |_| false)
            .ok_or_else(|| {
                Error::NoSpace("no room for the relocated free-space bitmap".into())
            })?;
        bitmap::clear_range(&mut image, home, effective as u64);

        match self.modified.lookup_mut(home) {
            Some(existing) => {
                *existing = PageBuf {
                    page_num: home,
                    number_of_pages: effective,
                    data: image.into_boxed_slice(),
                };
            }
            None => self.modified.put_new(PageBuf {
                page_num: home,
                number_of_pages: effective,
                data: image.into_boxed_slice(),
            })?,
        }

        // Point the header at the new run first: any metadata-page
        // materialization below must land its bit in the new bitmap.
        let mut header = self.file_header()?;
        header.free_space_bitmap = home as u32;
        self.set_metadata(0, &PageMetadata::FileHeader(header))?;

        self.set_metadata(
            home,
            &PageMetadata::FreeSpaceBitmap {
                number_of_pages: effective,
            },
        )?;
        self.set_metadata(old_start, &PageMetadata::Free)?;
        // The old run must not be recycled by this transaction; its image
        // may still be written at commit.
        self.freed.try_add(old_start)?;
        self.freed.lookup_mut(old_start).unwrap().number_of_pages = old_pages_in_bitmap;

        debug!(
            "relocated the free-space bitmap from {old_start} to {home} ({effective} pages)"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------------

    /// Publish this transaction's modified pages.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] -- a read transaction cannot commit.
    /// * [`Error::InvalidState`] -- `commit` already ran.
    /// * [`Error::Io`] -- a write or fsync failed; the header was not
    ///   updated, so the previous committed state is intact.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;

        let mut header = self.file_header()?;
        header.last_committed_tx_id = self.id;
        header.number_of_pages = self.snapshot.number_of_pages as u32;
        self.set_metadata(0, &PageMetadata::FileHeader(header))?;

        let transform = self.db.options.transform.as_ref();

        // Data pages first, metadata pages second, page 0 dead last.
        for page in self
            .modified
            .iter()
            .filter(|p| !is_metadata_page(p.page_num))
        {
            pages::write(&self.db.handle, transform, page.page_num, &page.data)?;
        }
        for page in self
            .modified
            .iter()
            .filter(|p| is_metadata_page(p.page_num) && p.page_num != 0)
        {
            pages::write(&self.db.handle, transform, page.page_num, &page.data)?;
        }
        self.db.handle.fsync()?;

        let zero = self.modified.lookup(0).ok_or_else(|| {
            Error::InvalidState("commit ran without a stamped header page".into())
        })?;
        pages::write(&self.db.handle, transform, 0, &zero.data)?;
        self.db.handle.fsync()?;

        self.flags.insert(TxFlags::COMMITTED);

        // Publish the new snapshot and the freed runs.
        self.db.publish_snapshot(Arc::new(Snapshot {
            map: self.snapshot.map.clone(),
            map_size: self.snapshot.map_size,
            number_of_pages: self.snapshot.number_of_pages,
            last_committed_tx_id: self.id,
        }));
        let freed_runs: Vec<FreedRun> = self
            .freed
            .iter()
            .filter(|f| self.allocated.lookup(f.page_num).is_none())
            .map(|f| FreedRun {
                freed_by: self.id,
                page_num: f.page_num,
                number_of_pages: f.number_of_pages,
            })
            .collect();
        self.db.record_frees(freed_runs);

        debug!(
            "tx {} committed {} page(s), oldest protected reader {}",
            self.id,
            self.modified.len(),
            self.can_free_after_tx_id
        );
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.flags.contains(TxFlags::WRITE) {
            self.db.release_writer();
        } else {
            self.db.unregister_reader(self.snapshot.last_committed_tx_id);
        }
        // Modified and working-set buffers are owned; dropping the maps
        // releases them on every path, committed or not.
    }
}

/// Rewrite the run length recorded in an allocation entry.
fn with_number_of_pages(entry: PageMetadata, n: u32) -> PageMetadata {
    match entry {
        PageMetadata::FreeSpaceBitmap { .. } => {
            PageMetadata::FreeSpaceBitmap { number_of_pages: n }
        }
        PageMetadata::Overflow { content_size, .. } => PageMetadata::Overflow {
            number_of_pages: n,
            content_size,
        },
        other => other,
    }
}
