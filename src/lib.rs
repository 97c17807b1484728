//! # corvus
//!
//! A single-file embedded transactional key-value storage engine.
//!
//! corvus exposes a paged, transactional ordered map on top of one regular
//! file. A database is a flat array of 4 096-byte pages; every 128th page
//! holds the metadata entries describing its block, a free-space bitmap
//! tracks allocation, and B+trees built from those pages provide the
//! user-facing ordered map and the table-schema catalog.
//!
//! Concurrency follows the single-writer / many-readers model: any number
//! of read transactions observe an immutable snapshot taken at their
//! creation, while at most one write transaction builds a private
//! copy-on-write modified set and publishes it atomically on commit. With
//! durability enabled, a successful commit survives process or machine
//! crash: modified pages are written and synced before the file header --
//! the single commit point -- is updated and synced.
//!
//! ```no_run
//! use corvus::{BTree, Database, Options};
//!
//! let db = Database::open("/tmp/example.corvus", Options::default())?;
//! let mut tx = db.write_tx()?;
//! let mut tree = BTree::create(&mut tx)?;
//! tree.set(&mut tx, b"answer", 42)?;
//! tx.commit()?;
//! # Ok::<(), corvus::Error>(())
//! ```

pub mod bitmap;
pub mod btree;
pub mod catalog;
pub mod error;
pub mod meta;
pub mod pagemap;
pub mod pages;
pub mod pal;
pub mod txn;
pub mod varint;

pub use btree::BTree;
pub use error::{Error, Result};
pub use meta::{FileHeader, PageMetadata, TreeHeader};
pub use pages::PAGE_SIZE;
pub use txn::{Transaction, TxFlags};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use memmap2::Mmap;

use meta::FORMAT_VERSION;
use pal::{CreationFlags, FileHandle};

/// Smallest file size [`Options::minimum_size`] accepts.
pub const MINIMUM_FILE_SIZE: u64 = 128 * 1024;

/// Hook transforming page bytes between their in-memory and at-rest
/// representations (encryption at rest, checksumming, ...).
///
/// The hook requires buffered I/O ([`Options::avoid_mmap_io`]): with a
/// shared map there is no private storage for the deciphered bytes.
pub trait PageTransform: Send + Sync {
    /// Cipher `page` in place just before it is written at `page_num`.
    fn before_write(&self, page_num: u64, page: &mut [u8]);
    /// Decipher `page` in place just after it was read from `page_num`.
    fn after_read(&self, page_num: u64, page: &mut [u8]);
}

/// Options recognised by [`Database::open`].
#[derive(Clone)]
pub struct Options {
    /// The file is grown to at least this size on open; must be at least
    /// [`MINIMUM_FILE_SIZE`] and page-aligned.
    pub minimum_size: u64,
    /// Upper bound on file growth; allocations that would require growing
    /// past it fail with [`Error::NoSpace`].
    pub maximum_size: u64,
    /// Use positional I/O and a per-transaction working set instead of a
    /// shared memory map. Required for the transform hook, useful on
    /// 32-bit address spaces.
    pub avoid_mmap_io: bool,
    /// Make commits crash-durable by issuing fsync barriers. When off the
    /// database is only guaranteed consistent on clean close.
    pub durable: bool,
    /// Optional page transform (see [`PageTransform`]).
    pub transform: Option<Arc<dyn PageTransform>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            minimum_size: 1024 * 1024,
            maximum_size: u64::MAX,
            avoid_mmap_io: false,
            durable: true,
            transform: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("minimum_size", &self.minimum_size)
            .field("maximum_size", &self.maximum_size)
            .field("avoid_mmap_io", &self.avoid_mmap_io)
            .field("durable", &self.durable)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A committed, read-only view of the database: the base every transaction
/// starts from (the default read transaction).
///
/// Read transactions clone the [`Arc`], so a map span lives exactly as long
/// as the longest-living transaction that observes it.
pub(crate) struct Snapshot {
    pub(crate) map: Option<Arc<Mmap>>,
    pub(crate) map_size: u64,
    pub(crate) number_of_pages: u64,
    pub(crate) last_committed_tx_id: u64,
}

/// A run freed by a committed transaction that may still be observable by
/// live readers and therefore must not be recycled yet.
#[derive(Debug, Clone)]
pub(crate) struct FreedRun {
    pub(crate) freed_by: u64,
    pub(crate) page_num: u64,
    pub(crate) number_of_pages: u32,
}

/// Shared engine state behind a [`Database`].
pub(crate) struct DbState {
    pub(crate) handle: FileHandle,
    pub(crate) options: Options,
    committed: Mutex<Arc<Snapshot>>,
    writer_active: AtomicBool,
    /// Live reader snapshot ids with multiplicity.
    live_readers: Mutex<BTreeMap<u64, usize>>,
    /// Freed runs waiting for the readers that predate them to finish.
    freed_log: Mutex<Vec<FreedRun>>,
}

impl DbState {
    pub(crate) fn current_snapshot(&self) -> Arc<Snapshot> {
        self.committed.lock().unwrap().clone()
    }

    pub(crate) fn publish_snapshot(&self, snapshot: Arc<Snapshot>) {
        *self.committed.lock().unwrap() = snapshot;
    }

    pub(crate) fn acquire_writer(&self) -> Result<()> {
        if self
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        self.writer_active.store(false, Ordering::Release);
    }

    pub(crate) fn register_reader(&self, snapshot_id: u64) {
        *self
            .live_readers
            .lock()
            .unwrap()
            .entry(snapshot_id)
            .or_insert(0) += 1;
    }

    pub(crate) fn unregister_reader(&self, snapshot_id: u64) {
        let mut readers = self.live_readers.lock().unwrap();
        if let Some(count) = readers.get_mut(&snapshot_id) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&snapshot_id);
            }
        }
    }

    /// Snapshot id of the oldest live reader, `u64::MAX` when none.
    pub(crate) fn oldest_live_reader(&self) -> u64 {
        self.live_readers
            .lock()
            .unwrap()
            .keys()
            .next()
            .copied()
            .unwrap_or(u64::MAX)
    }

    /// Split the freed log: runs every live reader already sees as free
    /// are dropped (they become allocatable again), the rest are returned
    /// for the new writer to veto.
    pub(crate) fn take_blocked_frees(&self, oldest_live_reader: u64) -> Vec<FreedRun> {
        let mut log = self.freed_log.lock().unwrap();
        log.retain(|run| run.freed_by > oldest_live_reader);
        log.clone()
    }

    pub(crate) fn record_frees(&self, mut runs: Vec<FreedRun>) {
        if !runs.is_empty() {
            self.freed_log.lock().unwrap().append(&mut runs);
        }
    }
}

/// An open corvus database.
///
/// All access happens through transactions obtained from
/// [`read_tx`](Database::read_tx) and [`write_tx`](Database::write_tx).
/// Transactions borrow the database, so it cannot be closed while any of
/// them is alive.
pub struct Database {
    state: Option<DbState>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database at `path`, creating and initializing the file if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] -- bad options.
    /// * [`Error::Busy`] -- the file is locked by another handle.
    /// * [`Error::Corruption`] -- the file exists but fails header
    ///   validation (wrong magic, version, page size, or a truncated
    ///   file).
    /// * [`Error::Io`] -- the file could not be created, sized, or mapped.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Database> {
        validate_options(&options)?;

        let flags = if options.durable {
            CreationFlags::DURABLE
        } else {
            CreationFlags::empty()
        };
        let handle = FileHandle::create(path.as_ref(), flags)?;
        handle.set_size(options.minimum_size, u64::MAX)?;

        let map = if options.avoid_mmap_io {
            None
        } else {
            Some(Arc::new(handle.map()?))
        };
        let map_size = handle.size();
        let snapshot = Arc::new(Snapshot {
            map,
            map_size,
            number_of_pages: map_size / PAGE_SIZE as u64,
            last_committed_tx_id: 0,
        });

        let db = Database {
            state: Some(DbState {
                handle,
                options,
                committed: Mutex::new(snapshot),
                writer_active: AtomicBool::new(false),
                live_readers: Mutex::new(BTreeMap::new()),
                freed_log: Mutex::new(Vec::new()),
            }),
        };

        // Fresh-file detection looks at the raw on-disk bytes: an all-zero
        // page 0 means the structure was never initialized. (Deliberately
        // not routed through the transform hook, which would garble the
        // zeros.)
        let is_new = {
            let mut first = vec![0u8; PAGE_SIZE];
            db.state()?.handle.read_at(0, &mut first)?;
            first.iter().all(|&b| b == 0)
        };
        if is_new {
            db.init_file_structure()?;
            debug!(
                "initialized a fresh database at {}",
                path.as_ref().display()
            );
        }
        db.validate_existing_file()?;

        Ok(db)
    }

    /// Start a read transaction: an immutable snapshot of the committed
    /// state as of now.
    pub fn read_tx(&self) -> Result<Transaction<'_>> {
        Transaction::new(self.state()?, TxFlags::READ)
    }

    /// Start the write transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] -- another write transaction is live.
    pub fn write_tx(&self) -> Result<Transaction<'_>> {
        Transaction::new(self.state()?, TxFlags::WRITE)
    }

    /// Close the database, releasing the map, the file, and its lock.
    ///
    /// Closing twice is a no-op; transactions must have ended before the
    /// call (they borrow the database, so the compiler enforces this).
    pub fn close(&mut self) -> Result<()> {
        if let Some(state) = self.state.take() {
            let synced = state.handle.fsync();
            drop(state);
            synced?;
        }
        Ok(())
    }

    fn state(&self) -> Result<&DbState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::InvalidState("the database has been closed".into()))
    }

    /// First-time initialization: stamp the file header and lay out the
    /// free-space bitmap right behind it.
    fn init_file_structure(&self) -> Result<()> {
        let state = self.state()?;
        let number_of_pages = state.current_snapshot().number_of_pages;
        let bits_per_page = PAGE_SIZE as u64 * 8;
        let bitmap_pages = ((number_of_pages + bits_per_page - 1) / bits_per_page) as u32;

        let mut tx = self.write_tx()?;

        // The header entry has to exist before `set_metadata` can validate
        // page 0, so stamp it through the raw path.
        let header = FileHeader {
            version: FORMAT_VERSION,
            page_size_power: PAGE_SIZE.trailing_zeros() as u8,
            transformed: state.options.transform.is_some(),
            number_of_pages: number_of_pages as u32,
            last_committed_tx_id: 0,
            free_space_bitmap: 1,
            catalog_root: 0,
        };
        {
            let zero = tx.raw_modify_page(0, 1)?;
            zero.fill(0);
            PageMetadata::FileHeader(header).encode(&mut zero[..meta::METADATA_ENTRY_SIZE]);
        }

        tx.set_metadata(
            1,
            &PageMetadata::FreeSpaceBitmap {
                number_of_pages: bitmap_pages,
            },
        )?;
        {
            let bits = tx.raw_modify_page(1, bitmap_pages)?;
            bits.fill(0);
            if !bitmap::set_range(bits, 0, number_of_pages) {
                return Err(Error::Corruption("fresh bitmap was not zeroed".into()));
            }
            bitmap::clear_range(bits, 0, 1);
            bitmap::clear_range(bits, 1, bitmap_pages as u64);
        }

        tx.commit()
    }

    /// Validate the header of an existing file and adopt its committed
    /// state as the base snapshot.
    fn validate_existing_file(&self) -> Result<()> {
        let state = self.state()?;
        let header = {
            let mut tx = self.read_tx()?;
            tx.file_header()?
        };

        if header.version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "file format version {} is not supported (expected {FORMAT_VERSION})",
                header.version
            )));
        }
        if 1usize << header.page_size_power != PAGE_SIZE {
            return Err(Error::Corruption(format!(
                "file page size 2^{} does not match the engine page size",
                header.page_size_power
            )));
        }
        let expected_len = header.number_of_pages as u64 * PAGE_SIZE as u64;
        if expected_len > state.handle.size() {
            return Err(Error::Corruption(format!(
                "file is smaller than its header claims ({} < {expected_len}), truncated?",
                state.handle.size()
            )));
        }
        if header.transformed != state.options.transform.is_some() {
            return Err(Error::InvalidArgument(
                "the file's at-rest transform setting does not match the options".into(),
            ));
        }

        let base = state.current_snapshot();
        state.publish_snapshot(Arc::new(Snapshot {
            map: base.map.clone(),
            map_size: base.map_size,
            number_of_pages: header.number_of_pages as u64,
            last_committed_tx_id: header.last_committed_tx_id,
        }));
        Ok(())
    }
}

fn validate_options(options: &Options) -> Result<()> {
    if options.minimum_size < MINIMUM_FILE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "minimum_size cannot be less than {MINIMUM_FILE_SIZE} bytes"
        )));
    }
    if options.minimum_size > options.maximum_size {
        return Err(Error::InvalidArgument(
            "minimum_size exceeds maximum_size".into(),
        ));
    }
    if options.minimum_size % PAGE_SIZE as u64 != 0 {
        return Err(Error::InvalidArgument(
            "minimum_size must be a multiple of the page size".into(),
        ));
    }
    if options.transform.is_some() && !options.avoid_mmap_io {
        return Err(Error::InvalidArgument(
            "a page transform requires avoid_mmap_io".into(),
        ));
    }
    Ok(())
}
