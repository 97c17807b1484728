//! End-to-end scenarios exercising the whole engine through the public
//! surface: allocation, exhaustion, reuse, crash durability, tree splits,
//! and the catalog root.

use std::sync::Arc;

use corvus::{catalog, BTree, Database, Error, Options, PageMetadata, PageTransform, PAGE_SIZE};
use tempfile::TempDir;

fn open_db(minimum_size: u64) -> (TempDir, Database) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let db = Database::open(
        dir.path().join("test.corvus"),
        Options {
            minimum_size,
            ..Options::default()
        },
    )
    .unwrap();
    (dir, db)
}

fn single_page() -> PageMetadata {
    PageMetadata::Overflow {
        number_of_pages: 1,
        content_size: 0,
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[test]
fn allocates_pages_after_the_reserved_ones() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();

    // Page 0 is the header/metadata page, page 1 the free-space bitmap.
    assert_eq!(tx.allocate_page(single_page(), 0).unwrap(), 2);
    assert_eq!(tx.allocate_page(single_page(), 0).unwrap(), 3);
}

#[test]
fn allocates_until_space_runs_out() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(
        dir.path().join("test.corvus"),
        Options {
            minimum_size: 128 * 1024,
            maximum_size: 128 * 1024,
            ..Options::default()
        },
    )
    .unwrap();

    // 32 pages, two of them reserved: 30 single-page allocations fit.
    let mut tx = db.write_tx().unwrap();
    for i in 0..30 {
        let page = tx.allocate_page(single_page(), 0).unwrap();
        assert_eq!(page, 2 + i);
    }

    let err = tx.allocate_page(single_page(), 0).unwrap_err();
    assert!(matches!(err, Error::NoSpace(_)));
}

#[test]
fn allocate_free_allocate_reuses_the_page() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();

    let page = tx.allocate_page(single_page(), 0).unwrap();
    tx.free_page(page).unwrap();
    assert_eq!(tx.allocate_page(single_page(), 0).unwrap(), page);
}

#[test]
fn double_free_is_rejected() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();

    let page = tx.allocate_page(single_page(), 0).unwrap();
    tx.free_page(page).unwrap();
    assert!(matches!(
        tx.free_page(page),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn small_allocations_never_touch_metadata_pages() {
    let (_dir, db) = open_db(4 * 1024 * 1024);
    let mut tx = db.write_tx().unwrap();

    for _ in 0..120 {
        let start = tx
            .allocate_page(
                PageMetadata::Overflow {
                    number_of_pages: 3,
                    content_size: 0,
                },
                0,
            )
            .unwrap();
        // The whole run stays inside one 128-page block.
        assert_eq!(start & !127, (start + 2) & !127, "run at {start} crosses");
        for page in start..start + 3 {
            assert_ne!(page & 127, 0, "allocated metadata page {page}");
        }
    }
}

#[test]
fn large_allocations_end_on_a_block_boundary() {
    let (_dir, db) = open_db(4 * 1024 * 1024);
    let mut tx = db.write_tx().unwrap();

    let start = tx
        .allocate_page(
            PageMetadata::Overflow {
                number_of_pages: 200,
                content_size: 0,
            },
            0,
        )
        .unwrap();
    assert_eq!((start + 200) % 128, 0);
}

#[test]
fn out_of_range_page_requests_are_rejected() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.read_tx().unwrap();
    assert!(matches!(
        tx.raw_get_page(100_000, 1),
        Err(Error::OutOfRange { .. })
    ));
}

// ---------------------------------------------------------------------------
// File growth
// ---------------------------------------------------------------------------

#[test]
fn the_file_grows_when_the_bitmap_is_exhausted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    {
        let db = Database::open(
            &path,
            Options {
                minimum_size: 128 * 1024,
                ..Options::default()
            },
        )
        .unwrap();
        let mut tx = db.write_tx().unwrap();
        // Far more than the initial 30 free pages.
        for _ in 0..100 {
            tx.allocate_page(single_page(), 0).unwrap();
        }
        assert!(tx.number_of_pages() > 32);
        tx.commit().unwrap();
    }

    let db = Database::open(
        &path,
        Options {
            minimum_size: 128 * 1024,
            ..Options::default()
        },
    )
    .unwrap();
    let mut tx = db.read_tx().unwrap();
    assert!(tx.file_header().unwrap().number_of_pages > 32);
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn writer_sees_its_own_modifications() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();

    let page = tx.allocate_page(single_page(), 0).unwrap();
    tx.modify_page(page).unwrap()[..4].copy_from_slice(b"ping");
    assert_eq!(&tx.get_page(page).unwrap()[..4], b"ping");
}

#[test]
fn readers_do_not_observe_uncommitted_writes() {
    let (_dir, db) = open_db(128 * 1024);

    let mut reader = db.read_tx().unwrap();
    let mut writer = db.write_tx().unwrap();
    writer.raw_modify_page(3, 1).unwrap()[..6].copy_from_slice(b"secret");

    assert_eq!(&reader.raw_get_page(3, 1).unwrap()[..6], &[0u8; 6]);
}

#[test]
fn modifying_a_free_page_requires_allocation() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();
    assert!(matches!(tx.modify_page(5), Err(Error::InvalidState(_))));
}

#[test]
fn write_operations_fail_on_read_transactions() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.read_tx().unwrap();
    assert!(matches!(
        tx.raw_modify_page(3, 1),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        tx.allocate_page(single_page(), 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(tx.commit(), Err(Error::InvalidArgument(_))));
}

#[test]
fn commit_can_only_run_once() {
    let (_dir, db) = open_db(128 * 1024);
    let mut tx = db.write_tx().unwrap();
    tx.allocate_page(single_page(), 0).unwrap();
    tx.commit().unwrap();
    assert!(matches!(tx.commit(), Err(Error::InvalidState(_))));
}

#[test]
fn aborted_transactions_leave_no_trace() {
    let (_dir, db) = open_db(128 * 1024);
    {
        let mut tx = db.write_tx().unwrap();
        let page = tx.allocate_page(single_page(), 0).unwrap();
        tx.modify_page(page).unwrap()[..5].copy_from_slice(b"ghost");
        // Dropped without commit.
    }

    let mut tx = db.write_tx().unwrap();
    // The abandoned allocation never happened.
    assert_eq!(tx.allocate_page(single_page(), 0).unwrap(), 2);
    assert_eq!(&tx.get_page(2).unwrap()[..5], &[0u8; 5]);
}

#[test]
fn freed_pages_wait_for_older_readers() {
    let (_dir, db) = open_db(128 * 1024);

    let page = {
        let mut tx = db.write_tx().unwrap();
        let page = tx.allocate_page(single_page(), 0).unwrap();
        tx.commit().unwrap();
        page
    };

    let reader = db.read_tx().unwrap();
    {
        let mut tx = db.write_tx().unwrap();
        tx.free_page(page).unwrap();
        tx.commit().unwrap();
    }

    // While the reader lives, the freed page must not be recycled.
    {
        let mut tx = db.write_tx().unwrap();
        assert_ne!(tx.allocate_page(single_page(), 0).unwrap(), page);
        // Not committed; the allocation is abandoned.
    }

    drop(reader);
    let mut tx = db.write_tx().unwrap();
    assert_eq!(tx.allocate_page(single_page(), 0).unwrap(), page);
}

// ---------------------------------------------------------------------------
// Durability
// ---------------------------------------------------------------------------

#[test]
fn committed_data_survives_a_rude_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    let options = Options {
        minimum_size: 4 * 1024 * 1024,
        ..Options::default()
    };

    {
        let db = Database::open(&path, options.clone()).unwrap();
        let mut tx = db.write_tx().unwrap();
        let page = tx.raw_modify_page(3, 1).unwrap();
        page[..13].copy_from_slice(b"Hello Gavran\0");
        tx.commit().unwrap();
        // No graceful close: the handle is dropped as-is.
    }

    let db = Database::open(&path, options).unwrap();
    let mut tx = db.read_tx().unwrap();
    assert_eq!(&tx.raw_get_page(3, 1).unwrap()[..12], b"Hello Gavran");
}

#[test]
fn uncommitted_data_is_gone_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    let options = Options {
        minimum_size: 128 * 1024,
        ..Options::default()
    };

    {
        let db = Database::open(&path, options.clone()).unwrap();
        let mut tx = db.write_tx().unwrap();
        tx.raw_modify_page(3, 1).unwrap()[..4].copy_from_slice(b"lost");
        // Dropped without commit.
    }

    let db = Database::open(&path, options).unwrap();
    let mut tx = db.read_tx().unwrap();
    assert_eq!(&tx.raw_get_page(3, 1).unwrap()[..4], &[0u8; 4]);
}

// ---------------------------------------------------------------------------
// B+tree end to end
// ---------------------------------------------------------------------------

#[test]
fn tree_contents_survive_commit_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    let options = Options {
        minimum_size: 4 * 1024 * 1024,
        ..Options::default()
    };

    let root = {
        let db = Database::open(&path, options.clone()).unwrap();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();
        for i in 0u32..1024 {
            tree.set(&mut tx, format!("{i:04}").as_bytes(), i as u64)
                .unwrap();
        }
        tx.commit().unwrap();
        tree.root()
    };

    let db = Database::open(&path, options).unwrap();
    let mut tx = db.read_tx().unwrap();
    let tree = BTree::open(root);
    for i in 0u32..1024 {
        assert_eq!(
            tree.get(&mut tx, format!("{i:04}").as_bytes()).unwrap(),
            Some(i as u64)
        );
    }
    // A root split must have happened along the way.
    assert!(matches!(
        tx.metadata(root).unwrap(),
        PageMetadata::TreeBranch(_)
    ));
}

#[test]
fn scan_agrees_with_the_inserted_set() {
    let (_dir, db) = open_db(4 * 1024 * 1024);
    let mut tx = db.write_tx().unwrap();
    let mut tree = BTree::create(&mut tx).unwrap();

    for i in 0u32..300 {
        tree.set(&mut tx, format!("{i:03}").as_bytes(), u64::from(i) * 7)
            .unwrap();
    }
    // Overwrites keep the last value.
    tree.set(&mut tx, b"042", 999).unwrap();

    let mut scan = tree.scan(&mut tx, b"").unwrap();
    let mut count = 0u32;
    while let Some((key, value)) = scan.next().unwrap() {
        let i: u32 = String::from_utf8(key).unwrap().parse().unwrap();
        if i == 42 {
            assert_eq!(value, 999);
        } else {
            assert_eq!(value, u64::from(i) * 7);
        }
        count += 1;
    }
    assert_eq!(count, 300);
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[test]
fn fresh_database_reports_the_root_catalog() {
    let (_dir, db) = open_db(4 * 1024 * 1024);
    let mut tx = db.read_tx().unwrap();

    let root = catalog::schema(&mut tx, "root").unwrap().unwrap();
    assert_eq!(root.count(), 2);
    assert_eq!(
        root.types(),
        vec![catalog::IndexType::Container, catalog::IndexType::Btree]
    );
    assert_eq!(root.index_ids(), vec![2, 4]);
}

// ---------------------------------------------------------------------------
// Buffered I/O and the transform hook
// ---------------------------------------------------------------------------

#[test]
fn buffered_mode_round_trips_without_a_map() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    let options = Options {
        minimum_size: 4 * 1024 * 1024,
        avoid_mmap_io: true,
        ..Options::default()
    };

    {
        let db = Database::open(&path, options.clone()).unwrap();
        let mut tx = db.write_tx().unwrap();
        let page = tx.allocate_page(single_page(), 0).unwrap();
        tx.modify_page(page).unwrap()[..17].copy_from_slice(b"Hello From Gavran");
        tx.commit().unwrap();
    }

    let db = Database::open(&path, options).unwrap();
    let mut tx = db.read_tx().unwrap();
    assert_eq!(&tx.get_page(2).unwrap()[..17], b"Hello From Gavran");
}

/// A toy at-rest transform: XOR with a page-number-seeded keystream.
struct XorTransform(u8);

impl PageTransform for XorTransform {
    fn before_write(&self, page_num: u64, page: &mut [u8]) {
        for (i, byte) in page.iter_mut().enumerate() {
            *byte ^= self.0 ^ (page_num as u8) ^ (i as u8);
        }
    }

    fn after_read(&self, page_num: u64, page: &mut [u8]) {
        self.before_write(page_num, page);
    }
}

#[test]
fn transformed_pages_are_ciphered_at_rest() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.corvus");
    let options = Options {
        minimum_size: 128 * 1024,
        avoid_mmap_io: true,
        transform: Some(Arc::new(XorTransform(0x5A))),
        ..Options::default()
    };

    {
        let db = Database::open(&path, options.clone()).unwrap();
        let mut tx = db.write_tx().unwrap();
        let page = tx.allocate_page(single_page(), 0).unwrap();
        tx.modify_page(page).unwrap()[..6].copy_from_slice(b"plain!");
        tx.commit().unwrap();
    }

    // The raw file bytes must not contain the plaintext.
    let raw = std::fs::read(&path).unwrap();
    let page2 = &raw[2 * PAGE_SIZE..2 * PAGE_SIZE + 6];
    assert_ne!(page2, b"plain!");

    // Reading through the hook restores it.
    {
        let db = Database::open(&path, options).unwrap();
        let mut tx = db.read_tx().unwrap();
        assert_eq!(&tx.get_page(2).unwrap()[..6], b"plain!");
    }

    // Without the hook the file is unreadable.
    let err = Database::open(
        &path,
        Options {
            minimum_size: 128 * 1024,
            avoid_mmap_io: true,
            ..Options::default()
        },
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Corruption(_) | Error::InvalidArgument(_)
    ));
}
