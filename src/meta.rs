//! Per-page metadata entries and the file header.
//!
//! Every block of [`PAGES_IN_METADATA`] (128) consecutive pages begins with
//! a **metadata page**: a page whose number has its low seven bits clear
//! and whose body is an array of 128 fixed-size entries, entry `i`
//! describing page `base | i`. The metadata page of the first block is
//! page 0, and its entry 0 doubles as the **file header**.
//!
//! ## Entry layout
//!
//! Entries are [`METADATA_ENTRY_SIZE`] (32) bytes; byte 0 is the page-kind
//! tag and the remaining bytes depend on the kind (all integers
//! little-endian):
//!
//! | kind | bytes after the tag |
//! |------|---------------------|
//! | `free` | all zero |
//! | `file_header` | `[1] version, [2] page_size_power, [3] flags, [4..12] magic, [12..16] number_of_pages u32, [16..24] last_committed_tx_id u64, [24..28] bitmap first page u32, [28..32] catalog root u32` |
//! | `metadata` | zero |
//! | `free_space_bitmap` | `[4..8] number_of_pages u32` |
//! | `overflow` | `[4..8] number_of_pages u32, [8..16] content size u64` |
//! | `tree_leaf` / `tree_branch` | `[4..6] floor u16, [6..8] ceiling u16, [8..10] free_space u16` |
//!
//! An all-zero entry decodes as `free`, which is what makes a zero-filled
//! file a valid empty database and an untouched metadata page a valid
//! "not yet materialized" one.

use crate::error::{Error, Result};
use crate::pages::PAGE_SIZE;

/// Pages covered by one metadata page.
pub const PAGES_IN_METADATA: u64 = 128;

/// Low bits selecting the entry index within a metadata page.
pub const PAGES_IN_METADATA_MASK: u64 = PAGES_IN_METADATA - 1;

/// Size of one metadata entry in bytes.
pub const METADATA_ENTRY_SIZE: usize = PAGE_SIZE / PAGES_IN_METADATA as usize;

/// Magic bytes at the start of the file header entry's payload.
pub const FILE_MAGIC: [u8; 8] = *b"corvusdb";

/// On-disk format version this crate reads and writes.
pub const FORMAT_VERSION: u8 = 1;

/// The metadata page covering `page_num`.
#[inline]
pub fn metadata_page_of(page_num: u64) -> u64 {
    page_num & !PAGES_IN_METADATA_MASK
}

/// The entry index of `page_num` within its metadata page.
#[inline]
pub fn entry_index_of(page_num: u64) -> usize {
    (page_num & PAGES_IN_METADATA_MASK) as usize
}

/// `true` when `page_num` is a metadata page.
#[inline]
pub fn is_metadata_page(page_num: u64) -> bool {
    page_num & PAGES_IN_METADATA_MASK == 0
}

// Page-kind tags.
const KIND_FREE: u8 = 0;
const KIND_FILE_HEADER: u8 = 1;
const KIND_METADATA: u8 = 2;
const KIND_FREE_SPACE_BITMAP: u8 = 3;
const KIND_OVERFLOW: u8 = 4;
const KIND_TREE_LEAF: u8 = 5;
const KIND_TREE_BRANCH: u8 = 6;

// File-header flag bits.
const HEADER_FLAG_TRANSFORMED: u8 = 1;

/// The file header, stored as entry 0 of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version; must equal [`FORMAT_VERSION`].
    pub version: u8,
    /// `log2(PAGE_SIZE)` at creation time.
    pub page_size_power: u8,
    /// Pages are ciphered through a transform hook before they reach disk.
    pub transformed: bool,
    /// Total pages in the file; the file length is exactly
    /// `number_of_pages * PAGE_SIZE`.
    pub number_of_pages: u32,
    /// Id of the most recently committed write transaction.
    pub last_committed_tx_id: u64,
    /// First page of the free-space bitmap run.
    pub free_space_bitmap: u32,
    /// Root page of the catalog tree; `0` until the catalog materializes.
    pub catalog_root: u32,
}

/// Slot-directory cursors for a B+tree node, kept in the page's metadata
/// entry rather than in the page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeHeader {
    /// One past the end of the slot array (grows up from 0).
    pub floor: u16,
    /// Start of the entry region (grows down from `PAGE_SIZE`).
    pub ceiling: u16,
    /// `ceiling - floor`, maintained on every mutation.
    pub free_space: u16,
}

/// A decoded metadata entry. The tag selects how the described page's body
/// is interpreted; representing it as a closed sum keeps every consumer an
/// exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMetadata {
    Free,
    FileHeader(FileHeader),
    Metadata,
    FreeSpaceBitmap {
        number_of_pages: u32,
    },
    Overflow {
        number_of_pages: u32,
        /// Bytes of the logical value stored in the run.
        content_size: u64,
    },
    TreeLeaf(TreeHeader),
    TreeBranch(TreeHeader),
}

impl PageMetadata {
    /// `true` for the `free` kind.
    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, PageMetadata::Free)
    }

    /// Length in pages of the allocation this entry describes.
    pub fn number_of_pages(&self) -> u32 {
        match self {
            PageMetadata::Free
            | PageMetadata::FileHeader(_)
            | PageMetadata::Metadata
            | PageMetadata::TreeLeaf(_)
            | PageMetadata::TreeBranch(_) => 1,
            PageMetadata::FreeSpaceBitmap { number_of_pages }
            | PageMetadata::Overflow {
                number_of_pages, ..
            } => *number_of_pages,
        }
    }

    /// Encode into a 32-byte entry slot.
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), METADATA_ENTRY_SIZE);
        buf.fill(0);
        match self {
            PageMetadata::Free => {}
            PageMetadata::FileHeader(h) => {
                buf[0] = KIND_FILE_HEADER;
                buf[1] = h.version;
                buf[2] = h.page_size_power;
                buf[3] = if h.transformed {
                    HEADER_FLAG_TRANSFORMED
                } else {
                    0
                };
                buf[4..12].copy_from_slice(&FILE_MAGIC);
                buf[12..16].copy_from_slice(&h.number_of_pages.to_le_bytes());
                buf[16..24].copy_from_slice(&h.last_committed_tx_id.to_le_bytes());
                buf[24..28].copy_from_slice(&h.free_space_bitmap.to_le_bytes());
                buf[28..32].copy_from_slice(&h.catalog_root.to_le_bytes());
            }
            PageMetadata::Metadata => buf[0] = KIND_METADATA,
            PageMetadata::FreeSpaceBitmap { number_of_pages } => {
                buf[0] = KIND_FREE_SPACE_BITMAP;
                buf[4..8].copy_from_slice(&number_of_pages.to_le_bytes());
            }
            PageMetadata::Overflow {
                number_of_pages,
                content_size,
            } => {
                buf[0] = KIND_OVERFLOW;
                buf[4..8].copy_from_slice(&number_of_pages.to_le_bytes());
                buf[8..16].copy_from_slice(&content_size.to_le_bytes());
            }
            PageMetadata::TreeLeaf(t) | PageMetadata::TreeBranch(t) => {
                buf[0] = if matches!(self, PageMetadata::TreeLeaf(_)) {
                    KIND_TREE_LEAF
                } else {
                    KIND_TREE_BRANCH
                };
                buf[4..6].copy_from_slice(&t.floor.to_le_bytes());
                buf[6..8].copy_from_slice(&t.ceiling.to_le_bytes());
                buf[8..10].copy_from_slice(&t.free_space.to_le_bytes());
            }
        }
    }

    /// Decode a 32-byte entry slot.
    ///
    /// # Errors
    ///
    /// [`Error::Corruption`] on an unknown kind tag.
    pub fn decode(buf: &[u8]) -> Result<PageMetadata> {
        debug_assert_eq!(buf.len(), METADATA_ENTRY_SIZE);
        let entry = match buf[0] {
            KIND_FREE => PageMetadata::Free,
            KIND_FILE_HEADER => {
                if buf[4..12] != FILE_MAGIC {
                    return Err(Error::Corruption(
                        "file header magic mismatch, not a corvus file".into(),
                    ));
                }
                PageMetadata::FileHeader(FileHeader {
                    version: buf[1],
                    page_size_power: buf[2],
                    transformed: buf[3] & HEADER_FLAG_TRANSFORMED != 0,
                    number_of_pages: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
                    last_committed_tx_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
                    free_space_bitmap: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
                    catalog_root: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
                })
            }
            KIND_METADATA => PageMetadata::Metadata,
            KIND_FREE_SPACE_BITMAP => PageMetadata::FreeSpaceBitmap {
                number_of_pages: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            },
            KIND_OVERFLOW => PageMetadata::Overflow {
                number_of_pages: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
                content_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            },
            KIND_TREE_LEAF => PageMetadata::TreeLeaf(decode_tree_header(buf)),
            KIND_TREE_BRANCH => PageMetadata::TreeBranch(decode_tree_header(buf)),
            other => {
                return Err(Error::Corruption(format!(
                    "unknown page kind tag {other}"
                )))
            }
        };
        Ok(entry)
    }
}

fn decode_tree_header(buf: &[u8]) -> TreeHeader {
    TreeHeader {
        floor: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
        ceiling: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
        free_space: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
    }
}

/// Validate a metadata page's own entry (entry 0 describes the metadata
/// page itself).
///
/// Page 0 must be the file header. Any other metadata page must either
/// carry the `metadata` kind or still be untouched (`free`, all-zero), in
/// which case it is materialized by the first modification in its block.
pub fn validate_metadata_page(page_num: u64, own_entry: &PageMetadata) -> Result<()> {
    let ok = if page_num == 0 {
        matches!(own_entry, PageMetadata::FileHeader(_))
    } else {
        matches!(own_entry, PageMetadata::Metadata | PageMetadata::Free)
    };
    if !ok {
        return Err(Error::Corruption(format!(
            "page {page_num} is not a valid metadata page"
        )));
    }
    Ok(())
}
