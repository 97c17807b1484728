//! Free-space bitmap search.
//!
//! The free-space bitmap carries one bit per page, bit set = page free,
//! packed into 64-bit little-endian words inside one or more
//! `free_space_bitmap` pages. This module implements the word-at-a-time
//! scan that locates a run of `space_required` consecutive free pages,
//! preferring candidates close to a caller-supplied position, plus the
//! bit-range bookkeeping used when allocations are carved out and freed.
//!
//! Candidate runs are filtered through an acceptance policy that keeps
//! allocations away from metadata pages (pages whose number has the low
//! seven bits clear):
//!
//! * a request smaller than a metadata block may not touch a metadata page
//!   at all -- candidates are shifted off a metadata-page start and, when
//!   they would cross into the next block, past that block's metadata page;
//! * a larger request is slid so that its end lands exactly on a block
//!   boundary (just before the next metadata page).
//!
//! Rejected candidates simply resume the scan at the next run.

use crate::meta::{is_metadata_page, metadata_page_of, PAGES_IN_METADATA};

/// Scans maximal runs of set bits in a bitmap byte slice.
struct RunScanner<'a> {
    bitmap: &'a [u8],
    total_pages: u64,
    /// Next bit index to examine.
    pos: u64,
}

impl<'a> RunScanner<'a> {
    fn new(bitmap: &'a [u8], total_pages: u64, start: u64) -> RunScanner<'a> {
        debug_assert!(bitmap.len() as u64 * 8 >= total_pages);
        RunScanner {
            bitmap,
            total_pages,
            pos: start,
        }
    }

    #[inline]
    fn word(&self, word_index: u64) -> u64 {
        let byte = word_index as usize * 8;
        if byte >= self.bitmap.len() {
            return 0;
        }
        let end = (byte + 8).min(self.bitmap.len());
        let mut raw = [0u8; 8];
        raw[..end - byte].copy_from_slice(&self.bitmap[byte..end]);
        u64::from_le_bytes(raw)
    }

    #[inline]
    fn is_set(&self, bit: u64) -> bool {
        self.word(bit / 64) & (1 << (bit % 64)) != 0
    }

    /// The next maximal run of set bits at or after the scan position, as
    /// `(start, length)`.
    fn next_run(&mut self) -> Option<(u64, u64)> {
        let mut bit = self.pos;

        // Find the first set bit, skipping empty words.
        while bit < self.total_pages {
            if bit % 64 == 0 && self.word(bit / 64) == 0 {
                bit += 64;
                continue;
            }
            if self.is_set(bit) {
                break;
            }
            bit += 1;
        }
        if bit >= self.total_pages {
            self.pos = self.total_pages;
            return None;
        }

        let start = bit;
        // Extend over full words where possible.
        while bit < self.total_pages {
            if bit % 64 == 0 && bit + 64 <= self.total_pages && self.word(bit / 64) == u64::MAX {
                bit += 64;
                continue;
            }
            if !self.is_set(bit) {
                break;
            }
            bit += 1;
        }

        self.pos = bit + 1;
        Some((start, bit - start))
    }
}

/// Apply the metadata-avoidance policy to a candidate run.
///
/// Returns the (possibly shifted) start position when the run can host
/// `space_required` pages, `None` otherwise.
fn acceptable_match(position: u64, available: u64, space_required: u64) -> Option<u64> {
    if space_required > available {
        return None;
    }
    let mut position = position;
    let mut available = available;

    if space_required < PAGES_IN_METADATA {
        if is_metadata_page(position) {
            // Cannot start on a metadata page; shift off it.
            position += 1;
            available -= 1;
            if space_required > available {
                return None;
            }
        }
        let start_block = metadata_page_of(position);
        let end_block = metadata_page_of(position + space_required - 1);
        if start_block == end_block {
            return Some(position);
        }
        // The run crosses into the next block; restart just past that
        // block's metadata page.
        let new_start = start_block + PAGES_IN_METADATA + 1;
        if new_start + space_required > position + available {
            return None;
        }
        return Some(new_start);
    }

    // Large request: slide the run so its end lands on a block boundary,
    // just before the next metadata page. Callers guarantee the size is
    // not a multiple of the block, so the shifted start is never a
    // metadata page itself.
    debug_assert!(space_required % PAGES_IN_METADATA != 0);
    let end = position + space_required;
    if end % PAGES_IN_METADATA == 0 {
        return Some(position);
    }
    let new_end = metadata_page_of(end) + PAGES_IN_METADATA;
    if new_end > position + available {
        return None;
    }
    Some(new_end - space_required)
}

/// Find a run of `space_required` free pages, preferring runs at or after
/// `near_position`. `veto` gives the caller a final say on a shifted
/// candidate (used to keep recently freed pages out of reach of live
/// readers); a vetoed candidate resumes the scan at the next run.
pub fn find_free_run(
    bitmap: &[u8],
    total_pages: u64,
    space_required: u64,
    near_position: u64,
    veto: impl Fn(u64) -> bool,
) -> Option<u64> {
    debug_assert!(space_required > 0);

    let near_word = (near_position.min(total_pages) / 64) * 64;
    let passes = [Some(near_word), (near_word != 0).then_some(0)];

    for start in passes.into_iter().flatten() {
        let mut scanner = RunScanner::new(bitmap, total_pages, start);
        while let Some((position, available)) = scanner.next_run() {
            if let Some(found) = acceptable_match(position, available, space_required) {
                if veto(found) {
                    // Retry inside the same run, just past the veto.
                    scanner.pos = found + 1;
                    continue;
                }
                return Some(found);
            }
        }
    }
    None
}

/// `true` when the bit for `page_num` is set (page free).
#[inline]
pub fn is_free(bitmap: &[u8], page_num: u64) -> bool {
    let byte = (page_num / 8) as usize;
    bitmap[byte] & (1 << (page_num % 8)) != 0
}

/// Clear the bits for `[start, start + len)` -- the run is now allocated.
pub fn clear_range(bitmap: &mut [u8], start: u64, len: u64) {
    for page in start..start + len {
        let byte = (page / 8) as usize;
        bitmap[byte] &= !(1 << (page % 8));
    }
}

/// Set the bits for `[start, start + len)` -- the run is free again.
///
/// Returns `false` when any bit in the range was already set, leaving the
/// bitmap untouched; the caller reports the double free.
#[must_use]
pub fn set_range(bitmap: &mut [u8], start: u64, len: u64) -> bool {
    for page in start..start + len {
        if is_free(bitmap, page) {
            return false;
        }
    }
    for page in start..start + len {
        let byte = (page / 8) as usize;
        bitmap[byte] |= 1 << (page % 8);
    }
    true
}
