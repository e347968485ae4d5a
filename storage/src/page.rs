//! Heap page header and line pointer array.
//!
//! ```text
//! +----------------+---------------------+--------- ... ---------+---------+
//! | PageHeaderData | ItemIdData[n] ->    |   free space   <- tuples | special |
//! +----------------+---------------------+--------- ... ---------+---------+
//! 0               24               pd_lower            pd_upper  pd_special
//! ```

use crate::le::{read_u16_le, read_u32_le};
use crate::tuple::{decode_tuple, DecodedTuple, TupleDesc};
use anyhow::{bail, Context, Result};
use common::HeapError;
use smol_str::format_smolstr;
use tracing::trace;

pub const SIZE_OF_PAGE_HEADER: usize = 24;
pub const SIZE_OF_ITEM_ID: usize = 4;
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Layout version stored in the low byte of `pd_pagesize_version`.
pub const PG_PAGE_LAYOUT_VERSION: u16 = 4;
/// `pd_flags`: every tuple on the page is visible to all transactions.
pub const PD_ALL_VISIBLE: u16 = 0x0004;

pub const LP_UNUSED: u8 = 0;
pub const LP_NORMAL: u8 = 1;
pub const LP_REDIRECT: u8 = 2;
pub const LP_DEAD: u8 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageHeader {
    /// WAL position of the last change; opaque here.
    pub lsn: u64,
    pub checksum: u16,
    pub flags: u16,
    pub lower: u16,
    pub upper: u16,
    pub special: u16,
    pub pagesize_version: u16,
    pub prune_xid: u32,
}

impl PageHeader {
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < SIZE_OF_PAGE_HEADER {
            bail!(HeapError::TruncatedFile(page.len()));
        }
        let lsn_hi = read_u32_le(page, 0) as u64;
        let lsn_lo = read_u32_le(page, 4) as u64;
        Ok(Self {
            lsn: (lsn_hi << 32) | lsn_lo,
            checksum: read_u16_le(page, 8),
            flags: read_u16_le(page, 10),
            lower: read_u16_le(page, 12),
            upper: read_u16_le(page, 14),
            special: read_u16_le(page, 16),
            pagesize_version: read_u16_le(page, 18),
            prune_xid: read_u32_le(page, 20),
        })
    }

    /// Number of line pointers, derived from `pd_lower`.
    pub fn slot_count(&self, blkno: usize) -> Result<usize> {
        let lower = self.lower as usize;
        if lower < SIZE_OF_PAGE_HEADER {
            bail!(HeapError::CorruptPage {
                page: blkno,
                reason: format_smolstr!("pd_lower {} is inside the page header", lower),
            });
        }
        if (lower - SIZE_OF_PAGE_HEADER) % SIZE_OF_ITEM_ID != 0 {
            bail!(HeapError::CorruptPage {
                page: blkno,
                reason: format_smolstr!("pd_lower {} does not end on a line pointer", lower),
            });
        }
        Ok((lower - SIZE_OF_PAGE_HEADER) / SIZE_OF_ITEM_ID)
    }

    pub fn page_size(&self) -> usize {
        (self.pagesize_version & 0xFF00) as usize
    }

    pub fn layout_version(&self) -> u16 {
        self.pagesize_version & 0x00FF
    }

    pub fn is_all_visible(&self) -> bool {
        self.flags & PD_ALL_VISIBLE != 0
    }
}

/// One `ItemIdData` word: `lp_off:15`, `lp_flags:2`, `lp_len:15`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotEntry(u32);

impl SlotEntry {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(offset: usize, flags: u8, len: usize) -> Result<Self> {
        if offset > 0x7FFF || len > 0x7FFF || flags > LP_DEAD {
            bail!("line pointer ({offset}, {flags}, {len}) does not fit in 32 bits");
        }
        Ok(Self(offset as u32 | ((flags as u32) << 15) | ((len as u32) << 17)))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn offset(self) -> usize {
        (self.0 & 0x7FFF) as usize
    }

    pub fn flags(self) -> u8 {
        ((self.0 >> 15) & 0x03) as u8
    }

    pub fn len(self) -> usize {
        (self.0 >> 17) as usize
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Length rounded up to `MAXALIGN`, the space the tuple occupies.
    pub fn padded_len(self) -> usize {
        crate::le::maxalign(self.len())
    }

    pub fn has_storage(self) -> bool {
        !self.is_empty()
    }
}

/// A decoded heap page. `tuples[i]` belongs to `slots[i]`; slots without
/// storage have no tuple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapPage {
    pub blkno: usize,
    pub header: PageHeader,
    pub slots: Vec<SlotEntry>,
    pub tuples: Vec<Option<DecodedTuple>>,
}

impl HeapPage {
    /// Decode a page (or the final short segment of a file).
    pub fn decode(blkno: usize, page: &[u8], desc: &TupleDesc) -> Result<Self> {
        let header = PageHeader::decode(page)?;
        let count = header.slot_count(blkno)?;
        let linp_end = SIZE_OF_PAGE_HEADER + count * SIZE_OF_ITEM_ID;
        if linp_end > page.len() {
            bail!(HeapError::CorruptPage {
                page: blkno,
                reason: format_smolstr!(
                    "{} line pointers run past the {} byte page",
                    count,
                    page.len()
                ),
            });
        }

        let slots: Vec<SlotEntry> = (0..count)
            .map(|i| SlotEntry(read_u32_le(page, SIZE_OF_PAGE_HEADER + i * SIZE_OF_ITEM_ID)))
            .collect();

        let mut tuples = Vec::with_capacity(count);
        for (i, slot) in slots.iter().enumerate() {
            if !slot.has_storage() {
                tuples.push(None);
                continue;
            }
            let start = slot.offset();
            let end = start + slot.len();
            if end > page.len() {
                bail!(HeapError::CorruptPage {
                    page: blkno,
                    reason: format_smolstr!(
                        "slot {} covers [{}, {}) past the {} byte page",
                        i + 1,
                        start,
                        end,
                        page.len()
                    ),
                });
            }
            let tuple = decode_tuple(desc, &page[start..end])
                .with_context(|| format!("page {} slot {}", blkno, i + 1))?;
            tuples.push(Some(tuple));
        }
        trace!(blkno, slots = count, lower = header.lower, upper = header.upper, "decoded page");

        Ok(Self {
            blkno,
            header,
            slots,
            tuples,
        })
    }

    pub fn lp_count(&self) -> usize {
        self.slots.len()
    }

    /// Tuples of slots that have storage, in slot order.
    pub fn live_tuples(&self) -> impl Iterator<Item = &DecodedTuple> {
        self.tuples.iter().flatten()
    }
}
