use anyhow::{bail, Result};
use common::HeapError;

/// Postgres `MAXALIGN` on 64-bit platforms.
pub const MAXIMUM_ALIGNOF: usize = 8;

#[inline]
pub(crate) const fn maxalign(len: usize) -> usize {
    (len + MAXIMUM_ALIGNOF - 1) & !(MAXIMUM_ALIGNOF - 1)
}

/// Bounds-checked sub-slice; running off the end is a truncated tuple.
#[inline]
pub(crate) fn slice_at(buf: &[u8], off: usize, len: usize) -> Result<&[u8]> {
    let Some(end) = off.checked_add(len) else {
        bail!(HeapError::TruncatedTuple {
            needed: usize::MAX,
            available: buf.len(),
        });
    };
    match buf.get(off..end) {
        Some(bytes) => Ok(bytes),
        None => bail!(HeapError::TruncatedTuple {
            needed: end,
            available: buf.len(),
        }),
    }
}

// Callers check bounds before reading fixed fields.
#[inline]
pub(crate) fn read_u16_le(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub(crate) fn read_u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
