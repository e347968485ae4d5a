//! Decoder for the pglz stream format used by inline compressed varlenas and
//! compressed TOAST values.
//!
//! The stream is a sequence of control bytes, each followed by up to eight
//! items. Bits are consumed LSB first: a clear bit copies one literal byte, a
//! set bit introduces a match tag referencing output already produced:
//!
//! ```text
//! byte 0: [offset bits 8..12 | length - 3]
//! byte 1: [offset bits 0..8]
//! byte 2: extra length (only when the nibble encodes 18)
//! ```

use anyhow::{bail, Result};
use common::HeapError;
use smol_str::format_smolstr;

/// Match length nibble value that announces an extension byte.
const EXTENDED_MATCH_LEN: usize = 18;

/// Decompress `source` into a buffer of exactly `raw_size` bytes.
///
/// The whole source must be consumed and the output exactly filled; anything
/// else is reported as [`HeapError::IncompleteDecompression`].
pub fn decompress(source: &[u8], raw_size: usize) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(raw_size);
    let mut sp = 0usize;

    while sp < source.len() && out.len() < raw_size {
        let mut ctrl = source[sp];
        sp += 1;

        for _ in 0..8 {
            if sp >= source.len() || out.len() >= raw_size {
                break;
            }
            if ctrl & 0x01 != 0 {
                if sp + 2 > source.len() {
                    bail!(HeapError::CorruptCompressedData(format_smolstr!(
                        "match tag at {} runs past the end of {} source bytes",
                        sp,
                        source.len()
                    )));
                }
                let mut len = (source[sp] & 0x0f) as usize + 3;
                let mut off = (((source[sp] & 0xf0) as usize) << 4) | source[sp + 1] as usize;
                sp += 2;
                if len == EXTENDED_MATCH_LEN {
                    let Some(&extra) = source.get(sp) else {
                        bail!(HeapError::CorruptCompressedData(format_smolstr!(
                            "missing length extension byte at {}",
                            sp
                        )));
                    };
                    len += extra as usize;
                    sp += 1;
                }
                if off == 0 {
                    bail!(HeapError::CorruptCompressedData(format_smolstr!(
                        "zero match offset at {}",
                        sp
                    )));
                }
                if off > out.len() {
                    bail!(HeapError::CorruptCompressedData(format_smolstr!(
                        "match offset {} reaches before the start of {} output bytes",
                        off,
                        out.len()
                    )));
                }
                len = len.min(raw_size - out.len());

                // Overlapping match: the window repeats every `off` bytes, so
                // each copy doubles the span that is safe to copy next. The copy
                // source `out.len() - off` stays fixed throughout.
                while off < len {
                    let start = out.len() - off;
                    out.extend_from_within(start..start + off);
                    len -= off;
                    off += off;
                }
                let start = out.len() - off;
                out.extend_from_within(start..start + len);
            } else {
                out.push(source[sp]);
                sp += 1;
            }
            ctrl >>= 1;
        }
    }

    if out.len() != raw_size || sp != source.len() {
        bail!(HeapError::IncompleteDecompression {
            expected: raw_size,
            produced: out.len(),
            consumed: sp,
            available: source.len(),
        });
    }
    Ok(out)
}

/// Greedy pglz encoder producing streams [`decompress`] accepts.
///
/// Only used to build fixtures; it does not try to match the compression
/// ratio of the server.
#[cfg(any(test, feature = "test-utils"))]
pub fn compress(data: &[u8]) -> Vec<u8> {
    const MAX_OFFSET: usize = 0x0fff;
    const MAX_MATCH: usize = EXTENDED_MATCH_LEN + 255;

    let longest_match = |pos: usize| -> (usize, usize) {
        let mut best = (0usize, 0usize);
        for off in 1..=pos.min(MAX_OFFSET) {
            let mut len = 0;
            while len < MAX_MATCH && pos + len < data.len() && data[pos + len] == data[pos - off + len]
            {
                len += 1;
            }
            if len > best.0 {
                best = (len, off);
            }
        }
        best
    };

    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 1);
    let mut pos = 0;
    while pos < data.len() {
        let ctrl_at = out.len();
        out.push(0u8);
        let mut bit = 0;
        while bit < 8 && pos < data.len() {
            let (len, off) = longest_match(pos);
            if len >= 3 {
                out[ctrl_at] |= 1 << bit;
                let hi = ((off >> 4) & 0xf0) as u8;
                if len >= EXTENDED_MATCH_LEN {
                    out.push(hi | 0x0f);
                    out.push((off & 0xff) as u8);
                    out.push((len - EXTENDED_MATCH_LEN) as u8);
                } else {
                    out.push(hi | (len - 3) as u8);
                    out.push((off & 0xff) as u8);
                }
                pos += len;
            } else {
                out.push(data[pos]);
                pos += 1;
            }
            bit += 1;
        }
    }
    out
}
