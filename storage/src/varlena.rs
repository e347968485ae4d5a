//! Variable-length value (varlena) headers.
//!
//! Only the little-endian layouts are understood. The leading byte selects
//! the encoding:
//!
//! ```text
//! xxxxxxx1  1-byte header, total length in the upper 7 bits
//! 00000001  1-byte header followed by a vartag (TOAST pointer)
//! xxxxxx00  4-byte header, uncompressed
//! xxxxxx10  4-byte header, compressed; a raw-size word follows
//! ```

use crate::le::{read_u32_le, slice_at};
use crate::pglz;
use anyhow::{bail, Result};
use common::HeapError;
use smol_str::format_smolstr;
use std::borrow::Cow;

pub const VARHDRSZ: usize = 4;
pub const VARHDRSZ_SHORT: usize = 1;
pub const VARHDRSZ_EXTERNAL: usize = 2;
/// Header plus raw-size word of an inline compressed value.
pub const VARHDRSZ_COMPRESSED: usize = 8;

pub const VARLENA_EXTSIZE_BITS: u32 = 30;
pub const VARLENA_EXTSIZE_MASK: u32 = (1 << VARLENA_EXTSIZE_BITS) - 1;

pub const TOAST_PGLZ_COMPRESSION_ID: u32 = 0;
pub const TOAST_LZ4_COMPRESSION_ID: u32 = 1;

/// Classification of a value with respect to out-of-line storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VarTag {
    /// Not a TOAST pointer: inline value, fixed-width value or null.
    #[default]
    Unused,
    Indirect,
    ExpandedRo,
    ExpandedRw,
    OnDisk,
}

impl VarTag {
    pub fn from_byte(tag: u8) -> Result<Self> {
        let tag = match tag {
            1 => VarTag::Indirect,
            2 => VarTag::ExpandedRo,
            3 => VarTag::ExpandedRw,
            18 => VarTag::OnDisk,
            other => bail!(HeapError::UnsupportedVarlenaEncoding(format_smolstr!(
                "vartag {}",
                other
            ))),
        };
        Ok(tag)
    }

    pub fn as_byte(self) -> u8 {
        match self {
            VarTag::Unused => 0,
            VarTag::Indirect => 1,
            VarTag::ExpandedRo => 2,
            VarTag::ExpandedRw => 3,
            VarTag::OnDisk => 18,
        }
    }

    /// Size of the pointer that follows the 2-byte external header.
    ///
    /// In-memory pointers (indirect, expanded) are a single machine pointer.
    pub fn payload_len(self) -> usize {
        match self {
            VarTag::Unused => 0,
            VarTag::OnDisk => ExternalPointer::SIZE,
            VarTag::Indirect | VarTag::ExpandedRo | VarTag::ExpandedRw => 8,
        }
    }

    pub fn is_external(self) -> bool {
        self != VarTag::Unused
    }
}

/// `varatt_external`: where a TOASTed value lives in the companion file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExternalPointer {
    /// Original size including the 4-byte header.
    pub rawsize: u32,
    /// Stored size in the low 30 bits, compression method in the top 2.
    pub extinfo: u32,
    pub value_id: u32,
    pub toast_relid: u32,
}

impl ExternalPointer {
    pub const SIZE: usize = 16;

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes = slice_at(bytes, 0, Self::SIZE)?;
        Ok(Self {
            rawsize: read_u32_le(bytes, 0),
            extinfo: read_u32_le(bytes, 4),
            value_id: read_u32_le(bytes, 8),
            toast_relid: read_u32_le(bytes, 12),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.rawsize.to_le_bytes());
        out[4..8].copy_from_slice(&self.extinfo.to_le_bytes());
        out[8..12].copy_from_slice(&self.value_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.toast_relid.to_le_bytes());
        out
    }

    /// Number of bytes stored across the chunk rows.
    pub fn extsize(&self) -> usize {
        (self.extinfo & VARLENA_EXTSIZE_MASK) as usize
    }

    pub fn compression_method(&self) -> u32 {
        self.extinfo >> VARLENA_EXTSIZE_BITS
    }

    /// Size of the user value once reassembled and decompressed.
    pub fn raw_data_size(&self) -> usize {
        (self.rawsize as usize).saturating_sub(VARHDRSZ)
    }

    pub fn is_compressed(&self) -> bool {
        self.extsize() < self.raw_data_size()
    }
}

/// A parsed varlena borrowing its payload from the tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Varlena<'a> {
    Short(&'a [u8]),
    External { tag: VarTag, data: &'a [u8] },
    Long(&'a [u8]),
    Compressed {
        raw_size: usize,
        method: u32,
        data: &'a [u8],
    },
}

impl<'a> Varlena<'a> {
    /// Classify and slice the value starting at `buf[0]`.
    ///
    /// The extended tag (`0x01`) must be tested before the generic 1-byte
    /// form since both have the low bit set.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let Some(&b0) = buf.first() else {
            bail!(HeapError::TruncatedTuple {
                needed: 1,
                available: 0,
            });
        };
        if b0 == 0x01 {
            let tag = VarTag::from_byte(slice_at(buf, 1, 1)?[0])?;
            let data = slice_at(buf, VARHDRSZ_EXTERNAL, tag.payload_len())?;
            return Ok(Varlena::External { tag, data });
        }
        if b0 & 0x01 == 0x01 {
            let total = (b0 >> 1) as usize;
            let data = slice_at(buf, VARHDRSZ_SHORT, total - VARHDRSZ_SHORT)?;
            return Ok(Varlena::Short(data));
        }

        let header = read_u32_le(slice_at(buf, 0, VARHDRSZ)?, 0);
        let total = (header >> 2) as usize;
        // Odd leading bytes returned above, so only bit 1 is left to test.
        match b0 & 0x02 {
            0x00 => {
                if total < VARHDRSZ {
                    bail!(HeapError::UnsupportedVarlenaEncoding(format_smolstr!(
                        "4-byte header with length {}",
                        total
                    )));
                }
                Ok(Varlena::Long(slice_at(buf, VARHDRSZ, total - VARHDRSZ)?))
            }
            _ => {
                if total < VARHDRSZ_COMPRESSED {
                    bail!(HeapError::UnsupportedVarlenaEncoding(format_smolstr!(
                        "compressed header with length {}",
                        total
                    )));
                }
                let tcinfo = read_u32_le(slice_at(buf, VARHDRSZ, 4)?, 0);
                Ok(Varlena::Compressed {
                    raw_size: (tcinfo & VARLENA_EXTSIZE_MASK) as usize,
                    method: tcinfo >> VARLENA_EXTSIZE_BITS,
                    data: slice_at(buf, VARHDRSZ_COMPRESSED, total - VARHDRSZ_COMPRESSED)?,
                })
            }
        }
    }

    /// Bytes the value occupies in the tuple, header included.
    pub fn total_len(&self) -> usize {
        match self {
            Varlena::Short(data) => VARHDRSZ_SHORT + data.len(),
            Varlena::External { data, .. } => VARHDRSZ_EXTERNAL + data.len(),
            Varlena::Long(data) => VARHDRSZ + data.len(),
            Varlena::Compressed { data, .. } => VARHDRSZ_COMPRESSED + data.len(),
        }
    }

    /// Payload as stored, without the header (still compressed if it was).
    pub fn data(&self) -> &'a [u8] {
        match *self {
            Varlena::Short(data)
            | Varlena::External { data, .. }
            | Varlena::Long(data)
            | Varlena::Compressed { data, .. } => data,
        }
    }

    pub fn vartag(&self) -> VarTag {
        match self {
            Varlena::External { tag, .. } => *tag,
            _ => VarTag::Unused,
        }
    }

    /// The on-disk TOAST pointer, if this value is one.
    pub fn external_pointer(&self) -> Result<Option<ExternalPointer>> {
        match self {
            Varlena::External {
                tag: VarTag::OnDisk,
                data,
            } => Ok(Some(ExternalPointer::decode(data)?)),
            _ => Ok(None),
        }
    }

    /// Inline payload bytes, decompressing when needed.
    ///
    /// External pointers come back as their raw pointer bytes; resolving them
    /// needs the companion TOAST file.
    pub fn inline_bytes(&self) -> Result<Cow<'a, [u8]>> {
        match *self {
            Varlena::Compressed {
                raw_size,
                method,
                data,
            } => Ok(Cow::Owned(decompress(method, data, raw_size)?)),
            _ => Ok(Cow::Borrowed(self.data())),
        }
    }
}

/// Decompress a payload written with the given TOAST compression method.
pub fn decompress(method: u32, data: &[u8], raw_size: usize) -> Result<Vec<u8>> {
    match method {
        TOAST_PGLZ_COMPRESSION_ID => pglz::decompress(data, raw_size),
        TOAST_LZ4_COMPRESSION_ID => bail!(HeapError::UnsupportedVarlenaEncoding(
            "lz4 compression".into()
        )),
        other => bail!(HeapError::UnsupportedVarlenaEncoding(format_smolstr!(
            "compression method {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> &HeapError {
        err.downcast_ref::<HeapError>().expect("heap error")
    }

    #[test]
    fn test_short_header() -> Result<()> {
        let buf = [0x05, b'x', 0xff];
        let v = Varlena::parse(&buf)?;
        assert_eq!(v, Varlena::Short(b"x"));
        assert_eq!(v.total_len(), 2);
        assert_eq!(v.data().len(), 1);
        assert_eq!(v.vartag(), VarTag::Unused);
        Ok(())
    }

    #[test]
    fn test_on_disk_pointer() -> Result<()> {
        let ptr = ExternalPointer {
            rawsize: 10_004,
            extinfo: 10_000,
            value_id: 16_401,
            toast_relid: 16_390,
        };
        let mut buf = vec![0x01, 18];
        buf.extend_from_slice(&ptr.encode());
        let v = Varlena::parse(&buf)?;
        assert_eq!(v.vartag(), VarTag::OnDisk);
        assert_eq!(v.data().len(), 16);
        assert_eq!(v.total_len(), 18);
        assert_eq!(v.external_pointer()?, Some(ptr));
        assert!(!ptr.is_compressed());
        Ok(())
    }

    #[test]
    fn test_in_memory_pointer_tags() -> Result<()> {
        for tag in [VarTag::Indirect, VarTag::ExpandedRo, VarTag::ExpandedRw] {
            let mut buf = vec![0x01, tag.as_byte()];
            buf.extend_from_slice(&[7u8; 8]);
            let v = Varlena::parse(&buf)?;
            assert_eq!(v.vartag(), tag);
            assert_eq!(v.total_len(), 10);
            assert_eq!(v.external_pointer()?, None);
        }
        Ok(())
    }

    #[test]
    fn test_unknown_vartag() {
        let buf = [0x01, 42, 0, 0];
        let err = Varlena::parse(&buf).unwrap_err();
        assert!(matches!(kind(&err), HeapError::UnsupportedVarlenaEncoding(_)));
    }

    #[test]
    fn test_long_header() -> Result<()> {
        let payload = [b'q'; 200];
        let mut buf = (((payload.len() + 4) as u32) << 2).to_le_bytes().to_vec();
        buf.extend_from_slice(&payload);
        let v = Varlena::parse(&buf)?;
        assert_eq!(v, Varlena::Long(&payload));
        assert_eq!(v.total_len(), 204);
        Ok(())
    }

    #[test]
    fn test_compressed_header() -> Result<()> {
        let raw = "abcabcabcabcabcabcabcabc".as_bytes();
        let packed = pglz::compress(raw);
        let mut buf = ((((packed.len() + 8) as u32) << 2) | 0x02)
            .to_le_bytes()
            .to_vec();
        buf.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        buf.extend_from_slice(&packed);
        let v = Varlena::parse(&buf)?;
        assert!(matches!(v, Varlena::Compressed { raw_size: 24, method: 0, .. }));
        assert_eq!(v.total_len(), buf.len());
        assert_eq!(v.inline_bytes()?.as_ref(), raw);
        Ok(())
    }

    #[test]
    fn test_lz4_is_unsupported() -> Result<()> {
        let mut buf = ((12u32 << 2) | 0x02).to_le_bytes().to_vec();
        buf.extend_from_slice(&(16u32 | (TOAST_LZ4_COMPRESSION_ID << 30)).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let v = Varlena::parse(&buf)?;
        let err = v.inline_bytes().unwrap_err();
        assert!(matches!(kind(&err), HeapError::UnsupportedVarlenaEncoding(_)));
        Ok(())
    }

    #[test]
    fn test_every_leading_byte_has_a_class() -> Result<()> {
        for b0 in 0..=u8::MAX {
            let mut buf = vec![0u8; 300];
            buf[0] = b0;
            buf[1] = 1;
            let v = Varlena::parse(&buf)?;
            match b0 {
                0x01 => assert!(matches!(v, Varlena::External { .. })),
                b if b & 0x01 == 0x01 => assert!(matches!(v, Varlena::Short(_))),
                b if b & 0x02 == 0x02 => assert!(matches!(v, Varlena::Compressed { .. })),
                _ => assert!(matches!(v, Varlena::Long(_))),
            }
        }
        Ok(())
    }

    #[test]
    fn test_truncated_payload() {
        let buf = [0x0b, b'a', b'b'];
        let err = Varlena::parse(&buf).unwrap_err();
        assert!(matches!(
            kind(&err),
            HeapError::TruncatedTuple {
                needed: 5,
                available: 3
            }
        ));
    }
}
