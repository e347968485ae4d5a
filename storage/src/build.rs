//! Encoders for heap pages, tuples and TOAST values.
//!
//! Fixture tooling for tests and benchmarks. Layouts follow what the server
//! writes: MAXALIGNed `t_hoff`, 1-byte varlena headers for short values,
//! tuples packed from the end of the page.

use crate::le::maxalign;
use crate::page::{
    SlotEntry, LP_NORMAL, LP_UNUSED, PG_PAGE_LAYOUT_VERSION, SIZE_OF_ITEM_ID,
    SIZE_OF_PAGE_HEADER,
};
use crate::pglz;
use crate::toast::toast_columns;
use crate::tuple::{
    TupleDesc, HEAP_HASNULL, HEAP_HASVARWIDTH, SIZE_OF_HEAP_TUPLE_HEADER,
};
use crate::varlena::{
    ExternalPointer, VarTag, TOAST_PGLZ_COMPRESSION_ID, VARHDRSZ, VARLENA_EXTSIZE_BITS,
};
use anyhow::{bail, Result};

const FIXTURE_XMIN: u32 = 1000;
/// Largest payload a 1-byte varlena header can describe.
const MAX_SHORT_PAYLOAD: usize = 0x7f - 1;

/// One attribute value to encode.
#[derive(Clone, Debug)]
pub enum Field<'a> {
    Null,
    Int4(i32),
    Oid(u32),
    /// Varlena payload; a 1-byte header is used when it fits.
    Bytes(&'a [u8]),
    /// Varlena payload, always with a 4-byte header.
    LongBytes(&'a [u8]),
    /// Payload stored as an inline pglz-compressed varlena.
    Compressed(&'a [u8]),
    /// On-disk TOAST pointer.
    External(ExternalPointer),
    /// In-memory TOAST pointer (indirect or expanded).
    Pointer(VarTag, [u8; 8]),
}

impl<'a> Field<'a> {
    pub fn text(s: &'a str) -> Self {
        Field::Bytes(s.as_bytes())
    }
}

/// Encode a heap tuple. Passing fewer fields than columns produces a tuple
/// with a smaller attribute count, as rows written before `ADD COLUMN` have.
pub fn encode_tuple(desc: &TupleDesc, fields: &[Field<'_>]) -> Result<Vec<u8>> {
    if fields.len() > desc.len() {
        bail!("{} fields for {} columns", fields.len(), desc.len());
    }
    let natts = fields.len();
    let has_nulls = fields.iter().any(|f| matches!(f, Field::Null));
    let bitmap_len = if has_nulls { natts.div_ceil(8) } else { 0 };
    let hoff = maxalign(SIZE_OF_HEAP_TUPLE_HEADER + bitmap_len);

    let mut infomask = 0u16;
    if has_nulls {
        infomask |= HEAP_HASNULL;
    }
    if desc.attrs()[..natts].iter().any(|a| a.kind.is_varlena()) {
        infomask |= HEAP_HASVARWIDTH;
    }

    let mut out = vec![0u8; hoff];
    out[0..4].copy_from_slice(&FIXTURE_XMIN.to_le_bytes());
    out[18..20].copy_from_slice(&u16::try_from(natts)?.to_le_bytes());
    out[20..22].copy_from_slice(&infomask.to_le_bytes());
    out[22] = u8::try_from(hoff)?;
    if has_nulls {
        for (i, field) in fields.iter().enumerate() {
            if !matches!(field, Field::Null) {
                out[SIZE_OF_HEAP_TUPLE_HEADER + i / 8] |= 1 << (i % 8);
            }
        }
    }

    for (attr, field) in desc.attrs().iter().zip(fields) {
        let fixed = matches!(field, Field::Int4(_) | Field::Oid(_));
        if !matches!(field, Field::Null) && fixed == attr.kind.is_varlena() {
            bail!("field {:?} does not fit column {}", field, attr.name);
        }
        let align = |out: &mut Vec<u8>| {
            let rel = out.len() - hoff;
            out.resize(hoff + attr.align.align(rel), 0);
        };
        match field {
            Field::Null => {}
            Field::Int4(v) => {
                align(&mut out);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Field::Oid(v) => {
                align(&mut out);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Field::Bytes(b) if b.len() <= MAX_SHORT_PAYLOAD => {
                out.push((((b.len() + 1) << 1) | 0x01) as u8);
                out.extend_from_slice(b);
            }
            Field::Bytes(b) | Field::LongBytes(b) => {
                align(&mut out);
                out.extend_from_slice(&(u32::try_from(b.len() + VARHDRSZ)? << 2).to_le_bytes());
                out.extend_from_slice(b);
            }
            Field::Compressed(b) => {
                let packed = pglz::compress(b);
                align(&mut out);
                let header = (u32::try_from(packed.len() + 8)? << 2) | 0x02;
                let tcinfo =
                    u32::try_from(b.len())? | (TOAST_PGLZ_COMPRESSION_ID << VARLENA_EXTSIZE_BITS);
                out.extend_from_slice(&header.to_le_bytes());
                out.extend_from_slice(&tcinfo.to_le_bytes());
                out.extend_from_slice(&packed);
            }
            Field::External(ptr) => {
                out.extend_from_slice(&[0x01, VarTag::OnDisk.as_byte()]);
                out.extend_from_slice(&ptr.encode());
            }
            Field::Pointer(tag, bytes) => {
                out.extend_from_slice(&[0x01, tag.as_byte()]);
                out.extend_from_slice(bytes);
            }
        }
    }
    Ok(out)
}

/// Lays tuples out on a page: line pointers grow from the header, tuple
/// bodies are placed MAXALIGNed from the end of the page.
#[derive(Clone, Debug)]
pub struct PageBuilder {
    page_size: usize,
    items: Vec<Option<Vec<u8>>>,
}

impl PageBuilder {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, tuple: Vec<u8>) -> &mut Self {
        self.items.push(Some(tuple));
        self
    }

    /// Add a line pointer without storage.
    pub fn push_unused(&mut self) -> &mut Self {
        self.items.push(None);
        self
    }

    pub fn finish(&self) -> Result<Vec<u8>> {
        let mut page = vec![0u8; self.page_size];
        let lower = SIZE_OF_PAGE_HEADER + self.items.len() * SIZE_OF_ITEM_ID;
        let mut upper = self.page_size;
        for (i, item) in self.items.iter().enumerate() {
            let slot = match item {
                Some(tuple) => {
                    if tuple.len() > upper || (upper - tuple.len()) & !7 < lower {
                        bail!("page of {} bytes is full at item {}", self.page_size, i);
                    }
                    upper = (upper - tuple.len()) & !7;
                    page[upper..upper + tuple.len()].copy_from_slice(tuple);
                    SlotEntry::new(upper, LP_NORMAL, tuple.len())?
                }
                None => SlotEntry::new(0, LP_UNUSED, 0)?,
            };
            let at = SIZE_OF_PAGE_HEADER + i * SIZE_OF_ITEM_ID;
            page[at..at + SIZE_OF_ITEM_ID].copy_from_slice(&slot.raw().to_le_bytes());
        }

        let pagesize_version = u16::try_from(self.page_size | PG_PAGE_LAYOUT_VERSION as usize)?;
        page[12..14].copy_from_slice(&u16::try_from(lower)?.to_le_bytes());
        page[14..16].copy_from_slice(&u16::try_from(upper)?.to_le_bytes());
        page[16..18].copy_from_slice(&u16::try_from(self.page_size)?.to_le_bytes());
        page[18..20].copy_from_slice(&pagesize_version.to_le_bytes());
        Ok(page)
    }
}

/// A value moved out of line: the pointer the heap tuple stores and the
/// chunk tuples of the TOAST relation.
#[derive(Clone, Debug)]
pub struct ToastValue {
    pub pointer: ExternalPointer,
    pub chunks: Vec<Vec<u8>>,
}

pub fn toast_value(
    value_id: u32,
    toast_relid: u32,
    value: &[u8],
    chunk_size: usize,
    compress: bool,
) -> Result<ToastValue> {
    let stored = if compress {
        let tcinfo =
            u32::try_from(value.len())? | (TOAST_PGLZ_COMPRESSION_ID << VARLENA_EXTSIZE_BITS);
        let mut stored = tcinfo.to_le_bytes().to_vec();
        stored.extend_from_slice(&pglz::compress(value));
        if stored.len() >= value.len() {
            bail!("value of {} bytes does not compress", value.len());
        }
        stored
    } else {
        value.to_vec()
    };
    let pointer = ExternalPointer {
        rawsize: u32::try_from(value.len() + VARHDRSZ)?,
        extinfo: u32::try_from(stored.len())?,
        value_id,
        toast_relid,
    };
    let desc = TupleDesc::new(&toast_columns())?;
    let chunks = stored
        .chunks(chunk_size)
        .enumerate()
        .map(|(seq, chunk)| {
            encode_tuple(
                &desc,
                &[
                    Field::Oid(value_id),
                    Field::Int4(i32::try_from(seq)?),
                    Field::Bytes(chunk),
                ],
            )
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ToastValue { pointer, chunks })
}
