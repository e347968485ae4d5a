//! Heap tuple header and attribute decoding.
//!
//! A heap tuple starts with a fixed 23-byte header, optionally followed by a
//! null bitmap, padded to `t_hoff`. Attribute data follows, each present
//! attribute aligned to its type's alignment class.

use crate::le::{read_u16_le, read_u32_le, slice_at};
use crate::varlena::{ExternalPointer, VarTag, Varlena};
use ahash::AHashMap;
use anyhow::{bail, Result};
use common::HeapError;
use smallvec::SmallVec;
use smol_str::{format_smolstr, SmolStr};
use std::fmt;

pub const SIZE_OF_HEAP_TUPLE_HEADER: usize = 23;
/// `t_infomask`: the tuple carries a null bitmap.
pub const HEAP_HASNULL: u16 = 0x0001;
/// `t_infomask`: the tuple has variable-width attributes.
pub const HEAP_HASVARWIDTH: u16 = 0x0002;
/// `t_infomask2`: attribute count.
pub const HEAP_NATTS_MASK: u16 = 0x07FF;

/// Column metadata as reported by the catalog (`pg_attribute` joined with
/// `pg_type`), in on-disk order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: SmolStr,
    pub typname: SmolStr,
    /// `typalign`: 'c', 's', 'i' or 'd'.
    pub typalign: u8,
    /// `typlen`: byte width, or -1 for varlena types.
    pub typlen: i16,
}

impl ColumnSpec {
    pub fn new(
        name: impl Into<SmolStr>,
        typname: impl Into<SmolStr>,
        typalign: u8,
        typlen: i16,
    ) -> Self {
        Self {
            name: name.into(),
            typname: typname.into(),
            typalign,
            typlen,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    Char,
    Short,
    Int,
    Double,
}

impl Alignment {
    pub fn from_typalign(typalign: u8) -> Result<Self> {
        let align = match typalign {
            b'c' => Alignment::Char,
            b's' => Alignment::Short,
            b'i' => Alignment::Int,
            b'd' => Alignment::Double,
            other => bail!(HeapError::UnknownAlignment(other as char)),
        };
        Ok(align)
    }

    pub fn bytes(self) -> usize {
        match self {
            Alignment::Char => 1,
            Alignment::Short => 2,
            Alignment::Int => 4,
            Alignment::Double => 8,
        }
    }

    /// Round `off` up to this alignment.
    #[inline]
    pub fn align(self, off: usize) -> usize {
        let mask = self.bytes() - 1;
        (off + mask) & !mask
    }
}

/// The logical types this decoder understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Int4,
    Oid,
    Text,
    Bytea,
}

impl ColumnKind {
    pub fn from_typname(typname: &str) -> Option<Self> {
        match typname {
            "int4" => Some(ColumnKind::Int4),
            "oid" => Some(ColumnKind::Oid),
            "text" | "varchar" | "bpchar" => Some(ColumnKind::Text),
            "bytea" => Some(ColumnKind::Bytea),
            _ => None,
        }
    }

    pub fn typname(self) -> &'static str {
        match self {
            ColumnKind::Int4 => "int4",
            ColumnKind::Oid => "oid",
            ColumnKind::Text => "text",
            ColumnKind::Bytea => "bytea",
        }
    }

    /// `typlen` the catalog reports for this kind.
    pub fn typlen(self) -> i16 {
        match self {
            ColumnKind::Int4 | ColumnKind::Oid => 4,
            ColumnKind::Text | ColumnKind::Bytea => -1,
        }
    }

    pub fn is_varlena(self) -> bool {
        self.typlen() < 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrDesc {
    pub name: SmolStr,
    pub kind: ColumnKind,
    pub align: Alignment,
}

/// Column list resolved once per file. Never mutated while decoding, so it
/// can be shared by concurrent page decodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TupleDesc {
    attrs: Vec<AttrDesc>,
}

impl TupleDesc {
    pub fn new(columns: &[ColumnSpec]) -> Result<Self> {
        let mut attrs = Vec::with_capacity(columns.len());
        for column in columns {
            let Some(kind) = ColumnKind::from_typname(&column.typname) else {
                bail!(HeapError::UnsupportedType(column.typname.clone()));
            };
            if column.typlen != kind.typlen() {
                bail!(HeapError::UnsupportedType(format_smolstr!(
                    "{} with typlen {}",
                    column.typname,
                    column.typlen
                )));
            }
            let align = Alignment::from_typalign(column.typalign)?;
            attrs.push(AttrDesc {
                name: column.name.clone(),
                kind,
                align,
            });
        }
        Ok(Self { attrs })
    }

    pub fn attrs(&self) -> &[AttrDesc] {
        &self.attrs
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name == name)
    }
}

/// `t_ctid`: block number and line pointer index of the newest version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ItemPointer {
    pub block: u32,
    pub offset: u16,
}

/// Null bitmap expanded to one flag per attribute; `true` means present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NullBitmap(SmallVec<[bool; 32]>);

impl NullBitmap {
    pub fn decode(bits: &[u8], natts: usize) -> Result<Self> {
        let needed = natts.div_ceil(8);
        if bits.len() < needed {
            bail!(HeapError::TruncatedTuple {
                needed,
                available: bits.len(),
            });
        }
        let present = (0..natts)
            .map(|i| (bits[i >> 3] >> (i & 0x07)) & 0x01 == 0x01)
            .collect();
        Ok(Self(present))
    }

    pub fn is_null(&self, attno: usize) -> bool {
        !self.0.get(attno).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TupleHeader {
    pub xmin: u32,
    pub xmax: u32,
    /// `t_cid` (or `t_xvac`, they share the field).
    pub cid: u32,
    pub ctid: ItemPointer,
    pub infomask2: u16,
    pub infomask: u16,
    pub hoff: u8,
    pub null_bitmap: Option<NullBitmap>,
}

impl TupleHeader {
    /// Decode the fixed part of the header; the bitmap is decoded separately
    /// by [`TupleHeader::decode_null_bitmap`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes = slice_at(bytes, 0, SIZE_OF_HEAP_TUPLE_HEADER)?;
        let bi_hi = read_u16_le(bytes, 12) as u32;
        let bi_lo = read_u16_le(bytes, 14) as u32;
        Ok(Self {
            xmin: read_u32_le(bytes, 0),
            xmax: read_u32_le(bytes, 4),
            cid: read_u32_le(bytes, 8),
            ctid: ItemPointer {
                block: (bi_hi << 16) | bi_lo,
                offset: read_u16_le(bytes, 16),
            },
            infomask2: read_u16_le(bytes, 18),
            infomask: read_u16_le(bytes, 20),
            hoff: bytes[22],
            null_bitmap: None,
        })
    }

    /// Decode the bitmap region (`[23, hoff)`) when the header announces one.
    pub fn decode_null_bitmap(&mut self, bits: &[u8]) -> Result<()> {
        if self.has_nulls() {
            self.null_bitmap = Some(NullBitmap::decode(bits, self.natts())?);
        }
        Ok(())
    }

    pub fn has_nulls(&self) -> bool {
        self.infomask & HEAP_HASNULL != 0
    }

    pub fn natts(&self) -> usize {
        (self.infomask2 & HEAP_NATTS_MASK) as usize
    }

    /// Attributes past `natts` were added after the row was written and read
    /// as null.
    pub fn is_null(&self, attno: usize) -> bool {
        if attno >= self.natts() {
            return true;
        }
        match &self.null_bitmap {
            Some(bitmap) => bitmap.is_null(attno),
            None => false,
        }
    }
}

/// A decoded attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Int4(i32),
    Oid(u32),
    Text(String),
    Bytea(Vec<u8>),
    /// On-disk TOAST pointer, resolved against the companion file later.
    External(ExternalPointer),
    /// In-memory TOAST pointer bytes; never dereferenced.
    Opaque(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("\\x")?;
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int4(v) => write!(f, "{v}"),
            Value::Oid(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytea(bytes) | Value::Opaque(bytes) => write_hex(f, bytes),
            Value::External(ptr) => write!(
                f,
                "(toast value {} in {}, {} bytes)",
                ptr.value_id,
                ptr.toast_relid,
                ptr.raw_data_size()
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedColumn {
    pub name: SmolStr,
    pub value: Value,
    pub vartag: VarTag,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedTuple {
    pub header: TupleHeader,
    /// One entry per column of the descriptor, in column order.
    pub columns: Vec<DecodedColumn>,
}

impl DecodedTuple {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    /// Column name to textual value, `"NULL"` for nulls.
    pub fn values(&self) -> AHashMap<SmolStr, String> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.value.to_string()))
            .collect()
    }

    /// Column name to external storage classification.
    pub fn vartags(&self) -> AHashMap<SmolStr, VarTag> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.vartag))
            .collect()
    }
}

/// Decode a whole tuple: fixed header, null bitmap and attribute data.
pub fn decode_tuple(desc: &TupleDesc, tuple: &[u8]) -> Result<DecodedTuple> {
    let mut header = TupleHeader::decode(tuple)?;
    let hoff = header.hoff as usize;
    if hoff < SIZE_OF_HEAP_TUPLE_HEADER {
        bail!(HeapError::CorruptTuple(format_smolstr!(
            "t_hoff {} is inside the fixed header",
            hoff
        )));
    }
    if hoff > tuple.len() {
        bail!(HeapError::TruncatedTuple {
            needed: hoff,
            available: tuple.len(),
        });
    }
    header.decode_null_bitmap(&tuple[SIZE_OF_HEAP_TUPLE_HEADER..hoff])?;
    let columns = decode_tuple_data(desc, &header, &tuple[hoff..])?;
    Ok(DecodedTuple { header, columns })
}

/// Decode the attribute area that starts at `t_hoff`.
///
/// Offsets are relative to the start of `data`; `t_hoff` is MAXALIGNed so
/// relative and absolute alignment agree.
pub fn decode_tuple_data(
    desc: &TupleDesc,
    header: &TupleHeader,
    data: &[u8],
) -> Result<Vec<DecodedColumn>> {
    if header.natts() > desc.len() {
        bail!(HeapError::CorruptTuple(format_smolstr!(
            "tuple has {} attributes, descriptor has {}",
            header.natts(),
            desc.len()
        )));
    }

    let mut columns = Vec::with_capacity(desc.len());
    let mut off = 0usize;
    for (attno, attr) in desc.attrs().iter().enumerate() {
        if header.is_null(attno) {
            columns.push(DecodedColumn {
                name: attr.name.clone(),
                value: Value::Null,
                vartag: VarTag::Unused,
            });
            continue;
        }

        let (value, vartag) = match attr.kind {
            ColumnKind::Int4 | ColumnKind::Oid => {
                off = attr.align.align(off);
                let bytes = slice_at(data, off, 4)?;
                off += 4;
                let value = if attr.kind == ColumnKind::Int4 {
                    Value::Int4(read_u32_le(bytes, 0) as i32)
                } else {
                    Value::Oid(read_u32_le(bytes, 0))
                };
                (value, VarTag::Unused)
            }
            ColumnKind::Text | ColumnKind::Bytea => {
                // A non-zero byte starts a header; 1-byte headers are never
                // padded, so only a pad byte means we must align first.
                if data.get(off).copied().unwrap_or(0) == 0 {
                    off = attr.align.align(off);
                }
                let Some(rest) = data.get(off..) else {
                    bail!(HeapError::TruncatedTuple {
                        needed: off,
                        available: data.len(),
                    });
                };
                let varlena = Varlena::parse(rest)?;
                off += varlena.total_len();
                (decode_varlena(attr, &varlena)?, varlena.vartag())
            }
        };
        columns.push(DecodedColumn {
            name: attr.name.clone(),
            value,
            vartag,
        });
    }
    Ok(columns)
}

fn decode_varlena(attr: &AttrDesc, varlena: &Varlena<'_>) -> Result<Value> {
    if let Some(ptr) = varlena.external_pointer()? {
        return Ok(Value::External(ptr));
    }
    if varlena.vartag().is_external() {
        tracing::trace!(column = %attr.name, tag = ?varlena.vartag(), "in-memory toast pointer");
        return Ok(Value::Opaque(varlena.data().to_vec()));
    }
    let bytes = varlena.inline_bytes()?;
    match attr.kind {
        ColumnKind::Text => match String::from_utf8(bytes.into_owned()) {
            Ok(s) => Ok(Value::Text(s)),
            Err(_) => bail!(HeapError::InvalidUtf8(attr.name.clone())),
        },
        ColumnKind::Bytea => Ok(Value::Bytea(bytes.into_owned())),
        other => bail!(HeapError::UnsupportedType(other.typname().into())),
    }
}
