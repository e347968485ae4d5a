//! Reassembly of out-of-line (TOAST) values.
//!
//! A toasted value lives in the relation's toast table as rows of
//! `(chunk_id oid, chunk_seq int4, chunk_data bytea)`. The heap tuple only
//! keeps an [`ExternalPointer`] naming the `chunk_id`.

use crate::heap::HeapFile;
use crate::le::read_u32_le;
use crate::tuple::{ColumnKind, ColumnSpec, DecodedTuple, Value};
use crate::varlena::{self, ExternalPointer, VARLENA_EXTSIZE_BITS, VARLENA_EXTSIZE_MASK};
use ahash::AHashMap;
use anyhow::{bail, Result};
use common::HeapError;
use smol_str::format_smolstr;
use tracing::debug;

pub const TOAST_CHUNK_ID: &str = "chunk_id";
pub const TOAST_CHUNK_SEQ: &str = "chunk_seq";
pub const TOAST_CHUNK_DATA: &str = "chunk_data";

/// Column layout shared by every toast relation.
pub fn toast_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new(TOAST_CHUNK_ID, "oid", b'i', 4),
        ColumnSpec::new(TOAST_CHUNK_SEQ, "int4", b'i', 4),
        ColumnSpec::new(TOAST_CHUNK_DATA, "bytea", b'i', -1),
    ]
}

type Chunk<'a> = (i32, &'a [u8]);

fn chunk_of(tuple: &DecodedTuple) -> Result<(u32, Chunk<'_>)> {
    let Some(Value::Oid(id)) = tuple.get(TOAST_CHUNK_ID) else {
        bail!(HeapError::CorruptToast {
            value_id: 0,
            reason: "chunk row without chunk_id".into(),
        });
    };
    let Some(Value::Int4(seq)) = tuple.get(TOAST_CHUNK_SEQ) else {
        bail!(HeapError::CorruptToast {
            value_id: *id,
            reason: "chunk row without chunk_seq".into(),
        });
    };
    let Some(Value::Bytea(data)) = tuple.get(TOAST_CHUNK_DATA) else {
        bail!(HeapError::CorruptToast {
            value_id: *id,
            reason: format_smolstr!("chunk {} has no inline chunk_data", seq),
        });
    };
    Ok((*id, (*seq, data.as_slice())))
}

fn check_kind(kind: ColumnKind) -> Result<()> {
    match kind {
        ColumnKind::Text | ColumnKind::Bytea => Ok(()),
        other => bail!(HeapError::UnsupportedExternalFieldType(other.typname().into())),
    }
}

/// Order the chunks, glue them together and turn the result into a value.
fn assemble(pointer: &ExternalPointer, mut chunks: Vec<Chunk<'_>>, kind: ColumnKind) -> Result<Value> {
    let value_id = pointer.value_id;
    if chunks.is_empty() {
        bail!(HeapError::CorruptToast {
            value_id,
            reason: "no chunks in toast relation".into(),
        });
    }
    // Stable: duplicate sequence numbers keep their file order.
    chunks.sort_by_key(|(seq, _)| *seq);

    let mut stored = Vec::with_capacity(pointer.extsize());
    for (_, data) in &chunks {
        stored.extend_from_slice(data);
    }
    if stored.len() != pointer.extsize() {
        bail!(HeapError::CorruptToast {
            value_id,
            reason: format_smolstr!(
                "{} chunks hold {} bytes, pointer expects {}",
                chunks.len(),
                stored.len(),
                pointer.extsize()
            ),
        });
    }

    let raw = if pointer.is_compressed() {
        if stored.len() < 4 {
            bail!(HeapError::CorruptToast {
                value_id,
                reason: "compressed value shorter than its header".into(),
            });
        }
        let tcinfo = read_u32_le(&stored, 0);
        let raw_size = (tcinfo & VARLENA_EXTSIZE_MASK) as usize;
        if raw_size != pointer.raw_data_size() {
            bail!(HeapError::CorruptToast {
                value_id,
                reason: format_smolstr!(
                    "compressed header says {} bytes, pointer says {}",
                    raw_size,
                    pointer.raw_data_size()
                ),
            });
        }
        varlena::decompress(tcinfo >> VARLENA_EXTSIZE_BITS, &stored[4..], raw_size)?
    } else {
        stored
    };

    match kind {
        ColumnKind::Text => match String::from_utf8(raw) {
            Ok(s) => Ok(Value::Text(s)),
            Err(_) => bail!(HeapError::InvalidUtf8(format_smolstr!("toast value {}", value_id))),
        },
        _ => Ok(Value::Bytea(raw)),
    }
}

/// Rebuild the value `pointer` refers to by scanning the toast relation.
pub fn reassemble(pointer: &ExternalPointer, toast: &HeapFile, kind: ColumnKind) -> Result<Value> {
    check_kind(kind)?;
    let mut chunks = Vec::new();
    for tuple in toast.tuples() {
        let (id, chunk) = chunk_of(tuple)?;
        if id == pointer.value_id {
            chunks.push(chunk);
        }
    }
    assemble(pointer, chunks, kind)
}

/// Chunks of a toast relation grouped by `chunk_id`, so resolving many
/// pointers does not rescan the relation for each one.
#[derive(Clone, Debug, Default)]
pub struct ToastIndex<'a> {
    chunks: AHashMap<u32, Vec<Chunk<'a>>>,
}

impl<'a> ToastIndex<'a> {
    /// Index every chunk of the given files (a relation and its segments).
    pub fn build<I>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a HeapFile>,
    {
        let mut chunks: AHashMap<u32, Vec<Chunk<'a>>> = AHashMap::new();
        let mut rows = 0usize;
        for file in files {
            for tuple in file.tuples() {
                let (id, chunk) = chunk_of(tuple)?;
                chunks.entry(id).or_default().push(chunk);
                rows += 1;
            }
        }
        debug!(values = chunks.len(), rows, "indexed toast relation");
        Ok(Self { chunks })
    }

    pub fn reassemble(&self, pointer: &ExternalPointer, kind: ColumnKind) -> Result<Value> {
        check_kind(kind)?;
        let chunks = self
            .chunks
            .get(&pointer.value_id)
            .cloned()
            .unwrap_or_default();
        assemble(pointer, chunks, kind)
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
