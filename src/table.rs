//! A relation decoded from its files, with its toast relation.

use crate::catalog::{Catalog, CatalogSession, RelationPaths};
use crate::config::Config;
use crate::source::{read_segments, FileSource};
use ahash::AHashMap;
use anyhow::{Context, Result};
use datafusion::arrow::array::{ArrayRef, BinaryArray, Int32Array, StringArray, UInt32Array};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use smol_str::SmolStr;
use std::path::Path;
use std::sync::Arc;
use storage::toast::ToastIndex;
use storage::{
    decode_heap_file, decode_heap_file_parallel, ColumnKind, ColumnSpec, HeapFile, TupleDesc,
    Value,
};
use tracing::{debug, info, warn};

/// Metadata gathered from one catalog session.
struct Metadata {
    columns: Vec<ColumnSpec>,
    paths: RelationPaths,
    toast_columns: Option<Vec<ColumnSpec>>,
}

fn describe<S: CatalogSession>(session: &mut S, relation: &str) -> Result<Metadata> {
    let columns = session.columns(relation)?;
    let paths = session.relation_paths(relation)?;
    let toast_columns = match &paths.toast {
        Some(toast) => Some(session.columns(&toast.name)?),
        None => None,
    };
    Ok(Metadata {
        columns,
        paths,
        toast_columns,
    })
}

fn decode_segments<S: FileSource + ?Sized>(
    source: &S,
    path: &Path,
    columns: &[ColumnSpec],
    config: &Config,
) -> Result<Vec<HeapFile>> {
    read_segments(source, path)?
        .iter()
        .enumerate()
        .map(|(segno, bytes)| {
            // Relations with no rows, and most toast relations, are zero-length files.
            if bytes.is_empty() {
                debug!(segno, path = %path.display(), "empty segment");
                return Ok(HeapFile::default());
            }
            let file = if config.parallel {
                decode_heap_file_parallel(bytes, config.page_size, columns)
            } else {
                decode_heap_file(bytes, config.page_size, columns)
            };
            file.with_context(|| format!("segment {} of {}", segno, path.display()))
        })
        .collect()
}

#[derive(Debug)]
pub struct Table {
    name: SmolStr,
    columns: Vec<ColumnSpec>,
    desc: TupleDesc,
    paths: RelationPaths,
    heap: Vec<HeapFile>,
    toast: Vec<HeapFile>,
}

impl Table {
    /// Look `relation` up in the catalog, then read and decode its files.
    /// The catalog session is closed before any file is read.
    pub fn open<C, S>(catalog: &C, source: &S, relation: &str, config: &Config) -> Result<Self>
    where
        C: Catalog,
        S: FileSource + ?Sized,
    {
        config.validate()?;
        let mut session = catalog.open()?;
        let metadata = describe(&mut session, relation);
        let closed = session.close();
        let Metadata {
            columns,
            paths,
            toast_columns,
        } = metadata.with_context(|| format!("describing relation {relation}"))?;
        closed?;

        let desc = TupleDesc::new(&columns)?;
        let heap = decode_segments(source, &paths.heap, &columns, config)?;
        let toast = match (&paths.toast, &toast_columns) {
            (Some(toast), Some(toast_columns)) if source.exists(&toast.path) => {
                decode_segments(source, &toast.path, toast_columns, config)?
            }
            (Some(toast), _) => {
                warn!(relation, toast = %toast.name, path = %toast.path.display(), "toast file missing");
                Vec::new()
            }
            _ => Vec::new(),
        };
        info!(
            relation,
            segments = heap.len(),
            pages = heap.iter().map(HeapFile::page_count).sum::<usize>(),
            toast_pages = toast.iter().map(HeapFile::page_count).sum::<usize>(),
            "opened table"
        );
        Ok(Self {
            name: relation.into(),
            columns,
            desc,
            paths,
            heap,
            toast,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn paths(&self) -> &RelationPaths {
        &self.paths
    }

    pub fn heap_files(&self) -> &[HeapFile] {
        &self.heap
    }

    pub fn toast_files(&self) -> &[HeapFile] {
        &self.toast
    }

    /// Typed values of every live tuple, in column order, with on-disk
    /// toast pointers replaced by the values they point to.
    pub fn rows(&self) -> Result<Vec<Vec<Value>>> {
        let index = ToastIndex::build(&self.toast)?;
        let mut rows = Vec::new();
        for tuple in self.heap.iter().flat_map(HeapFile::tuples) {
            let mut row = Vec::with_capacity(self.desc.len());
            for (attr, column) in self.desc.attrs().iter().zip(&tuple.columns) {
                let value = match &column.value {
                    Value::External(ptr) => index
                        .reassemble(ptr, attr.kind)
                        .with_context(|| format!("column {} of {}", attr.name, self.name))?,
                    Value::Opaque(_) => {
                        warn!(column = %attr.name, vartag = ?column.vartag, "in-memory toast pointer passed through");
                        column.value.clone()
                    }
                    value => value.clone(),
                };
                row.push(value);
            }
            rows.push(row);
        }
        debug!(table = %self.name, rows = rows.len(), toast_values = index.len(), "resolved rows");
        Ok(rows)
    }

    /// Column name to textual value for every live tuple; `"NULL"` for
    /// nulls.
    pub fn get_all_rows(&self) -> Result<Vec<AHashMap<SmolStr, String>>> {
        Ok(self
            .rows()?
            .into_iter()
            .map(|row| {
                self.desc
                    .attrs()
                    .iter()
                    .zip(row)
                    .map(|(attr, value)| (attr.name.clone(), value.to_string()))
                    .collect()
            })
            .collect())
    }

    pub fn schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .desc
            .attrs()
            .iter()
            .map(|attr| Field::new(attr.name.as_str(), arrow_type(attr.kind), true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// All rows as one arrow batch.
    pub fn record_batch(&self) -> Result<RecordBatch> {
        let rows = self.rows()?;
        let arrays: Vec<ArrayRef> = self
            .desc
            .attrs()
            .iter()
            .enumerate()
            .map(|(i, attr)| column_array(attr.kind, rows.iter().map(|row| &row[i])))
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
        Ok(RecordBatch::try_new_with_options(self.schema(), arrays, &options)?)
    }
}

fn arrow_type(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Int4 => DataType::Int32,
        ColumnKind::Oid => DataType::UInt32,
        ColumnKind::Text => DataType::Utf8,
        ColumnKind::Bytea => DataType::Binary,
    }
}

fn column_array<'a>(kind: ColumnKind, values: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match kind {
        ColumnKind::Int4 => Arc::new(Int32Array::from(
            values
                .map(|v| match v {
                    Value::Int4(n) => Some(*n),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Oid => Arc::new(UInt32Array::from(
            values
                .map(|v| match v {
                    Value::Oid(n) => Some(*n),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Text => Arc::new(StringArray::from(
            values
                .map(|v| match v {
                    Value::Null => None,
                    Value::Text(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Bytea => Arc::new(BinaryArray::from(
            values
                .map(|v| match v {
                    Value::Bytea(b) | Value::Opaque(b) => Some(b.as_slice()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    }
}
