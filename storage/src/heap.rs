//! Whole-file decoding: split a relation file into pages and decode each.

use crate::page::HeapPage;
use crate::tuple::{ColumnSpec, DecodedTuple, TupleDesc};
use anyhow::{bail, Result};
use common::HeapError;
use rayon::prelude::*;
use tracing::debug;

/// The pages of one relation file (or segment), in block order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapFile {
    pub pages: Vec<HeapPage>,
}

impl HeapFile {
    /// Every tuple with storage, page by page in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &DecodedTuple> {
        self.pages.iter().flat_map(HeapPage::live_tuples)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

fn check_input(buffer: &[u8], page_size: usize) -> Result<()> {
    if buffer.is_empty() {
        bail!(HeapError::TruncatedFile(0));
    }
    if page_size == 0 {
        bail!(HeapError::InvalidConfig("page size must be positive".into()));
    }
    Ok(())
}

/// Decode `buffer` as consecutive `page_size` pages; a shorter final
/// segment is decoded as a page of its own.
pub fn decode_heap_file(buffer: &[u8], page_size: usize, columns: &[ColumnSpec]) -> Result<HeapFile> {
    check_input(buffer, page_size)?;
    let desc = TupleDesc::new(columns)?;
    let pages = buffer
        .chunks(page_size)
        .enumerate()
        .map(|(blkno, page)| HeapPage::decode(blkno, page, &desc))
        .collect::<Result<Vec<_>>>()?;
    debug!(bytes = buffer.len(), pages = pages.len(), "decoded heap file");
    Ok(HeapFile { pages })
}

/// Same as [`decode_heap_file`], decoding pages on the rayon pool. The
/// descriptor is shared read-only; the first failing page (in block order)
/// is reported.
pub fn decode_heap_file_parallel(
    buffer: &[u8],
    page_size: usize,
    columns: &[ColumnSpec],
) -> Result<HeapFile> {
    check_input(buffer, page_size)?;
    let desc = TupleDesc::new(columns)?;
    let pages = buffer
        .par_chunks(page_size)
        .enumerate()
        .map(|(blkno, page)| HeapPage::decode(blkno, page, &desc))
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    debug!(
        bytes = buffer.len(),
        pages = pages.len(),
        threads = rayon::current_num_threads(),
        "decoded heap file in parallel"
    );
    Ok(HeapFile { pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{encode_tuple, Field, PageBuilder};
    use crate::page::DEFAULT_PAGE_SIZE;
    use crate::tuple::Value;
    use smol_str::SmolStr;

    fn kind(err: &anyhow::Error) -> &HeapError {
        err.downcast_ref::<HeapError>().expect("heap error")
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("col1", "int4", b'i', 4),
            ColumnSpec::new("col2", "int4", b'i', 4),
        ]
    }

    fn file_of(pages: usize, page_size: usize) -> Result<Vec<u8>> {
        let desc = TupleDesc::new(&columns())?;
        let mut file = Vec::new();
        for p in 0..pages {
            let mut builder = PageBuilder::new(page_size);
            for i in 0..10 {
                let n = (p * 10 + i) as i32;
                let second = if n % 3 == 0 { Field::Null } else { Field::Int4(n * 2) };
                builder.push(encode_tuple(&desc, &[Field::Int4(n), second])?);
            }
            file.extend(builder.finish()?);
        }
        Ok(file)
    }

    #[test]
    fn test_single_page_two_ints() -> Result<()> {
        let desc = TupleDesc::new(&columns())?;
        let page = PageBuilder::new(DEFAULT_PAGE_SIZE)
            .push(encode_tuple(&desc, &[Field::Int4(7), Field::Int4(42)])?)
            .finish()?;
        let file = decode_heap_file(&page, DEFAULT_PAGE_SIZE, &columns())?;
        assert_eq!(file.page_count(), 1);

        let tuples: Vec<_> = file.tuples().collect();
        assert_eq!(tuples.len(), 1);
        assert!(tuples[0].header.null_bitmap.is_none());
        let values = tuples[0].values();
        assert_eq!(values.len(), 2);
        assert_eq!(values[&SmolStr::new("col1")], "7");
        assert_eq!(values[&SmolStr::new("col2")], "42");
        Ok(())
    }

    #[test]
    fn test_slot_count_matches_lower() -> Result<()> {
        let file = decode_heap_file(&file_of(3, 1024)?, 1024, &columns())?;
        for page in &file.pages {
            let expected = (page.header.lower as usize - 24) / 4;
            assert_eq!(page.lp_count(), expected);
            assert_eq!(page.tuples.len(), expected);
        }
        assert_eq!(file.tuples().count(), 30);
        Ok(())
    }

    #[test]
    fn test_nulls_round_trip() -> Result<()> {
        let file = decode_heap_file(&file_of(2, 2048)?, 2048, &columns())?;
        for (n, tuple) in file.tuples().enumerate() {
            let n = n as i32;
            assert_eq!(tuple.get("col1"), Some(&Value::Int4(n)));
            let expected = if n % 3 == 0 { Value::Null } else { Value::Int4(n * 2) };
            assert_eq!(tuple.get("col2"), Some(&expected));
        }
        Ok(())
    }

    #[test]
    fn test_empty_buffer() {
        let err = decode_heap_file(&[], DEFAULT_PAGE_SIZE, &columns()).unwrap_err();
        assert!(matches!(kind(&err), HeapError::TruncatedFile(0)));
    }

    #[test]
    fn test_zero_page_size() {
        let err = decode_heap_file(&[0u8; 16], 0, &columns()).unwrap_err();
        assert!(matches!(kind(&err), HeapError::InvalidConfig(_)));
    }

    #[test]
    fn test_final_short_segment() -> Result<()> {
        let desc = TupleDesc::new(&columns())?;
        let mut buffer = file_of(1, 1024)?;
        // A 512 byte tail is still a well formed page of its own.
        buffer.extend(
            PageBuilder::new(512)
                .push(encode_tuple(&desc, &[Field::Int4(-1), Field::Int4(-2)])?)
                .finish()?,
        );
        let file = decode_heap_file(&buffer, 1024, &columns())?;
        assert_eq!(file.page_count(), 2);
        let last = file.tuples().last().expect("tail tuple");
        assert_eq!(last.get("col1"), Some(&Value::Int4(-1)));
        Ok(())
    }

    #[test]
    fn test_corrupt_page_aborts_file() -> Result<()> {
        let mut buffer = file_of(3, 1024)?;
        buffer[1024 + 12..1024 + 14].copy_from_slice(&23u16.to_le_bytes());
        let err = decode_heap_file(&buffer, 1024, &columns()).unwrap_err();
        assert!(matches!(kind(&err), HeapError::CorruptPage { page: 1, .. }));
        Ok(())
    }

    #[test]
    fn test_parallel_matches_sequential() -> Result<()> {
        let buffer = file_of(16, 1024)?;
        let sequential = decode_heap_file(&buffer, 1024, &columns())?;
        let parallel = decode_heap_file_parallel(&buffer, 1024, &columns())?;
        assert_eq!(sequential, parallel);

        let mut broken = buffer.clone();
        broken[5 * 1024 + 12..5 * 1024 + 14].copy_from_slice(&7u16.to_le_bytes());
        broken[9 * 1024 + 12..9 * 1024 + 14].copy_from_slice(&7u16.to_le_bytes());
        let err = decode_heap_file_parallel(&broken, 1024, &columns()).unwrap_err();
        assert!(matches!(kind(&err), HeapError::CorruptPage { page: 5, .. }));
        Ok(())
    }
}
