use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use datafusion::arrow::array::{Array, StringArray, UInt32Array};
use datafusion::arrow::compute::concat_batches;
use datafusion::prelude::SessionContext;
use pg_heap::{Config, DecodedTableProvider, FsFileSource, StaticCatalog, Table};
use smol_str::SmolStr;
use storage::build::{encode_tuple, toast_value, Field, PageBuilder};
use storage::{ColumnSpec, TupleDesc};

const PAGE: usize = 8192;
const TOAST_CHUNK: usize = 1996;

fn columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("id", "int4", b'i', 4),
        ColumnSpec::new("owner", "oid", b'i', 4),
        ColumnSpec::new("body", "text", b'i', -1),
        ColumnSpec::new("payload", "bytea", b'i', -1),
    ]
}

fn body(i: i32) -> String {
    match i % 4 {
        0 => format!("row {i}"),
        1 => "x".repeat(200),
        _ => format!("{i} ").repeat(40),
    }
}

/// Writes `rows` rows spread over `pages_per_segment` sized segments plus a
/// toast relation, laid out like `base/<db>/<relfilenode>`.
fn write_relation(dir: &Path, rows: i32, pages_per_segment: usize) -> Result<Vec<String>> {
    let desc = TupleDesc::new(&columns())?;
    let mut toast_chunks = Vec::new();
    let mut tuples = Vec::new();
    let mut bodies = Vec::new();
    for i in 0..rows {
        let text = body(i);
        let payload = [i as u8; 3];
        let tuple = if i % 10 == 9 {
            let big = format!("document {i}: ") + &"lorem ipsum dolor sit amet ".repeat(300);
            let toasted = toast_value(50_000 + i as u32, 16_404, big.as_bytes(), TOAST_CHUNK, i % 20 == 9)?;
            toast_chunks.extend(toasted.chunks);
            bodies.push(big);
            encode_tuple(
                &desc,
                &[
                    Field::Int4(i),
                    Field::Oid(10),
                    Field::External(toasted.pointer),
                    Field::Null,
                ],
            )?
        } else if i % 7 == 3 {
            bodies.push(text.clone());
            encode_tuple(
                &desc,
                &[
                    Field::Int4(i),
                    Field::Oid(10),
                    Field::Compressed(text.as_bytes()),
                    Field::Bytes(&payload),
                ],
            )?
        } else {
            bodies.push(text.clone());
            encode_tuple(
                &desc,
                &[
                    Field::Int4(i),
                    Field::Oid(10),
                    Field::text(&text),
                    Field::Bytes(&payload),
                ],
            )?
        };
        tuples.push(tuple);
    }

    let mut pages = Vec::new();
    for group in tuples.chunks(20) {
        let mut builder = PageBuilder::new(PAGE);
        for tuple in group {
            builder.push(tuple.clone());
        }
        pages.push(builder.finish()?);
    }
    let rel = dir.join("base/5/16401");
    std::fs::create_dir_all(dir.join("base/5"))?;
    for (segno, segment) in pages.chunks(pages_per_segment).enumerate() {
        let path = if segno == 0 {
            rel.clone()
        } else {
            dir.join(format!("base/5/16401.{segno}"))
        };
        std::fs::write(path, segment.concat())?;
    }

    let mut toast = Vec::new();
    for group in toast_chunks.chunks(4) {
        let mut builder = PageBuilder::new(PAGE);
        for chunk in group {
            builder.push(chunk.clone());
        }
        toast.extend(builder.finish()?);
    }
    std::fs::write(dir.join("base/5/16404"), toast)?;
    Ok(bodies)
}

fn catalog(dir: &Path) -> StaticCatalog {
    StaticCatalog::new(dir)
        .with_relation("docs", columns(), "base/5/16401")
        .with_toast("docs", "pg_toast_16401", "base/5/16404")
}

#[test]
fn decodes_relation_with_segments_and_toast() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bodies = write_relation(dir.path(), 100, 2)?;

    let table = Table::open(&catalog(dir.path()), &FsFileSource, "docs", &Config::default())?;
    assert_eq!(table.heap_files().len(), 3);
    assert!(!table.toast_files().is_empty());

    let rows = table.get_all_rows()?;
    assert_eq!(rows.len(), 100);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[&SmolStr::new("id")], i.to_string());
        assert_eq!(row[&SmolStr::new("owner")], "10");
        assert_eq!(row[&SmolStr::new("body")], bodies[i], "body of row {i}");
        let payload = &row[&SmolStr::new("payload")];
        if i % 10 == 9 {
            assert_eq!(payload, "NULL");
        } else {
            assert_eq!(payload, &format!("\\x{:02x}{:02x}{:02x}", i, i, i));
        }
    }
    Ok(())
}

#[test]
fn parallel_open_matches_sequential() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_relation(dir.path(), 60, 1)?;
    let catalog = catalog(dir.path());

    let sequential = Table::open(&catalog, &FsFileSource, "docs", &Config::default())?;
    let parallel_config = Config {
        parallel: true,
        ..Config::default()
    };
    let parallel = Table::open(&catalog, &FsFileSource, "docs", &parallel_config)?;
    assert_eq!(sequential.heap_files(), parallel.heap_files());
    assert_eq!(sequential.rows()?, parallel.rows()?);
    Ok(())
}

#[test]
fn missing_heap_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = Table::open(&catalog(dir.path()), &FsFileSource, "docs", &Config::default())
        .unwrap_err();
    assert!(format!("{err:#}").contains("16401"));
}

#[tokio::test]
async fn queries_decoded_rows_with_sql() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bodies = write_relation(dir.path(), 40, 2)?;
    let table = Table::open(&catalog(dir.path()), &FsFileSource, "docs", &Config::default())?;

    let ctx = SessionContext::new();
    ctx.register_table("docs", Arc::new(DecodedTableProvider::try_from_table(&table)?))?;
    let batches = ctx
        .sql("SELECT owner, body FROM docs WHERE payload IS NULL ORDER BY id")
        .await?
        .collect()
        .await?;
    let batch = concat_batches(&batches[0].schema(), &batches)?;
    assert_eq!(batch.num_rows(), 4);

    let owners = batch
        .column(0)
        .as_any()
        .downcast_ref::<UInt32Array>()
        .expect("uint32 column");
    let texts = batch
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8 column");
    for (n, i) in [9usize, 19, 29, 39].into_iter().enumerate() {
        assert_eq!(owners.value(n), 10);
        assert_eq!(texts.value(n), bodies[i]);
        assert!(!texts.is_null(n));
    }
    Ok(())
}
