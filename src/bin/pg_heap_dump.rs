use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use datafusion::prelude::SessionContext;
use pg_heap::logging::init_tracing;
use pg_heap::{Config, DecodedTableProvider, FsFileSource, StaticCatalog, Table};
use storage::ColumnSpec;
use tracing::info;

const RELATION: &str = "heap";
const TOAST_RELATION: &str = "heap_toast";

/// Decode a Postgres heap relation file and print its rows.
#[derive(Parser, Debug)]
#[command(name = "pg_heap_dump", version)]
struct Args {
    /// First segment of the relation; `.1`, `.2`... are picked up when
    /// present. Relative paths are resolved against the data directory.
    heap: PathBuf,

    /// Column as `name:typname:align[:len]`, in attribute order.
    #[arg(long = "column", short = 'c', required = true, value_parser = parse_column)]
    columns: Vec<ColumnSpec>,

    /// Toast relation file for out-of-line values.
    #[arg(long)]
    toast: Option<PathBuf>,

    /// Page size of the cluster (`BLCKSZ`).
    #[arg(long)]
    page_size: Option<usize>,

    /// Decode pages in parallel.
    #[arg(long)]
    parallel: bool,

    /// Base directory for relative paths.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run a query against the rows, registered as table `heap`.
    #[arg(long)]
    sql: Option<String>,
}

fn parse_column(arg: &str) -> Result<ColumnSpec, String> {
    let parts: Vec<&str> = arg.split(':').collect();
    let (name, typname, align) = match parts.as_slice() {
        [name, typname, align] | [name, typname, align, _] => (*name, *typname, *align),
        _ => return Err(format!("expected name:typname:align[:len], got {arg:?}")),
    };
    let typalign = match align.as_bytes() {
        [b] => *b,
        _ => return Err(format!("alignment {align:?} is not a single character")),
    };
    let typlen = match parts.get(3) {
        Some(len) => len
            .parse::<i16>()
            .map_err(|e| format!("length {len:?}: {e}"))?,
        None => match typname {
            "int4" | "oid" => 4,
            _ => -1,
        },
    };
    Ok(ColumnSpec::new(name, typname, typalign, typlen))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    config.parallel |= args.parallel;
    if args.data_dir.is_some() {
        config.data_directory = args.data_dir.clone();
    }
    config.validate()?;

    let mut catalog = StaticCatalog::new(config.data_directory.clone().unwrap_or_default())
        .with_relation(RELATION, args.columns.clone(), args.heap.clone());
    if let Some(toast) = &args.toast {
        catalog = catalog.with_toast(RELATION, TOAST_RELATION, toast.clone());
    }
    let table = Table::open(&catalog, &FsFileSource, RELATION, &config)?;
    info!(path = %table.paths().heap.display(), "decoded relation");

    match &args.sql {
        Some(sql) => {
            let ctx = SessionContext::new();
            ctx.register_table(RELATION, Arc::new(DecodedTableProvider::try_from_table(&table)?))?;
            ctx.sql(sql).await?.show().await?;
        }
        None => {
            let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
            for row in table.rows()? {
                let line: Vec<String> = names
                    .iter()
                    .zip(&row)
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                println!("{}", line.join(" "));
            }
        }
    }
    Ok(())
}
