//! Read Postgres tables straight from their heap files.
//!
//! [`table::Table`] asks a [`catalog::Catalog`] for a relation's columns and
//! file paths, reads the files through a [`source::FileSource`], decodes
//! them with the `storage` crate and resolves toasted values. Decoded rows
//! can be queried with DataFusion through [`provider::DecodedTableProvider`].

pub mod catalog;
pub mod config;
pub mod logging;
pub mod provider;
pub mod source;
pub mod table;

pub use catalog::{Catalog, CatalogSession, RelationPaths, StaticCatalog};
pub use config::Config;
pub use provider::DecodedTableProvider;
pub use source::{FileSource, FsFileSource, MemoryFileSource};
pub use table::Table;
