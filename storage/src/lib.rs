//! Decoding of Postgres heap relation files
//!
//! Pages, line pointers, tuple headers, varlena values and pglz streams are
//! parsed field by field from little-endian byte buffers; nothing here
//! reinterprets memory as Postgres structs. Out-of-line values are rebuilt
//! from the decoded toast relation with [`toast::ToastIndex`].

pub mod heap;
mod le;
pub mod page;
pub mod pglz;
pub mod toast;
pub mod tuple;
pub mod varlena;

#[cfg(any(test, feature = "test-utils"))]
pub mod build;

pub use heap::{decode_heap_file, decode_heap_file_parallel, HeapFile};
pub use tuple::{ColumnKind, ColumnSpec, DecodedTuple, TupleDesc, Value};
pub use varlena::{ExternalPointer, VarTag};
