//! Read and write dBase-family database files: fixed-length DBF records,
//! variable-length DBT memo blocks, and CDX compound B-tree indexes.

pub mod bytes;
pub mod coordinator;
pub mod error;
pub mod field;
pub mod header;
pub mod index;
pub mod memo;
pub mod record;
mod txn;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use field::{Date, DateTime, FieldType, Logical, MemoRef, Value};
pub use header::{DbfHeader, FieldDescriptor};
pub use index::{IndexEngine, IndexHeader, build_from_pairs};
pub use memo::MemoStore;
pub use record::{AccessMode, CreateOptions, Overwrite, Record, RecordEngine, StreamOptions};
