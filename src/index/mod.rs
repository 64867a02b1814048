//! Index engine (C6/C7/C10): CDX-family compound B-tree index files.

pub mod build;
pub mod btree;
pub mod cache;
pub mod header;
pub mod page;

pub use btree::{IndexEngine, KeyComparator, LexicographicComparator, RangeScan};
pub use build::build_from_pairs;
pub use cache::PageCache;
pub use header::IndexHeader;
pub use page::{IndexPage, PageEntry};
