//! Error taxonomy shared across the record, memo and index engines.

use thiserror::Error;

/// Every failure a public operation in this crate can return.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A path that should exist does not, or a search key is absent from an index.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid field descriptor: {0}")]
    InvalidFieldDescriptor(String),

    #[error("unknown field type byte: {0:#04x}")]
    UnknownFieldType(u8),

    #[error("value out of range for field: {0}")]
    ValueOutOfRange(String),

    #[error("index out of range: {index} (count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("engine is not writable")]
    NotWritable,

    #[error("invalid memo reference: {0}")]
    InvalidMemoReference(u32),

    #[error("memo format mismatch: {0}")]
    MemoFormatMismatch(String),

    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("search key too long: got {got}, expected {expected}")]
    KeyTooLong { got: usize, expected: usize },

    #[error("invalid index page: {0}")]
    InvalidPage(String),

    #[error("transaction rolled back: {0}")]
    TransactionRolledBack(Box<Error>),
}

/// Result alias used throughout the crate's public surface.
pub type Result<T> = std::result::Result<T, Error>;
