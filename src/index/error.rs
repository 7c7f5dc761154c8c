use thiserror::Error;

use crate::file::FileError;
use crate::record::{AttrType, Rid};

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid magic number in index file header")]
    InvalidMagic,

    #[error("Corrupt index page: page_num={0}")]
    CorruptPage(u32),

    #[error("Invalid node type tag {tag} at page {page_num}")]
    InvalidNodeType { page_num: u32, tag: u8 },

    #[error("Key type mismatch: index holds {expected:?}, got {actual:?}")]
    KeyTypeMismatch {
        expected: AttrType,
        actual: AttrType,
    },

    #[error("Entry not found: {rid:?}")]
    EntryAbsent { rid: Rid },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Scan iterator already closed")]
    ScanClosed,
}
