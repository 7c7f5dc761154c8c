use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File handle is already bound to {0}")]
    HandleAlreadyBound(String),

    #[error("File handle is not bound to any file")]
    HandleUnbound,

    #[error("Page out of range: page_num={page_num}, page_count={page_count}")]
    PageOutOfRange { page_num: u32, page_count: u32 },

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },
}

pub type FileResult<T> = Result<T, FileError>;
