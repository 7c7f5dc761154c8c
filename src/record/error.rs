use crate::file::FileError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Record deleted: page_num={page_num}, slot_num={slot_num}")]
    RecordDeleted { page_num: u32, slot_num: u16 },

    #[error("Invalid slot: page_num={page_num}, slot_num={slot_num}")]
    InvalidSlot { page_num: u32, slot_num: u16 },

    #[error("Corrupt page: page_num={0}")]
    CorruptPage(u32),

    #[error("Page cannot hold record of {0} bytes")]
    RecordTooLarge(usize),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Scan iterator already closed")]
    ScanClosed,
}

pub type RecordResult<T> = Result<T, RecordError>;
