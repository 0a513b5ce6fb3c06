use std::{collections::TryReserveError, fmt, io};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("memory allocation failed")]
    OutOfMemory,

    // Every slot was probed without finding the key, an empty slot, or a
    // tombstone. The growth gate in `Table::set` keeps this from happening.
    #[error("no free slot left in table of capacity {capacity}")]
    TableFull { capacity: usize },

    #[error("key {0} not found")]
    KeyNotFound(i32),

    #[error("key {0} is reserved and cannot be stored")]
    ReservedKey(i32),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("file I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fs(#[from] anyhow::Error),

    #[error("data corruption detected: {0}")]
    Corruption(String),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfMemory | Error::TableFull { .. } => ErrorKind::OutOfMemory,
            Error::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Error::ReservedKey(_) | Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::Io(_) => ErrorKind::FileIo,
            Error::Fs(e) => {
                if e.chain().any(|cause| cause.is::<io::Error>()) {
                    ErrorKind::FileIo
                } else {
                    ErrorKind::Unknown
                }
            }
            Error::Corruption(_) => ErrorKind::Corruption,
        }
    }
}

/// Coarse classification of failures, used for user-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    KeyNotFound,
    InvalidParameter,
    FileIo,
    Corruption,
    Unknown,
}

impl ErrorKind {
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::OutOfMemory => "Memory allocation failed",
            ErrorKind::KeyNotFound => "Key not found",
            ErrorKind::InvalidParameter => "Invalid parameter",
            ErrorKind::FileIo => "File I/O error",
            ErrorKind::Corruption => "Data corruption detected",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Short status text for the outcome of an operation.
pub fn status_message<T>(r: &Result<T>) -> &'static str {
    match r {
        Ok(_) => "Success",
        Err(e) => e.kind().description(),
    }
}
