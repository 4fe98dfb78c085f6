//! Errors raised by byte sources.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    /// The file is larger than `IOLimits::max_file_size`; nothing was mapped.
    #[error("file is {found} bytes, over the {limit}-byte limit")]
    FileTooLarge { limit: u64, found: u64 },

    /// The read would push the running total past `IOLimits::max_read_bytes`.
    #[error("read budget of {limit} bytes exhausted ({current} bytes already read)")]
    ReadLimitExceeded { limit: u64, current: u64 },

    /// Opening, inspecting or mapping the file failed.
    #[error("cannot access file: {0}")]
    StdIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
