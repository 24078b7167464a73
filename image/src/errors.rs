use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::import;

/// Errors raised while mastering, verifying or reading an image.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed image: {0}")]
    Format(#[from] FormatError),

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("image is mounted read-only")]
    ReadOnly,

    #[error("invalid integrity key")]
    InvalidKey,

    #[error("no source path recorded for {0}")]
    MissingSource(String),

    #[error("{path:?} changed while mastering, expected {expected} bytes")]
    SourceChanged { path: PathBuf, expected: u64 },

    #[error("failed to build metadata tree: {0}")]
    Import(#[from] import::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Structural problems with the bytes of an image. These are never
/// tolerated: the operation that hit one is aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("range {offset}+{len} lies outside the verified image size {limit}")]
    OffsetOutOfRange { offset: u64, len: u64, limit: u64 },

    #[error("unknown kind tag {0}")]
    UnknownKind(u32),

    #[error("image of {0} bytes is too small to hold a hash trailer")]
    TruncatedTrailer(u64),

    #[error("trailer claims {count} hashes, more than an image of {size} bytes can hold")]
    TrailerOverrun { count: u32, size: u64 },

    #[error("payload of {payload_len} bytes does not split into {count} hash blocks")]
    BlockCountMismatch { payload_len: u64, count: u32 },

    #[error("{0} hash blocks do not fit the trailer count field")]
    TooManyBlocks(u64),

    #[error("child-offset table loops back to header at {0}")]
    Cycle(u64),
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::NotFound(_) | Error::NotAFile(_) => io::Error::from_raw_os_error(libc::ENOENT),
            Error::NotADirectory(_) => io::Error::from_raw_os_error(libc::ENOTDIR),
            Error::ReadOnly => io::Error::from_raw_os_error(libc::EACCES),
            _ => io::Error::from_raw_os_error(libc::EIO),
        }
    }
}
