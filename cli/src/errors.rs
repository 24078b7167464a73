use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Image(#[from] wofs_image::Error),

    #[error(transparent)]
    Erasure(#[from] wofs_erasure::Error),

    #[error("integrity verification of {0:?} failed")]
    Integrity(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}
