use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid erasure configuration: {0}")]
    InvalidConfig(String),

    #[error("neither copy of the erasure header is intact")]
    BadHeader,

    #[error("stripe {stripe} has {corrupt} corrupt shards, but only {parity} can be repaired")]
    TooManyCorruptShards {
        stripe: u64,
        corrupt: usize,
        parity: usize,
    },

    #[error("reed-solomon codec: {0}")]
    Codec(reed_solomon_erasure::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<reed_solomon_erasure::Error> for Error {
    fn from(value: reed_solomon_erasure::Error) -> Self {
        Error::Codec(value)
    }
}
