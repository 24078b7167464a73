use std::path::PathBuf;

/// Represents all errors that can be emitted while turning a walk into a
/// metadata tree.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to stat {0:?}: {1}")]
    UnableToStat(PathBuf, #[source] std::io::Error),

    #[error("unable to open {path:?} after {attempts} attempts: {source}")]
    UnableToOpen {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported entry type at {0:?}")]
    UnsupportedEntry(PathBuf),

    #[error("invalid name at {0:?}: names must be 1 to 256 bytes, without NUL or '/'")]
    InvalidName(PathBuf),

    #[error("{path:?} declared {declared} children, but the walk produced {found}")]
    ChildCountMismatch {
        path: PathBuf,
        declared: u64,
        found: u64,
    },

    #[error("walk entry {0:?} has no parent directory")]
    Orphan(PathBuf),

    #[error("walk produced a second root at {0:?}")]
    MultipleRoots(PathBuf),

    #[error("mastering root {0:?} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("walk produced no entries")]
    EmptyWalk,
}
