//! Imports that deal with a real filesystem.

use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tracing::{instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::{build_tree, Error, WalkEntry};
use crate::nodes::{valid_name, TreeNode};

/// Knobs for turning a directory into a [TreeNode].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Whether entries whose name starts with a `.` are part of the image.
    /// The same rule applies to counting a directory's children and to the
    /// walk itself.
    pub include_hidden: bool,
    /// How often opening a source file is attempted before giving up.
    pub open_attempts: u32,
    /// Pause between two attempts to open a source file.
    pub retry_delay: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            include_hidden: false,
            open_attempts: 3,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Returns true if an entry with this name is left out of the image.
pub fn is_excluded(name: &OsStr, options: &ImportOptions) -> bool {
    !options.include_hidden && name.as_bytes().starts_with(b".")
}

/// Walks the directory at `path` and builds its metadata tree.
///
/// Symlinks are followed, so they show up as whatever they point to.
/// Children are visited in file name order, which makes mastering the
/// same directory twice produce the same image.
///
/// This consumes `O(#number of entries)` space.
#[instrument(skip_all, fields(path = ?path.as_ref()), err)]
pub fn ingest_path<P>(path: P, options: &ImportOptions) -> Result<TreeNode, Error>
where
    P: AsRef<Path>,
{
    // Canonicalize so that "." and friends still yield a name for the root.
    let root = path
        .as_ref()
        .canonicalize()
        .map_err(|e| Error::UnableToStat(path.as_ref().to_owned(), e))?;

    let root_metadata =
        std::fs::metadata(&root).map_err(|e| Error::UnableToStat(root.clone(), e))?;
    if !root_metadata.is_dir() {
        return Err(Error::RootNotDirectory(root));
    }

    let iter = WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry.file_name(), options));

    build_tree(iter.map(|entry| match entry {
        Ok(entry) => dir_entry_to_walk_entry(&entry, options),
        Err(e) => {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            Err(Error::UnableToStat(path, e.into()))
        }
    }))
}

/// Converts a [walkdir::DirEntry] into a [WalkEntry]. Directories are
/// scanned to find their number of children.
pub fn dir_entry_to_walk_entry(
    entry: &DirEntry,
    options: &ImportOptions,
) -> Result<WalkEntry, Error> {
    let path = entry.path().to_path_buf();

    let name = entry_name(entry)?;
    let metadata = entry
        .metadata()
        .map_err(|e| Error::UnableToStat(path.clone(), e.into()))?;
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        let declared_length = count_entries(&path, options)?;
        Ok(WalkEntry::Dir {
            depth: entry.depth(),
            name,
            declared_length,
            modified_time: metadata.mtime(),
            path,
        })
    } else if file_type.is_file() {
        // Make sure the contents can be read before committing to the entry.
        drop(open_with_retry(&path, options)?);

        Ok(WalkEntry::File {
            depth: entry.depth(),
            name,
            size: metadata.len(),
            modified_time: metadata.mtime(),
            path,
        })
    } else {
        Err(Error::UnsupportedEntry(path))
    }
}

fn entry_name(entry: &DirEntry) -> Result<Bytes, Error> {
    let name = entry.file_name().as_bytes();
    if !valid_name(name) {
        return Err(Error::InvalidName(entry.path().to_path_buf()));
    }
    Ok(Bytes::copy_from_slice(name))
}

/// Counts the immediate children of the directory at `path` that will be
/// part of the image.
pub fn count_entries(path: &Path, options: &ImportOptions) -> Result<u64, Error> {
    let mut count = 0;
    for entry in std::fs::read_dir(path).map_err(|e| Error::UnableToStat(path.to_owned(), e))? {
        let entry = entry.map_err(|e| Error::UnableToStat(path.to_owned(), e))?;
        if !is_excluded(&entry.file_name(), options) {
            count += 1;
        }
    }
    Ok(count)
}

/// Opens a source file, retrying a bounded number of times.
pub(crate) fn open_with_retry(path: &Path, options: &ImportOptions) -> Result<File, Error> {
    let attempts = options.open_attempts.max(1);
    let mut attempt = 1;
    loop {
        match File::open(path) {
            Ok(file) => return Ok(file),
            Err(e) if attempt >= attempts => {
                return Err(Error::UnableToOpen {
                    path: path.to_owned(),
                    attempts,
                    source: e,
                })
            }
            Err(e) => {
                warn!(path = ?path, attempt, err = %e, "unable to open source file, retrying");
                std::thread::sleep(options.retry_delay);
                attempt += 1;
            }
        }
    }
}
