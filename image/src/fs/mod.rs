//! The read path of a mounted image: the bodies of the `getattr`,
//! `readdir`, `open` and `read` calls.
//!
//! Paths are absolute and `/`-separated. `/` itself is a synthetic
//! directory holding just the mastered root, so a file `a.txt` mastered
//! from `root/` is found at `/root/a.txt`.
//!
//! Every handler resolves its path from scratch and only issues
//! positional reads, so an [ImageFs] can be shared between threads
//! without locking.

use bstr::ByteSlice;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::reader::{ImageReader, Record};
use crate::read_at::ReadAt;
use crate::Error;

mod file_attr;

#[cfg(feature = "fuse")]
mod filesystem;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use file_attr::{Attributes, BLOCK_SIZE, ROOT_ATTRIBUTES};

#[cfg(test)]
mod tests;

#[derive(Debug)]
pub struct ImageFs<R> {
    reader: ImageReader<R>,
}

/// Only read-only opens are allowed.
fn check_access(flags: i32) -> Result<(), Error> {
    if flags & libc::O_ACCMODE != libc::O_RDONLY {
        warn!(flags, "refusing to open for writing");
        return Err(Error::ReadOnly);
    }
    Ok(())
}

/// True for paths naming the synthetic directory above the image root.
fn is_super_root(path: &[u8]) -> bool {
    path.split_str("/").all(|s| s.is_empty())
}

impl<R> ImageFs<R>
where
    R: ReadAt,
{
    pub fn new(reader: ImageReader<R>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &ImageReader<R> {
        &self.reader
    }

    /// Attributes of the entry at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().as_bstr()), err(level = "debug"))]
    pub fn attributes<P: AsRef<[u8]>>(&self, path: P) -> Result<Attributes, Error> {
        let path = path.as_ref();
        if is_super_root(path) {
            return Ok(ROOT_ATTRIBUTES);
        }

        let record = self.reader.resolve(path)?;
        Ok(Attributes::from(&record))
    }

    /// Names in the directory at `path`, starting with `.` and `..`.
    #[instrument(skip_all, fields(path = %path.as_ref().as_bstr()), err(level = "debug"))]
    pub fn list<P: AsRef<[u8]>>(&self, path: P) -> Result<Vec<Bytes>, Error> {
        let path = path.as_ref();
        let mut names = vec![Bytes::from_static(b"."), Bytes::from_static(b"..")];

        if is_super_root(path) {
            names.push(self.reader.root()?.metadata.name);
            return Ok(names);
        }

        let dir = self.reader.resolve(path)?;
        if !dir.metadata.is_dir() {
            return Err(Error::NotADirectory(path.as_bstr().to_string()));
        }

        names.extend(
            self.reader
                .children(&dir)?
                .into_iter()
                .map(|child| child.metadata.name),
        );
        Ok(names)
    }

    /// Checks that `path` is a file and `flags` ask for read-only access.
    /// Returns the file's record, which callers may hold on to for reads.
    #[instrument(skip_all, fields(path = %path.as_ref().as_bstr(), flags = flags), err(level = "debug"))]
    pub fn open<P: AsRef<[u8]>>(&self, path: P, flags: i32) -> Result<Record, Error> {
        let path = path.as_ref();
        let record = self.resolve_file(path)?;
        check_access(flags)?;
        Ok(record)
    }

    /// Copies the window `[offset, offset + buf.len())` of the file at
    /// `path` into `buf`, clamped to the file's length. Returns the number
    /// of bytes copied, which is 0 for offsets at or past the end.
    #[instrument(skip_all, fields(path = %path.as_ref().as_bstr(), offset = offset, size = buf.len()), err(level = "debug"))]
    pub fn read<P: AsRef<[u8]>>(&self, path: P, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let record = self.resolve_file(path.as_ref())?;
        let n = self.reader.read_at(&record, offset, buf)?;
        debug!(n, "read");
        Ok(n)
    }

    fn resolve_file(&self, path: &[u8]) -> Result<Record, Error> {
        if is_super_root(path) {
            return Err(Error::NotAFile(path.as_bstr().to_string()));
        }

        let record = self.reader.resolve(path)?;
        if !record.metadata.is_file() {
            return Err(Error::NotAFile(path.as_bstr().to_string()));
        }
        Ok(record)
    }
}
