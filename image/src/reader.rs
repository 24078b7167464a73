//! Random-access reads of a finished image.
//!
//! Nothing is loaded up front: every lookup reads just the header blocks
//! and child-offset tables on its way, through positional reads, so one
//! [ImageReader] can serve concurrent callers.

use std::collections::HashSet;

use bstr::{BString, ByteSlice};
use tracing::{instrument, trace};

use crate::nodes::{Kind, Metadata};
use crate::read_at::ReadAt;
use crate::wire::{decode_offsets, HeaderBlock, HEADER_BLOCK_SIZE, OFFSET_LEN};
use crate::{Error, FormatError};

/// A header block read back from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Where the header block starts.
    pub header_offset: u64,
    /// The decoded header. `on_disk_offset` is always set, `source_path`
    /// never is.
    pub metadata: Metadata,
    /// The header's offset field: the child-offset table of a directory,
    /// or the contents of a file.
    offset: u64,
}

impl Record {
    /// Where the child-offset table (directories) or the contents (files)
    /// start.
    pub fn data_offset(&self) -> u64 {
        self.offset
    }

    fn display_name(&self) -> String {
        self.metadata.name.as_bstr().to_string()
    }
}

#[derive(Debug)]
pub struct ImageReader<R> {
    source: R,
    /// Everything at or past this offset is not part of the image, e.g. the
    /// integrity trailer.
    payload_len: u64,
}

impl<R> ImageReader<R>
where
    R: ReadAt,
{
    /// Reads the image stored in the first `payload_len` bytes of `source`.
    /// For a protected image that is the payload length of its trailer.
    pub fn new(source: R, payload_len: u64) -> Self {
        ImageReader {
            source,
            payload_len,
        }
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), FormatError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.payload_len => Ok(()),
            _ => Err(FormatError::OffsetOutOfRange {
                offset,
                len,
                limit: self.payload_len,
            }),
        }
    }

    /// Reads and decodes the header block at `at`. The block itself and
    /// whatever its offset field points to must lie within the image.
    pub fn read_header(&self, at: u64) -> Result<Record, Error> {
        self.check_range(at, HEADER_BLOCK_SIZE)?;

        let mut buf = [0u8; HEADER_BLOCK_SIZE as usize];
        self.source.read_exact_at(&mut buf, at)?;
        let header = HeaderBlock::decode(&buf)?;

        match header.kind {
            Kind::Directory => self.check_range(
                header.offset,
                header.length.saturating_mul(OFFSET_LEN),
            )?,
            Kind::File => self.check_range(header.offset, header.length)?,
        }

        trace!(at, name = %header.name.as_bstr(), "read header");

        Ok(Record {
            header_offset: at,
            metadata: Metadata {
                name: header.name,
                kind: header.kind,
                length: header.length,
                modified_time: header.modified_time,
                source_path: None,
                on_disk_offset: Some(match header.kind {
                    Kind::Directory => at,
                    Kind::File => header.offset,
                }),
            },
            offset: header.offset,
        })
    }

    /// The record of the mastered root directory.
    pub fn root(&self) -> Result<Record, Error> {
        self.read_header(0)
    }

    /// Reads the child-offset table of a directory.
    pub fn child_offsets(&self, dir: &Record) -> Result<Vec<u64>, Error> {
        if !dir.metadata.is_dir() {
            return Err(Error::NotADirectory(dir.display_name()));
        }

        // The record's public fields may have changed since it was read.
        let len = dir
            .metadata
            .length
            .checked_mul(OFFSET_LEN)
            .ok_or(FormatError::OffsetOutOfRange {
                offset: dir.data_offset(),
                len: u64::MAX,
                limit: self.payload_len,
            })?;
        self.check_range(dir.data_offset(), len)?;

        let mut buf = vec![0u8; len as usize];
        self.source.read_exact_at(&mut buf, dir.data_offset())?;
        Ok(decode_offsets(&buf))
    }

    /// The records of the immediate children of a directory, in table order.
    pub fn children(&self, dir: &Record) -> Result<Vec<Record>, Error> {
        self.child_offsets(dir)?
            .into_iter()
            .map(|at| self.read_header(at))
            .collect()
    }

    /// The first child of `dir` named `name`.
    pub fn find_child(&self, dir: &Record, name: &[u8]) -> Result<Option<Record>, Error> {
        for at in self.child_offsets(dir)? {
            let child = self.read_header(at)?;
            if child.metadata.name == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Resolves a `/`-separated path, whose first segment names the root
    /// directory, to its record. Empty segments are ignored, and an empty
    /// path resolves to the root.
    #[instrument(level = "trace", skip_all, fields(path = %path.as_bstr()))]
    pub fn resolve(&self, path: &[u8]) -> Result<Record, Error> {
        let mut segments = path.split_str("/").filter(|s| !s.is_empty());
        let root = self.root()?;

        let Some(first) = segments.next() else {
            return Ok(root);
        };
        if root.metadata.name != first {
            return Err(Error::NotFound(path.as_bstr().to_string()));
        }

        let mut current = root;
        for segment in segments {
            if !current.metadata.is_dir() {
                return Err(Error::NotADirectory(current.display_name()));
            }
            current = self
                .find_child(&current, segment)?
                .ok_or_else(|| Error::NotFound(path.as_bstr().to_string()))?;
        }

        Ok(current)
    }

    /// Copies up to `buf.len()` bytes of a file's contents, starting
    /// `offset` bytes in. Returns 0 at or past the end of the file.
    pub fn read_at(&self, file: &Record, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if !file.metadata.is_file() {
            return Err(Error::NotAFile(file.display_name()));
        }

        let length = file.metadata.length;
        if offset >= length {
            return Ok(0);
        }

        let n = (length - offset).min(buf.len() as u64) as usize;
        let at = file.data_offset().saturating_add(offset);
        self.check_range(at, n as u64)?;
        self.source.read_exact_at(&mut buf[..n], at)?;
        Ok(n)
    }

    /// Reads the complete contents of a file.
    pub fn read_to_vec(&self, file: &Record) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; file.metadata.length as usize];
        let n = self.read_at(file, 0, &mut buf)?;
        debug_assert_eq!(n, buf.len());
        Ok(buf)
    }

    /// Visits every record depth-first, in the order they were mastered,
    /// together with its absolute path (`/root/...`).
    /// A child-offset table pointing back into its own ancestry is an
    /// error.
    pub fn walk(&self) -> Result<Vec<(BString, Record)>, Error> {
        let root = self.root()?;
        let mut out = Vec::new();
        let mut visited = HashSet::new();

        // Entries are pushed in reverse so they pop in table order.
        let mut stack = vec![(BString::from("/"), root)];
        while let Some((parent, record)) = stack.pop() {
            if !visited.insert(record.header_offset) {
                return Err(FormatError::Cycle(record.header_offset).into());
            }

            let mut path = parent;
            if !path.ends_with(b"/") {
                path.push(b'/');
            }
            path.extend_from_slice(&record.metadata.name);

            if record.metadata.is_dir() {
                for child in self.children(&record)?.into_iter().rev() {
                    stack.push((path.clone(), child));
                }
            }
            out.push((path, record));
        }

        Ok(out)
    }
}
