//! Serializes a [TreeNode] into an image.
//!
//! The image starts with a region of header blocks and child-offset
//! tables, laid out depth-first starting with the root. Each directory's
//! header is directly followed by its table, which is followed by the
//! subtrees of its children in order. File contents are appended after
//! this region in the same order.
//!
//! ```text
//! | root hdr | root table | child hdr | ... | contents of 1st file | ... |
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::import::{self, fs::open_with_retry, ImportOptions};
use crate::nodes::{valid_name, Kind, TreeNode};
use crate::wire::{HeaderBlock, HEADER_BLOCK_SIZE, OFFSET_LEN};
use crate::Error;

/// Sizes of a serialized image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeSummary {
    pub header_count: u64,
    pub header_region_size: u64,
    pub data_size: u64,
}

impl SerializeSummary {
    /// Length of the image, excluding any integrity trailer.
    pub fn total_size(&self) -> u64 {
        self.header_region_size + self.data_size
    }
}

struct SerializeContext<'a, W> {
    writer: W,
    options: &'a ImportOptions,
    /// Where the next header block goes.
    header_cursor: u64,
    /// Where the next file's contents go.
    data_cursor: u64,
    span: Span,
}

/// Writes `root` to `writer`, and records on each node where its header's
/// offset field points to.
///
/// The tree is checked before anything is written. File contents are read
/// from each node's source path, which has to yield exactly the recorded
/// length.
#[instrument(skip_all, fields(indicatif.pb_show=1), err)]
pub fn serialize<W>(
    root: &mut TreeNode,
    writer: W,
    options: &ImportOptions,
) -> Result<SerializeSummary, Error>
where
    W: Write + Seek,
{
    validate(root)?;

    let summary = SerializeSummary {
        header_count: root.header_count(),
        header_region_size: root.header_region_size(),
        data_size: root.data_size(),
    };

    let span = Span::current();
    span.pb_set_message("Writing image");
    span.pb_set_length(summary.total_size());
    span.pb_start();

    let mut ctx = SerializeContext {
        writer,
        options,
        header_cursor: 0,
        data_cursor: summary.header_region_size,
        span,
    };

    ctx.write_node(root)?;
    debug_assert_eq!(summary.header_region_size, ctx.header_cursor);
    debug_assert_eq!(summary.total_size(), ctx.data_cursor);

    ctx.writer.flush()?;

    debug!(
        header_count = summary.header_count,
        total_size = summary.total_size(),
        "serialized image"
    );

    Ok(summary)
}

/// Checks that every node can be written: names fit a header block,
/// directories hold exactly as many children as they declare, and files
/// know where their contents come from.
fn validate(node: &TreeNode) -> Result<(), Error> {
    let display = || String::from_utf8_lossy(&node.metadata.name).into_owned();
    let path = || node.metadata.source_path.clone().unwrap_or_default();

    if !valid_name(&node.metadata.name) {
        return Err(import::Error::InvalidName(path()).into());
    }

    match node.metadata.kind {
        Kind::Directory => {
            if node.metadata.length != node.children.len() as u64 {
                return Err(import::Error::ChildCountMismatch {
                    path: path(),
                    declared: node.metadata.length,
                    found: node.children.len() as u64,
                }
                .into());
            }
            node.children.iter().try_for_each(validate)
        }
        Kind::File => {
            if !node.children.is_empty() {
                return Err(Error::NotADirectory(display()));
            }
            if node.metadata.source_path.is_none() {
                return Err(Error::MissingSource(display()));
            }
            Ok(())
        }
    }
}

impl<W> SerializeContext<'_, W>
where
    W: Write + Seek,
{
    /// Writes the header of `node` at the header cursor, then its table
    /// and subtrees, or its contents for files.
    /// Returns the position of the header.
    fn write_node(&mut self, node: &mut TreeNode) -> Result<u64, Error> {
        let header_at = self.header_cursor;
        self.header_cursor += HEADER_BLOCK_SIZE;

        // The header's offset field points at the table for directories.
        let offset = match node.metadata.kind {
            Kind::Directory => self.header_cursor,
            Kind::File => self.data_cursor,
        };
        node.metadata.on_disk_offset = Some(match node.metadata.kind {
            Kind::Directory => header_at,
            Kind::File => offset,
        });

        let header = HeaderBlock {
            name: node.metadata.name.clone(),
            kind: node.metadata.kind,
            length: node.metadata.length,
            modified_time: node.metadata.modified_time,
            offset,
        };
        self.writer.seek(SeekFrom::Start(header_at))?;
        self.writer.write_all(&header.encode())?;
        self.span.pb_inc(HEADER_BLOCK_SIZE);

        match node.metadata.kind {
            Kind::Directory => {
                // Reserve the table, fill it once the children's headers
                // have been placed.
                let table_len = node.children.len() as u64 * OFFSET_LEN;
                self.writer.write_all(&vec![0; table_len as usize])?;
                self.header_cursor += table_len;

                let mut table = Vec::with_capacity(table_len as usize);
                for child in node.children.iter_mut() {
                    let child_at = self.write_node(child)?;
                    table.extend_from_slice(&child_at.to_be_bytes());
                }

                self.writer.seek(SeekFrom::Start(offset))?;
                self.writer.write_all(&table)?;
                self.span.pb_inc(table_len);
            }
            Kind::File => self.copy_file(node)?,
        }

        Ok(header_at)
    }

    /// Appends the contents of a file node at the data cursor.
    fn copy_file(&mut self, node: &TreeNode) -> Result<(), Error> {
        let path = node
            .metadata
            .source_path
            .as_deref()
            .ok_or_else(|| Error::MissingSource(String::from_utf8_lossy(&node.metadata.name).into()))?;
        let expected = node.metadata.length;

        let mut file = open_with_retry(path, self.options)?;

        self.writer.seek(SeekFrom::Start(self.data_cursor))?;
        let copied = io::copy(&mut (&mut file).take(expected), &mut self.writer)?;

        // The file must neither have shrunk nor grown since it was walked.
        let mut probe = [0u8; 1];
        if copied != expected || file.read(&mut probe)? != 0 {
            return Err(Error::SourceChanged {
                path: path.to_owned(),
                expected,
            });
        }

        self.data_cursor += expected;
        self.span.pb_inc(expected);
        Ok(())
    }
}
