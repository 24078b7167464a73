//! Byte layout of the header blocks and child-offset tables an image is
//! made of. All integers are big-endian.
//!
//! ```text
//! 0        256      264      272      280   284
//! | name    | length | mtime  | offset | kind |
//! ```
//!
//! Names shorter than [NAME_LEN] are terminated by a NUL byte and padded
//! with spaces.

use bytes::Bytes;

use crate::nodes::Kind;
use crate::FormatError;

pub const NAME_LEN: usize = 256;

/// Size of one serialized header block.
pub const HEADER_BLOCK_SIZE: u64 = 284;

/// Size of one child-offset table slot.
pub const OFFSET_LEN: u64 = 8;

const LENGTH_AT: usize = NAME_LEN;
const MTIME_AT: usize = LENGTH_AT + 8;
const OFFSET_AT: usize = MTIME_AT + 8;
const KIND_AT: usize = OFFSET_AT + 8;

pub const KIND_DIRECTORY: u32 = 0;
pub const KIND_FILE: u32 = 1;

/// The decoded contents of one header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub name: Bytes,
    pub kind: Kind,
    pub length: u64,
    pub modified_time: i64,
    /// Start of the child-offset table for directories, start of the
    /// contents for files.
    pub offset: u64,
}

impl HeaderBlock {
    pub fn encode(&self) -> [u8; HEADER_BLOCK_SIZE as usize] {
        debug_assert!(
            self.name.len() <= NAME_LEN,
            "name.len() > {}",
            NAME_LEN
        );

        let mut buf = [b' '; HEADER_BLOCK_SIZE as usize];
        buf[..self.name.len()].copy_from_slice(&self.name);
        if self.name.len() < NAME_LEN {
            buf[self.name.len()] = 0;
        }

        buf[LENGTH_AT..MTIME_AT].copy_from_slice(&self.length.to_be_bytes());
        buf[MTIME_AT..OFFSET_AT].copy_from_slice(&self.modified_time.to_be_bytes());
        buf[OFFSET_AT..KIND_AT].copy_from_slice(&self.offset.to_be_bytes());
        buf[KIND_AT..].copy_from_slice(&u32::from(self.kind).to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_BLOCK_SIZE as usize]) -> Result<Self, FormatError> {
        let name_end = buf[..NAME_LEN]
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_LEN);

        Ok(HeaderBlock {
            name: Bytes::copy_from_slice(&buf[..name_end]),
            length: u64::from_be_bytes(array(&buf[LENGTH_AT..MTIME_AT])),
            modified_time: i64::from_be_bytes(array(&buf[MTIME_AT..OFFSET_AT])),
            offset: u64::from_be_bytes(array(&buf[OFFSET_AT..KIND_AT])),
            kind: Kind::try_from(u32::from_be_bytes(array(&buf[KIND_AT..])))?,
        })
    }
}

/// Decodes a child-offset table. Trailing bytes that don't make up a full
/// slot are ignored.
pub fn decode_offsets(buf: &[u8]) -> Vec<u64> {
    buf.chunks_exact(OFFSET_LEN as usize)
        .map(|chunk| u64::from_be_bytes(array(chunk)))
        .collect()
}

fn array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(slice);
    out
}
