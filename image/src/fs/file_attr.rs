#![allow(clippy::unnecessary_cast)] // libc::S_IFDIR is u32 on Linux and u16 on MacOS

use crate::nodes::Kind;
use crate::reader::Record;

/// Block size files report, and count their blocks in.
pub const BLOCK_SIZE: u64 = 4096;

/// Everything is read-only for everybody.
const PERMISSIONS: u32 = 0o444;

/// What `stat` reports for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub kind: Kind,
    pub mode: u32,
    pub nlink: u64,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u64,
    pub mtime: i64,
}

/// The [Attributes] describing the synthetic directory above the image root.
pub const ROOT_ATTRIBUTES: Attributes = Attributes {
    kind: Kind::Directory,
    mode: libc::S_IFDIR as u32 | PERMISSIONS,
    nlink: 2,
    size: 0,
    blocks: 0,
    blksize: 0,
    mtime: 0,
};

impl From<&Record> for Attributes {
    fn from(record: &Record) -> Self {
        let m = &record.metadata;
        match m.kind {
            Kind::Directory => Attributes {
                kind: Kind::Directory,
                mode: libc::S_IFDIR as u32 | PERMISSIONS,
                // a directory's length is its number of children
                nlink: m.length,
                size: 0,
                blocks: 0,
                blksize: 0,
                mtime: m.modified_time,
            },
            Kind::File => Attributes {
                kind: Kind::File,
                mode: libc::S_IFREG as u32 | PERMISSIONS,
                nlink: 1,
                size: m.length,
                blocks: m.length.div_ceil(BLOCK_SIZE),
                blksize: BLOCK_SIZE,
                mtime: m.modified_time,
            },
        }
    }
}
