//! [FileSystem] for [ImageFs], so it can be mounted with `fuse-backend-rs`.
//!
//! No inodes are tracked: an entry's inode is derived from where its header
//! block starts, and [ROOT_ID] is the synthetic directory above the image
//! root.

use std::ffi::CStr;
use std::io::{self, Write};
use std::time::Duration;

use bstr::ByteSlice;
use fuse_backend_rs::abi::fuse_abi::{stat64, Attr};
use fuse_backend_rs::api::filesystem::{
    Context, DirEntry, Entry, FileSystem, FsOptions, OpenOptions, ZeroCopyWriter, ROOT_ID,
};
use tracing::{debug, instrument};

use super::{check_access, Attributes, ImageFs, ROOT_ATTRIBUTES};
use crate::nodes::Kind;
use crate::read_at::ReadAt;
use crate::reader::Record;
use crate::Error;

/// Header offsets start at 0, inodes right after [ROOT_ID].
const INODE_BASE: u64 = ROOT_ID + 1;

fn inode_of(record: &Record) -> u64 {
    record.header_offset + INODE_BASE
}

impl Attributes {
    fn to_fuse_attr(self, ino: u64) -> Attr {
        Attr {
            ino,
            size: self.size,
            blocks: self.blocks,
            blksize: u32::try_from(self.blksize).unwrap_or(u32::MAX),
            mode: self.mode,
            nlink: u32::try_from(self.nlink).unwrap_or(u32::MAX),
            atime: self.mtime.max(0) as u64,
            mtime: self.mtime.max(0) as u64,
            ctime: self.mtime.max(0) as u64,
            ..Default::default()
        }
    }
}

fn entry(record: &Record) -> Entry {
    let ino = inode_of(record);
    Entry {
        inode: ino,
        attr: Attributes::from(record).to_fuse_attr(ino).into(),
        attr_timeout: Duration::MAX,
        entry_timeout: Duration::MAX,
        ..Default::default()
    }
}

fn dirent_type(kind: Kind) -> u32 {
    match kind {
        Kind::Directory => u32::from(libc::DT_DIR),
        Kind::File => u32::from(libc::DT_REG),
    }
}

impl<R> ImageFs<R>
where
    R: ReadAt,
{
    /// The record behind an inode handed out by [FileSystem::lookup] or
    /// [FileSystem::readdir].
    fn record_of(&self, inode: u64) -> io::Result<Record> {
        let at = inode
            .checked_sub(INODE_BASE)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        Ok(self.reader.read_header(at)?)
    }
}

impl<R> FileSystem for ImageFs<R>
where
    R: ReadAt,
{
    type Handle = u64;
    type Inode = u64;

    fn init(&self, _capable: FsOptions) -> io::Result<FsOptions> {
        Ok(FsOptions::empty())
    }

    #[instrument(skip_all, fields(rq.inode = inode))]
    fn getattr(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Option<Self::Handle>,
    ) -> io::Result<(stat64, Duration)> {
        let attrs = if inode == ROOT_ID {
            ROOT_ATTRIBUTES
        } else {
            Attributes::from(&self.record_of(inode)?)
        };
        Ok((attrs.to_fuse_attr(inode).into(), Duration::MAX))
    }

    #[instrument(skip_all, fields(rq.parent_inode = parent, rq.name = ?name))]
    fn lookup(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<Entry> {
        let name = name.to_bytes();

        let child = if parent == ROOT_ID {
            Some(self.reader.root()?).filter(|root| root.metadata.name == name)
        } else {
            let dir = self.record_of(parent)?;
            self.reader.find_child(&dir, name)?
        };

        match child {
            Some(record) => {
                debug!(at = record.header_offset, "found");
                Ok(entry(&record))
            }
            None => Err(Error::NotFound(name.as_bstr().to_string()).into()),
        }
    }

    #[instrument(skip_all, fields(rq.inode = inode, rq.offset = offset))]
    fn readdir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        _size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(DirEntry) -> io::Result<usize>,
    ) -> io::Result<()> {
        let children = if inode == ROOT_ID {
            vec![self.reader.root()?]
        } else {
            self.reader.children(&self.record_of(inode)?)?
        };

        for (i, child) in children.iter().skip(offset as usize).enumerate() {
            // The offset of an entry is where the next call picks up.
            let written = add_entry(DirEntry {
                ino: inode_of(child),
                offset: offset + i as u64 + 1,
                type_: dirent_type(child.metadata.kind),
                name: &child.metadata.name,
            })?;
            // add_entry returns Ok(0) once the buffer is full.
            if written == 0 {
                break;
            }
        }

        Ok(())
    }

    #[instrument(skip_all, fields(rq.inode = inode, rq.flags = flags))]
    fn open(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions, Option<u32>)> {
        if inode == ROOT_ID {
            return Err(Error::NotAFile("/".into()).into());
        }

        let record = self.record_of(inode)?;
        if !record.metadata.is_file() {
            return Err(Error::NotAFile(record.metadata.name.as_bstr().to_string()).into());
        }
        check_access(flags as i32)?;

        // Reads go by inode, there is nothing to keep per handle. The
        // contents never change, so the page cache may outlive the open.
        Ok((None, OpenOptions::KEEP_CACHE, None))
    }

    #[instrument(skip_all, fields(rq.inode = inode, rq.offset = offset, rq.size = size))]
    fn read(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        let record = self.record_of(inode)?;

        let mut buf = vec![0u8; size as usize];
        let n = self.reader.read_at(&record, offset, &mut buf)?;
        w.write_all(&buf[..n])?;
        Ok(n)
    }
}
