//! The in-memory metadata tree that is built while walking a source
//! directory and consumed by the serializer.
use std::path::PathBuf;

use bytes::Bytes;

use crate::wire::{self, HEADER_BLOCK_SIZE, OFFSET_LEN};
use crate::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Directory,
    File,
}

impl From<Kind> for u32 {
    fn from(value: Kind) -> Self {
        match value {
            Kind::Directory => wire::KIND_DIRECTORY,
            Kind::File => wire::KIND_FILE,
        }
    }
}

impl TryFrom<u32> for Kind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            wire::KIND_DIRECTORY => Ok(Kind::Directory),
            wire::KIND_FILE => Ok(Kind::File),
            other => Err(FormatError::UnknownKind(other)),
        }
    }
}

/// Describes a single filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: Bytes,
    pub kind: Kind,
    /// Byte count for files, number of immediate children for directories.
    pub length: u64,
    /// Seconds since the epoch.
    pub modified_time: i64,
    /// Where the entry was found while mastering. Never persisted.
    pub source_path: Option<PathBuf>,
    /// Where the header block starts for directories, where the contents
    /// start for files.
    /// Unset until the entry has been serialized (or read back).
    pub on_disk_offset: Option<u64>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == Kind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == Kind::File
    }
}

/// Returns true if `name` can be stored in a header block and looked up
/// again by path.
pub fn valid_name(name: &[u8]) -> bool {
    !name.is_empty() && name.len() <= wire::NAME_LEN && !name.contains(&0) && !name.contains(&b'/')
}

/// A [Metadata] record plus, for directories, its children in walk order.
/// Each child is exclusively owned by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub metadata: Metadata,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn file(name: Bytes, length: u64, modified_time: i64, source_path: PathBuf) -> Self {
        TreeNode {
            metadata: Metadata {
                name,
                kind: Kind::File,
                length,
                modified_time,
                source_path: Some(source_path),
                on_disk_offset: None,
            },
            children: vec![],
        }
    }

    /// Number of header blocks this subtree serializes to.
    pub fn header_count(&self) -> u64 {
        1 + self.children.iter().map(TreeNode::header_count).sum::<u64>()
    }

    /// Number of child-offset table slots this subtree serializes to.
    pub fn total_child_count(&self) -> u64 {
        self.children.len() as u64
            + self
                .children
                .iter()
                .map(TreeNode::total_child_count)
                .sum::<u64>()
    }

    /// Size of the header region, which is also where file contents start.
    pub fn header_region_size(&self) -> u64 {
        self.header_count() * HEADER_BLOCK_SIZE + self.total_child_count() * OFFSET_LEN
    }

    /// Sum of all file lengths in this subtree.
    pub fn data_size(&self) -> u64 {
        match self.metadata.kind {
            Kind::File => self.metadata.length,
            Kind::Directory => self.children.iter().map(TreeNode::data_size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn counts() {
        let tree = fixtures::scenario_tree();

        // root, a.txt, sub, b.txt
        assert_eq!(4, tree.header_count());
        // root has 2 children, sub has 1
        assert_eq!(3, tree.total_child_count());
        assert_eq!(4 * 284 + 3 * 8, tree.header_region_size());
        assert_eq!(4, tree.data_size());
    }

    #[test]
    fn names() {
        assert!(valid_name(b"a.txt"));
        assert!(valid_name(&[b'x'; 256]));
        assert!(!valid_name(&[b'x'; 257]));
        assert!(!valid_name(b""));
        assert!(!valid_name(b"a/b"));
        assert!(!valid_name(b"a\0b"));
    }
}
