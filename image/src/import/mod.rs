//! Turns a directory walk into a [TreeNode].
//!
//! The main function here is [build_tree], receiving an iterator of
//! [WalkEntry]. Producing these entries from a real filesystem lives in
//! [fs].

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::nodes::{Kind, Metadata, TreeNode};

mod error;
pub mod fs;

pub use error::Error;
pub use fs::{ingest_path, ImportOptions};

/// One entry of a pre-order directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Dir {
        path: PathBuf,
        depth: usize,
        name: Bytes,
        /// Number of children found by scanning the directory when it was
        /// visited.
        declared_length: u64,
        modified_time: i64,
    },
    File {
        path: PathBuf,
        depth: usize,
        name: Bytes,
        size: u64,
        modified_time: i64,
    },
}

impl WalkEntry {
    fn path(&self) -> &Path {
        match self {
            WalkEntry::Dir { path, .. } => path,
            WalkEntry::File { path, .. } => path,
        }
    }

    fn depth(&self) -> usize {
        match self {
            WalkEntry::Dir { depth, .. } => *depth,
            WalkEntry::File { depth, .. } => *depth,
        }
    }
}

/// Accumulates the children of one directory until the walk leaves it.
#[derive(Debug)]
pub struct DirectoryBuilder {
    metadata: Metadata,
    children: Vec<TreeNode>,
}

impl DirectoryBuilder {
    pub fn new(name: Bytes, declared_length: u64, modified_time: i64, source_path: PathBuf) -> Self {
        DirectoryBuilder {
            metadata: Metadata {
                name,
                kind: Kind::Directory,
                length: declared_length,
                modified_time,
                source_path: Some(source_path),
                on_disk_offset: None,
            },
            children: Vec::with_capacity(declared_length.min(1024) as usize),
        }
    }

    fn path(&self) -> PathBuf {
        self.metadata.source_path.clone().unwrap_or_default()
    }

    /// Appends the next child. Fails if the directory already holds as many
    /// children as it declared.
    pub fn push(&mut self, child: TreeNode) -> Result<(), Error> {
        if self.children.len() as u64 >= self.metadata.length {
            return Err(Error::ChildCountMismatch {
                path: self.path(),
                declared: self.metadata.length,
                found: self.children.len() as u64 + 1,
            });
        }
        self.children.push(child);
        Ok(())
    }

    /// Freezes the directory. Fails unless exactly the declared number of
    /// children were pushed.
    pub fn finish(self) -> Result<TreeNode, Error> {
        if self.children.len() as u64 != self.metadata.length {
            return Err(Error::ChildCountMismatch {
                path: self.path(),
                declared: self.metadata.length,
                found: self.children.len() as u64,
            });
        }

        Ok(TreeNode {
            metadata: self.metadata,
            children: self.children,
        })
    }
}

/// Builds a [TreeNode] from a pre-order walk.
///
/// The iterator must have the following invariants:
/// - The first entry is the root directory, at depth 0, and it is the only
///   entry at depth 0.
/// - Every other entry directly follows its parent or one of its earlier
///   siblings' subtrees, with a depth one larger than its parent.
///
/// Children keep the order in which the walk delivered them.
/// A directory is finalized as soon as the walk moves past it, at which
/// point the number of children must match its declared length.
#[instrument(skip_all, err)]
pub fn build_tree<I>(entries: I) -> Result<TreeNode, Error>
where
    I: IntoIterator<Item = Result<WalkEntry, Error>>,
{
    // Directories on the path from the root to the current entry.
    let mut stack: Vec<DirectoryBuilder> = Vec::new();
    let mut root: Option<TreeNode> = None;

    for entry in entries {
        let entry = entry?;
        let depth = entry.depth();

        while stack.len() > depth {
            if let Some(node) = close(&mut stack)? {
                root = Some(node);
            }
        }

        if depth == 0 {
            if root.is_some() || !stack.is_empty() {
                return Err(Error::MultipleRoots(entry.path().to_owned()));
            }
            if !matches!(entry, WalkEntry::Dir { .. }) {
                return Err(Error::RootNotDirectory(entry.path().to_owned()));
            }
        } else if stack.len() != depth {
            return Err(Error::Orphan(entry.path().to_owned()));
        }

        match entry {
            WalkEntry::Dir {
                path,
                name,
                declared_length,
                modified_time,
                ..
            } => {
                debug!(path = ?path, declared_length, "entering directory");
                stack.push(DirectoryBuilder::new(
                    name,
                    declared_length,
                    modified_time,
                    path,
                ));
            }
            WalkEntry::File {
                path,
                name,
                size,
                modified_time,
                ..
            } => {
                let node = TreeNode::file(name, size, modified_time, path);
                match stack.last_mut() {
                    Some(parent) => parent.push(node)?,
                    None => return Err(Error::Orphan(node.metadata.source_path.unwrap_or_default())),
                }
            }
        }
    }

    while !stack.is_empty() {
        if let Some(node) = close(&mut stack)? {
            root = Some(node);
        }
    }

    root.ok_or(Error::EmptyWalk)
}

/// Finalizes the innermost open directory and hands it to its parent.
/// Returns the finished node if it was the root.
fn close(stack: &mut Vec<DirectoryBuilder>) -> Result<Option<TreeNode>, Error> {
    let Some(builder) = stack.pop() else {
        return Ok(None);
    };
    let node = builder.finish()?;

    match stack.last_mut() {
        Some(parent) => {
            parent.push(node)?;
            Ok(None)
        }
        None => Ok(Some(node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(path: &str, depth: usize, declared_length: u64) -> Result<WalkEntry, Error> {
        Ok(WalkEntry::Dir {
            path: path.into(),
            depth,
            name: Bytes::copy_from_slice(Path::new(path).file_name().unwrap().as_encoded_bytes()),
            declared_length,
            modified_time: 0,
        })
    }

    fn file(path: &str, depth: usize, size: u64) -> Result<WalkEntry, Error> {
        Ok(WalkEntry::File {
            path: path.into(),
            depth,
            name: Bytes::copy_from_slice(Path::new(path).file_name().unwrap().as_encoded_bytes()),
            size,
            modified_time: 0,
        })
    }

    #[test]
    fn scenario() {
        let tree = build_tree(vec![
            dir("root", 0, 2),
            file("root/a.txt", 1, 4),
            dir("root/sub", 1, 1),
            file("root/sub/b.txt", 2, 0),
        ])
        .expect("must build");

        assert_eq!(b"root"[..], tree.metadata.name);
        assert_eq!(2, tree.metadata.length);
        assert_eq!(2, tree.children.len());
        assert_eq!(b"a.txt"[..], tree.children[0].metadata.name);
        assert_eq!(4, tree.children[0].metadata.length);
        assert_eq!(b"sub"[..], tree.children[1].metadata.name);
        assert_eq!(1, tree.children[1].metadata.length);
        assert_eq!(b"b.txt"[..], tree.children[1].children[0].metadata.name);
    }

    /// Siblings after a nested subtree land in the right parent.
    #[test]
    fn return_from_subtree() {
        let tree = build_tree(vec![
            dir("r", 0, 3),
            dir("r/a", 1, 1),
            dir("r/a/b", 2, 1),
            file("r/a/b/c", 3, 1),
            dir("r/d", 1, 0),
            file("r/e", 1, 2),
        ])
        .expect("must build");

        let names: Vec<_> = tree
            .children
            .iter()
            .map(|c| &c.metadata.name[..])
            .collect();
        assert_eq!(vec![&b"a"[..], b"d", b"e"], names);
        assert_eq!(1, tree.children[0].children[0].children.len());
        assert!(tree.children[1].children.is_empty());
    }

    #[test]
    fn empty_root() {
        let tree = build_tree(vec![dir("r", 0, 0)]).expect("must build");
        assert_eq!(1, tree.header_count());
    }

    #[test]
    fn too_few_children() {
        let err = build_tree(vec![dir("r", 0, 2), file("r/a", 1, 0)]).expect_err("must fail");
        assert!(
            matches!(err, Error::ChildCountMismatch { declared: 2, found: 1, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn too_many_children() {
        let err = build_tree(vec![dir("r", 0, 1), file("r/a", 1, 0), file("r/b", 1, 0)])
            .expect_err("must fail");
        assert!(
            matches!(err, Error::ChildCountMismatch { declared: 1, found: 2, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn root_must_be_directory() {
        let err = build_tree(vec![file("r", 0, 1)]).expect_err("must fail");
        assert!(matches!(err, Error::RootNotDirectory(_)), "{err:?}");
    }

    #[test]
    fn depth_gap() {
        let err = build_tree(vec![dir("r", 0, 1), file("r/a/b", 2, 0)]).expect_err("must fail");
        assert!(matches!(err, Error::Orphan(_)), "{err:?}");
    }

    #[test]
    fn second_root() {
        let err = build_tree(vec![dir("r", 0, 0), dir("s", 0, 0)]).expect_err("must fail");
        assert!(matches!(err, Error::MultipleRoots(_)), "{err:?}");
    }

    #[test]
    fn empty() {
        let err = build_tree(vec![]).expect_err("must fail");
        assert!(matches!(err, Error::EmptyWalk), "{err:?}");
    }

    #[test]
    fn walk_errors_propagate() {
        let err = build_tree(vec![
            dir("r", 0, 1),
            Err(Error::UnsupportedEntry("r/fifo".into())),
        ])
        .expect_err("must fail");
        assert!(matches!(err, Error::UnsupportedEntry(_)), "{err:?}");
    }
}
