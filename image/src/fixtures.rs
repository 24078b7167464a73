use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use lazy_static::lazy_static;
use tempfile::TempDir;

use crate::import::{ingest_path, ImportOptions};
use crate::nodes::{Kind, Metadata, TreeNode};
use crate::writer::serialize;

pub const A_TXT_CONTENTS: &[u8] = b"abcd";
pub const HELLOWORLD_CONTENTS: &[u8] = b"Hello World!";

lazy_static! {
    // 1MB
    pub static ref BLOB_LARGE: Bytes = (0..255).collect::<Vec<u8>>().repeat(4 * 1024).into();

    /// `root/` mastered without a trailer.
    pub static ref SCENARIO_IMAGE: Vec<u8> = {
        let tmpdir = TempDir::new().unwrap();
        master_to_vec(&write_scenario(tmpdir.path()).unwrap())
    };

    /// `complicated/` mastered without a trailer.
    pub static ref COMPLICATED_IMAGE: Vec<u8> = {
        let tmpdir = TempDir::new().unwrap();
        master_to_vec(&write_complicated(tmpdir.path()).unwrap())
    };
}

/// Creates this tree below `parent` and returns the path of `root`:
///
/// ```text
/// root/
/// ├── a.txt   "abcd"
/// └── sub/
///     └── b.txt   (empty)
/// ```
pub fn write_scenario(parent: &Path) -> io::Result<PathBuf> {
    let root = parent.join("root");
    std::fs::create_dir_all(root.join("sub"))?;
    std::fs::write(root.join("a.txt"), A_TXT_CONTENTS)?;
    std::fs::write(root.join("sub/b.txt"), b"")?;
    Ok(root)
}

/// Creates this tree below `parent` and returns the path of `complicated`:
///
/// ```text
/// complicated/
/// ├── .keep
/// ├── aa          "Hello World!"
/// ├── deep/a/b/c/leaf
/// ├── empty/
/// └── keep/
///     ├── .keep
///     └── blob    1MB
/// ```
pub fn write_complicated(parent: &Path) -> io::Result<PathBuf> {
    let root = parent.join("complicated");
    std::fs::create_dir_all(root.join("deep/a/b/c"))?;
    std::fs::create_dir_all(root.join("empty"))?;
    std::fs::create_dir_all(root.join("keep"))?;
    std::fs::write(root.join(".keep"), b"")?;
    std::fs::write(root.join("aa"), HELLOWORLD_CONTENTS)?;
    std::fs::write(root.join("deep/a/b/c/leaf"), b"leaf")?;
    std::fs::write(root.join("keep/.keep"), b"")?;
    std::fs::write(root.join("keep/blob"), &*BLOB_LARGE)?;
    Ok(root)
}

/// Masters `root` into memory, without an integrity trailer.
pub fn master_to_vec(root: &Path) -> Vec<u8> {
    let mut tree = ingest_path(root, &ImportOptions::default()).unwrap();
    let mut buf = Cursor::new(Vec::new());
    serialize(&mut tree, &mut buf, &ImportOptions::default()).unwrap();
    buf.into_inner()
}

/// The scenario tree, built in memory. Source paths are made up.
pub fn scenario_tree() -> TreeNode {
    fn dir(name: &'static [u8], children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            metadata: Metadata {
                name: Bytes::from_static(name),
                kind: Kind::Directory,
                length: children.len() as u64,
                modified_time: 0,
                source_path: Some(PathBuf::from(std::str::from_utf8(name).unwrap())),
                on_disk_offset: None,
            },
            children,
        }
    }

    dir(
        b"root",
        vec![
            TreeNode::file(Bytes::from_static(b"a.txt"), 4, 0, "root/a.txt".into()),
            dir(
                b"sub",
                vec![TreeNode::file(
                    Bytes::from_static(b"b.txt"),
                    0,
                    0,
                    "root/sub/b.txt".into(),
                )],
            ),
        ],
    )
}
