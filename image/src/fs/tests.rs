use std::io;
use std::sync::Arc;

use rstest::rstest;

use super::*;
use crate::fixtures;
use crate::nodes::Kind;

fn scenario() -> ImageFs<Vec<u8>> {
    let image = fixtures::SCENARIO_IMAGE.clone();
    let len = image.len() as u64;
    ImageFs::new(ImageReader::new(image, len))
}

fn errno(err: Error) -> Option<i32> {
    io::Error::from(err).raw_os_error()
}

#[test]
fn root_attributes() {
    let fs = scenario();
    let attrs = fs.attributes("/").unwrap();

    assert_eq!(ROOT_ATTRIBUTES, attrs);
    assert_eq!(libc::S_IFDIR as u32 | 0o444, attrs.mode);
    assert_eq!(2, attrs.nlink);
}

#[test]
fn dir_attributes() {
    let fs = scenario();

    let attrs = fs.attributes("/root").unwrap();
    assert_eq!(Kind::Directory, attrs.kind);
    assert_eq!(2, attrs.nlink);

    let attrs = fs.attributes("/root/sub").unwrap();
    assert_eq!(1, attrs.nlink);
    assert_eq!(
        fs.reader().resolve(b"/root/sub").unwrap().metadata.modified_time,
        attrs.mtime
    );
}

#[rstest]
#[case::empty(0, 0)]
#[case::one(1, 1)]
#[case::exact(4096, 1)]
#[case::over(4097, 2)]
fn file_blocks(#[case] length: u64, #[case] blocks: u64) {
    let mut record = scenario().reader().resolve(b"/root/a.txt").unwrap();
    record.metadata.length = length;

    let attrs = Attributes::from(&record);
    assert_eq!(Kind::File, attrs.kind);
    assert_eq!(libc::S_IFREG as u32 | 0o444, attrs.mode);
    assert_eq!(length, attrs.size);
    assert_eq!(blocks, attrs.blocks);
    assert_eq!(BLOCK_SIZE, attrs.blksize);
}

#[test]
fn attributes_not_found() {
    let err = scenario().attributes("/root/nope").expect_err("must fail");
    assert_eq!(Some(libc::ENOENT), errno(err));
}

#[test]
fn list_super_root() {
    let names = scenario().list("/").unwrap();
    assert_eq!(names, vec![&b"."[..], b"..", b"root"]);
}

#[rstest]
#[case::root("/root", vec![&b"."[..], b"..", b"a.txt", b"sub"])]
#[case::sub("/root/sub", vec![&b"."[..], b"..", b"b.txt"])]
#[case::trailing_slash("/root/sub/", vec![&b"."[..], b"..", b"b.txt"])]
fn list(#[case] path: &str, #[case] expected: Vec<&[u8]>) {
    assert_eq!(scenario().list(path).unwrap(), expected);
}

#[rstest]
#[case::file("/root/a.txt", libc::ENOTDIR)]
#[case::missing("/root/nope", libc::ENOENT)]
fn list_fails(#[case] path: &str, #[case] expected: i32) {
    let err = scenario().list(path).expect_err("must fail");
    assert_eq!(Some(expected), errno(err));
}

#[rstest]
#[case::read_only(libc::O_RDONLY)]
#[case::read_only_extra_flags(libc::O_RDONLY | libc::O_NONBLOCK)]
fn open(#[case] flags: i32) {
    let record = scenario().open("/root/a.txt", flags).expect("must open");
    assert_eq!(4, record.metadata.length);
}

#[rstest]
#[case::write_only("/root/a.txt", libc::O_WRONLY, libc::EACCES)]
#[case::read_write("/root/a.txt", libc::O_RDWR, libc::EACCES)]
#[case::directory("/root/sub", libc::O_RDONLY, libc::ENOENT)]
#[case::super_root("/", libc::O_RDONLY, libc::ENOENT)]
#[case::missing("/root/nope", libc::O_RDONLY, libc::ENOENT)]
fn open_fails(#[case] path: &str, #[case] flags: i32, #[case] expected: i32) {
    let err = scenario().open(path, flags).expect_err("must fail");
    assert_eq!(Some(expected), errno(err));
}

#[rstest]
#[case::window("/root/a.txt", 1, 2, b"bc")]
#[case::whole("/root/a.txt", 0, 4, b"abcd")]
#[case::clamped("/root/a.txt", 3, 100, b"d")]
#[case::at_length("/root/a.txt", 4, 10, b"")]
#[case::empty_file("/root/sub/b.txt", 0, 10, b"")]
fn read(#[case] path: &str, #[case] offset: u64, #[case] size: usize, #[case] expected: &[u8]) {
    let mut buf = vec![0u8; size];
    let n = scenario().read(path, offset, &mut buf).unwrap();
    assert_eq!(expected, &buf[..n]);
}

#[test]
fn read_directory() {
    let err = scenario()
        .read("/root/sub", 0, &mut [0; 4])
        .expect_err("must fail");
    assert_eq!(Some(libc::ENOENT), errno(err));
}

#[test]
fn corrupt_image_is_eio() {
    let mut image = fixtures::SCENARIO_IMAGE.clone();
    image[284..292].copy_from_slice(&u64::MAX.to_be_bytes());
    let len = image.len() as u64;
    let fs = ImageFs::new(ImageReader::new(image, len));

    let err = fs.attributes("/root/a.txt").expect_err("must fail");
    assert_eq!(Some(libc::EIO), errno(err));
}

/// Handlers share one file handle, and must not get into each other's
/// way while reading from it.
#[test]
fn concurrent_reads() {
    let tmpdir = tempfile::TempDir::new().unwrap();
    let image_path = tmpdir.path().join("image");
    std::fs::write(&image_path, &*fixtures::COMPLICATED_IMAGE).unwrap();

    let file = Arc::new(std::fs::File::open(&image_path).unwrap());
    let len = fixtures::COMPLICATED_IMAGE.len() as u64;
    let fs = ImageFs::new(ImageReader::new(file, len));

    std::thread::scope(|s| {
        for i in 0..8 {
            let fs = &fs;
            s.spawn(move || {
                for _ in 0..16 {
                    let (path, expected): (&str, &[u8]) = if i % 2 == 0 {
                        ("/complicated/keep/blob", &fixtures::BLOB_LARGE[..])
                    } else {
                        ("/complicated/aa", fixtures::HELLOWORLD_CONTENTS)
                    };

                    let mut buf = vec![0u8; expected.len()];
                    let n = fs.read(path, 0, &mut buf).unwrap();
                    assert_eq!(expected.len(), n);
                    assert!(buf == expected, "{path} contents differ");

                    let tail = expected.len() as u64 / 2;
                    let n = fs.read(path, tail, &mut buf).unwrap();
                    assert_eq!(&expected[tail as usize..], &buf[..n]);
                }
            });
        }
    });
}
