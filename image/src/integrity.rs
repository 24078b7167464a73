//! Keyed integrity trailer.
//!
//! The payload is split into blocks of [HASH_BLOCK_SIZE] bytes (the last
//! one may be shorter), and an HMAC-SHA256 code is computed for each block
//! separately. The codes are appended in block order, followed by their
//! count as a big-endian u32:
//!
//! ```text
//! | payload | code 0 | code 1 | ... | code n-1 | n |
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::{Error, FormatError};

type HmacSha256 = Hmac<Sha256>;

pub const HASH_BLOCK_SIZE: u64 = 1024;
pub const HASH_LEN: u64 = 32;
pub const COUNT_LEN: u64 = 4;

/// Keys shorter than this are refused by [check_key].
pub const MIN_KEY_LEN: usize = 4;

/// Number of hash blocks a payload of `payload_len` bytes splits into.
pub fn block_count(payload_len: u64) -> u64 {
    payload_len.div_ceil(HASH_BLOCK_SIZE)
}

/// Byte ranges of the hash blocks of a payload of `payload_len` bytes.
pub fn block_ranges(payload_len: u64) -> impl Iterator<Item = Range<u64>> {
    (0..block_count(payload_len)).map(move |i| {
        let start = i * HASH_BLOCK_SIZE;
        start..(start + HASH_BLOCK_SIZE).min(payload_len)
    })
}

/// Refuses keys that are too short to be taken seriously.
pub fn check_key(key: &[u8]) -> Result<(), Error> {
    if key.len() < MIN_KEY_LEN {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, Error> {
    HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidKey)
}

/// Computes the codes for everything currently in `file`, and appends them
/// plus their count. Returns the number of codes written.
#[instrument(skip_all, err)]
pub fn append_integrity<F>(mut file: F, key: &[u8]) -> Result<u32, Error>
where
    F: Read + Write + Seek,
{
    let payload_len = file.seek(SeekFrom::End(0))?;
    let count = u32::try_from(block_count(payload_len))
        .map_err(|_| FormatError::TooManyBlocks(block_count(payload_len)))?;

    let mac = new_mac(key)?;
    let mut codes = Vec::with_capacity(count as usize * HASH_LEN as usize);
    let mut block = vec![0u8; HASH_BLOCK_SIZE as usize];

    file.seek(SeekFrom::Start(0))?;
    for range in block_ranges(payload_len) {
        let block = &mut block[..(range.end - range.start) as usize];
        file.read_exact(block)?;

        let mut mac = mac.clone();
        mac.update(block);
        codes.extend_from_slice(&mac.finalize().into_bytes());
    }

    file.seek(SeekFrom::Start(payload_len))?;
    file.write_all(&codes)?;
    file.write_all(&count.to_be_bytes())?;
    file.flush()?;

    debug!(payload_len, count, "appended integrity trailer");
    Ok(count)
}

/// Where the payload of a protected image ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub payload_len: u64,
    pub block_count: u32,
}

impl Trailer {
    /// Total length of the protected image.
    pub fn image_len(&self) -> u64 {
        self.payload_len + u64::from(self.block_count) * HASH_LEN + COUNT_LEN
    }
}

/// Reads the count at the end of `source` and works out the payload length.
/// Fails if the trailer cannot belong to any payload.
pub fn locate_trailer<R>(mut source: R) -> Result<Trailer, Error>
where
    R: Read + Seek,
{
    let size = source.seek(SeekFrom::End(0))?;
    if size < COUNT_LEN {
        return Err(FormatError::TruncatedTrailer(size).into());
    }

    let mut buf = [0u8; COUNT_LEN as usize];
    source.seek(SeekFrom::Start(size - COUNT_LEN))?;
    source.read_exact(&mut buf)?;
    let count = u32::from_be_bytes(buf);

    let trailer_len = u64::from(count) * HASH_LEN + COUNT_LEN;
    let payload_len = size
        .checked_sub(trailer_len)
        .ok_or(FormatError::TrailerOverrun { count, size })?;

    if block_count(payload_len) != u64::from(count) {
        return Err(FormatError::BlockCountMismatch { payload_len, count }.into());
    }

    Ok(Trailer {
        payload_len,
        block_count: count,
    })
}

/// Recomputes every block's code and compares it to the stored one.
///
/// Returns `Ok(false)` if any code differs, which also happens for a wrong
/// key. A trailer that doesn't fit the image is an error.
#[instrument(skip_all, err)]
pub fn verify_integrity<R>(mut source: R, key: &[u8]) -> Result<bool, Error>
where
    R: Read + Seek,
{
    let trailer = locate_trailer(&mut source)?;

    let mut codes = vec![0u8; trailer.block_count as usize * HASH_LEN as usize];
    source.seek(SeekFrom::Start(trailer.payload_len))?;
    source.read_exact(&mut codes)?;

    let mac = new_mac(key)?;
    let mut block = vec![0u8; HASH_BLOCK_SIZE as usize];

    source.seek(SeekFrom::Start(0))?;
    for (i, (range, code)) in block_ranges(trailer.payload_len)
        .zip(codes.chunks_exact(HASH_LEN as usize))
        .enumerate()
    {
        let block = &mut block[..(range.end - range.start) as usize];
        source.read_exact(block).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Format(FormatError::TruncatedTrailer(range.end)),
            _ => Error::Io(e),
        })?;

        let mut mac = mac.clone();
        mac.update(block);
        if mac.verify_slice(code).is_err() {
            warn!(block = i, "integrity code mismatch");
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    const KEY: &[u8] = b"sekrit";

    fn protected(payload: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(payload.to_vec());
        append_integrity(&mut cursor, KEY).expect("must append");
        cursor.into_inner()
    }

    #[rstest]
    #[case::empty(0, 0)]
    #[case::one(1, 1)]
    #[case::exact(1024, 1)]
    #[case::one_more(1025, 2)]
    #[case::three(3000, 3)]
    fn counts(#[case] payload_len: u64, #[case] expected: u64) {
        assert_eq!(expected, block_count(payload_len));
        assert_eq!(expected as usize, block_ranges(payload_len).count());
    }

    #[test]
    fn ranges() {
        let ranges: Vec<_> = block_ranges(3000).collect();
        assert_eq!(vec![0..1024, 1024..2048, 2048..3000], ranges);
    }

    #[test]
    fn append() {
        let payload = vec![7u8; 3000];
        let mut cursor = Cursor::new(payload.clone());
        assert_eq!(3, append_integrity(&mut cursor, b"k1").unwrap());

        let image = cursor.into_inner();
        assert_eq!(3100, image.len());
        assert_eq!(&payload[..], &image[..3000]);
        assert_eq!(&[0, 0, 0, 3], &image[3096..]);

        // The first code covers the first block only.
        let mut mac = HmacSha256::new_from_slice(b"k1").unwrap();
        mac.update(&payload[..1024]);
        assert_eq!(&mac.finalize().into_bytes()[..], &image[3000..3032]);

        assert_eq!(
            Trailer {
                payload_len: 3000,
                block_count: 3
            },
            locate_trailer(Cursor::new(&image)).unwrap()
        );
        assert_eq!(
            image.len() as u64,
            locate_trailer(Cursor::new(&image)).unwrap().image_len()
        );
        assert!(verify_integrity(Cursor::new(&image), b"k1").unwrap());
    }

    #[test]
    fn unmodified() {
        let image = protected(&[1u8; 3000]);
        assert!(verify_integrity(Cursor::new(image), KEY).unwrap());
    }

    #[test]
    fn empty_payload() {
        let image = protected(&[]);
        assert_eq!(vec![0, 0, 0, 0], image);
        assert!(verify_integrity(Cursor::new(image), KEY).unwrap());
    }

    #[rstest]
    #[case::first_block(0)]
    #[case::middle(1500)]
    #[case::last_byte(2999)]
    fn flipped_payload(#[case] at: usize) {
        let mut image = protected(&[1u8; 3000]);
        image[at] ^= 0x01;
        assert!(!verify_integrity(Cursor::new(image), KEY).unwrap());
    }

    #[test]
    fn flipped_code() {
        let mut image = protected(&[1u8; 3000]);
        image[3040] ^= 0x80;
        assert!(!verify_integrity(Cursor::new(image), KEY).unwrap());
    }

    #[test]
    fn wrong_key() {
        let image = protected(&[1u8; 3000]);
        assert!(!verify_integrity(Cursor::new(image), b"other key").unwrap());
    }

    #[test]
    fn too_small() {
        let err = verify_integrity(Cursor::new(vec![0, 0]), KEY).expect_err("must fail");
        assert!(
            matches!(err, Error::Format(FormatError::TruncatedTrailer(2))),
            "{err:?}"
        );
    }

    #[test]
    fn truncated() {
        let full = protected(&[1u8; 3000]);
        // Cut the image down, keeping the count of three codes.
        let mut image = full[..100].to_vec();
        image.extend_from_slice(&full[3096..]);

        let err = verify_integrity(Cursor::new(image), KEY).expect_err("must fail");
        assert!(
            matches!(err, Error::Format(FormatError::BlockCountMismatch { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn overrun() {
        let mut image = vec![0u8; 10];
        image.extend_from_slice(&1000u32.to_be_bytes());

        let err = locate_trailer(Cursor::new(image)).expect_err("must fail");
        assert!(
            matches!(
                err,
                Error::Format(FormatError::TrailerOverrun {
                    count: 1000,
                    size: 14
                })
            ),
            "{err:?}"
        );
    }

    #[rstest]
    #[case::empty(b"", false)]
    #[case::short(b"abc", false)]
    #[case::min(b"abcd", true)]
    fn keys(#[case] key: &[u8], #[case] ok: bool) {
        assert_eq!(ok, check_key(key).is_ok());
    }
}
