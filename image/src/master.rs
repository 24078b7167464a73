use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom};
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::import::{ingest_path, ImportOptions};
use crate::integrity::{append_integrity, check_key, Trailer};
use crate::writer::serialize;
use crate::Error;

/// What [master] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterSummary {
    pub header_count: u64,
    pub header_region_size: u64,
    pub data_size: u64,
    pub block_count: u32,
}

impl MasterSummary {
    pub fn payload_len(&self) -> u64 {
        self.header_region_size + self.data_size
    }

    pub fn image_len(&self) -> u64 {
        Trailer {
            payload_len: self.payload_len(),
            block_count: self.block_count,
        }
        .image_len()
    }
}

/// Masters the directory at `root` into a new image at `output`, and
/// protects it with an integrity trailer keyed by `key`.
///
/// `output` is created or truncated. If anything fails, whatever was
/// written to it is removed again.
#[instrument(skip_all, fields(root = ?root.as_ref(), output = ?output.as_ref()), err)]
pub fn master<P, Q>(
    root: P,
    output: Q,
    key: &[u8],
    options: &ImportOptions,
) -> Result<MasterSummary, Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    check_key(key)?;

    let output = output.as_ref();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)?;

    match master_into(root.as_ref(), &mut file, key, options) {
        Ok(summary) => {
            info!(
                headers = summary.header_count,
                size = summary.image_len(),
                "mastered image"
            );
            Ok(summary)
        }
        Err(e) => {
            drop(file);
            if let Err(rm_err) = std::fs::remove_file(output) {
                warn!(err = %rm_err, "unable to remove partial image");
            }
            Err(e)
        }
    }
}

fn master_into(
    root: &Path,
    file: &mut File,
    key: &[u8],
    options: &ImportOptions,
) -> Result<MasterSummary, Error> {
    let mut tree = ingest_path(root, options)?;

    let summary = {
        let mut writer = BufWriter::new(&mut *file);
        let summary = serialize(&mut tree, &mut writer, options)?;
        writer.into_inner().map_err(|e| e.into_error())?;
        summary
    };

    file.seek(SeekFrom::Start(0))?;
    let block_count = append_integrity(&mut *file, key)?;
    file.sync_all()?;

    Ok(MasterSummary {
        header_count: summary.header_count,
        header_region_size: summary.header_region_size,
        data_size: summary.data_size,
        block_count,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::fixtures;
    use crate::integrity::{locate_trailer, verify_integrity};

    #[test]
    fn scenario() {
        let tmpdir = TempDir::new().unwrap();
        let root = fixtures::write_scenario(tmpdir.path()).unwrap();
        let output = tmpdir.path().join("image.necc");

        let summary =
            master(&root, &output, b"sekrit", &ImportOptions::default()).expect("must master");

        // 1160 bytes of headers and tables, 4 bytes of data
        assert_eq!(1164, summary.payload_len());
        assert_eq!(2, summary.block_count);
        assert_eq!(
            summary.image_len(),
            std::fs::metadata(&output).unwrap().len()
        );

        let mut file = File::open(&output).unwrap();
        assert_eq!(1164, locate_trailer(&mut file).unwrap().payload_len);
        assert!(verify_integrity(&mut file, b"sekrit").unwrap());

        let image = std::fs::read(&output).unwrap();
        assert_eq!(fixtures::master_to_vec(&root), &image[..1164]);
    }

    #[test]
    fn failure_removes_output() {
        let tmpdir = TempDir::new().unwrap();
        let output = tmpdir.path().join("image.necc");

        let err = master(
            tmpdir.path().join("missing"),
            &output,
            b"sekrit",
            &ImportOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(err, Error::Import(_)), "{err:?}");
        assert!(!output.exists());
    }

    #[test]
    fn short_key() {
        let tmpdir = TempDir::new().unwrap();
        let root = fixtures::write_scenario(tmpdir.path()).unwrap();
        let output = tmpdir.path().join("image.necc");

        let err = master(&root, &output, b"abc", &ImportOptions::default()).expect_err("must fail");
        assert!(matches!(err, Error::InvalidKey), "{err:?}");
        assert!(!output.exists());
    }
}
