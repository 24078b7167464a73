//! Reed-Solomon protection for whole files.
//!
//! [protect] splits a file into stripes of `data_shards` shards of
//! `shard_size` bytes and adds `parity_shards` parity shards to each. Every
//! shard is stored with its BLAKE3 digest, so shards that got damaged are
//! found and treated as erasures by [recover].

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, instrument, warn};

mod errors;
pub mod layout;

pub use errors::Error;
use layout::{Header, DIGEST_LEN, HEADER_LEN};

/// Shape of the stripes a file is cut into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub data_shards: u8,
    pub parity_shards: u8,
    pub shard_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_shards: 8,
            parity_shards: 2,
            shard_size: 4096,
        }
    }
}

/// What to do with a stripe that has more damaged shards than parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Fail.
    #[default]
    Strict,
    /// Write out whatever the stripe's data shards hold, and carry on.
    BestEffort,
}

/// Outcome of [recover].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub payload_len: u64,
    pub stripes: u64,
    /// Shards whose digest did not match, or that were cut off.
    pub corrupt_shards: u64,
    /// Data shards that were rebuilt from the others.
    pub repaired_shards: u64,
    /// Stripes written out as-is in [RecoveryMode::BestEffort].
    pub unrecoverable_stripes: u64,
    /// Whether the leading header was damaged and its copy at the end
    /// had to be used.
    pub used_header_copy: bool,
}

impl RecoveryReport {
    /// True if the output may differ from what was protected.
    pub fn is_degraded(&self) -> bool {
        self.unrecoverable_stripes > 0
    }

    /// True if nothing at all had to be repaired.
    pub fn is_clean(&self) -> bool {
        self.corrupt_shards == 0 && !self.used_header_copy
    }
}

/// Reads `payload_len` bytes from `input` and writes them, protected, to
/// `output`.
#[instrument(skip(input, output), err)]
pub fn protect<R, W>(
    mut input: R,
    payload_len: u64,
    mut output: W,
    config: &Config,
) -> Result<Header, Error>
where
    R: Read,
    W: Write,
{
    config.validate()?;
    let rs = ReedSolomon::new(config.data_shards.into(), config.parity_shards.into())?;

    let header = Header {
        payload_len,
        config: *config,
    };
    let header_buf = header.encode();
    output.write_all(&header_buf)?;

    let shard_size = config.shard_size as usize;
    let mut remaining = payload_len;
    for _ in 0..header.stripe_count() {
        let mut shards = vec![vec![0u8; shard_size]; config.total_shards().into()];
        for shard in shards.iter_mut().take(config.data_shards.into()) {
            let n = remaining.min(shard_size as u64) as usize;
            input.read_exact(&mut shard[..n])?;
            remaining -= n as u64;
        }

        rs.encode(&mut shards)?;

        for shard in &shards {
            output.write_all(blake3::hash(shard).as_bytes())?;
            output.write_all(shard)?;
        }
    }

    output.write_all(&header_buf)?;
    output.flush()?;

    debug!(stripes = header.stripe_count(), "protected");
    Ok(header)
}

/// Reconstructs the payload protected in `input`, and writes it to
/// `output`.
#[instrument(skip(input, output), err)]
pub fn recover<R, W>(mut input: R, mut output: W, mode: RecoveryMode) -> Result<RecoveryReport, Error>
where
    R: Read + Seek,
    W: Write,
{
    let file_len = input.seek(SeekFrom::End(0))?;
    let (header, used_header_copy) = read_header(&mut input, file_len)?;
    if used_header_copy {
        warn!("leading header is damaged, using the copy at the end");
    }

    let config = header.config;
    let rs = ReedSolomon::new(config.data_shards.into(), config.parity_shards.into())?;
    let parity = usize::from(config.parity_shards);

    let mut report = RecoveryReport {
        payload_len: header.payload_len,
        stripes: header.stripe_count(),
        used_header_copy,
        ..Default::default()
    };

    let mut record = vec![0u8; header.record_len()];
    let mut remaining = header.payload_len;

    input.seek(SeekFrom::Start(HEADER_LEN as u64))?;
    for stripe in 0..header.stripe_count() {
        // The raw bytes of every shard, and which of them can be trusted.
        let mut raw = Vec::with_capacity(config.total_shards().into());
        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(raw.capacity());

        for _ in 0..config.total_shards() {
            let complete = read_full(&mut input, &mut record)? == record.len();
            let (digest, shard) = record.split_at(DIGEST_LEN);
            let intact = complete && blake3::hash(shard).as_bytes() == digest;

            raw.push(shard.to_vec());
            shards.push(intact.then(|| shard.to_vec()));
        }

        let corrupt: Vec<usize> = (0..shards.len()).filter(|i| shards[*i].is_none()).collect();
        report.corrupt_shards += corrupt.len() as u64;

        let data: Vec<Vec<u8>> = if corrupt.is_empty() {
            shards.into_iter().flatten().collect()
        } else if corrupt.len() <= parity {
            rs.reconstruct_data(&mut shards)?;
            report.repaired_shards += corrupt
                .iter()
                .filter(|i| **i < usize::from(config.data_shards))
                .count() as u64;
            debug!(stripe, corrupt = corrupt.len(), "repaired stripe");
            shards.into_iter().map(Option::unwrap_or_default).collect()
        } else {
            match mode {
                RecoveryMode::Strict => {
                    return Err(Error::TooManyCorruptShards {
                        stripe,
                        corrupt: corrupt.len(),
                        parity,
                    })
                }
                RecoveryMode::BestEffort => {
                    warn!(stripe, corrupt = corrupt.len(), "stripe is beyond repair");
                    report.unrecoverable_stripes += 1;
                    raw
                }
            }
        };

        for shard in data.iter().take(config.data_shards.into()) {
            let n = remaining.min(shard.len() as u64) as usize;
            output.write_all(&shard[..n])?;
            remaining -= n as u64;
        }
    }

    output.flush()?;
    Ok(report)
}

/// Returns the header, and whether it came from the copy at the end.
fn read_header<R: Read + Seek>(input: &mut R, file_len: u64) -> Result<(Header, bool), Error> {
    let mut buf = [0u8; HEADER_LEN];

    input.seek(SeekFrom::Start(0))?;
    if read_full(input, &mut buf)? == HEADER_LEN {
        if let Some(header) = Header::decode(&buf) {
            return Ok((header, false));
        }
    }

    if file_len >= HEADER_LEN as u64 {
        input.seek(SeekFrom::Start(file_len - HEADER_LEN as u64))?;
        input.read_exact(&mut buf)?;
        if let Some(header) = Header::decode(&buf) {
            return Ok((header, true));
        }
    }

    Err(Error::BadHeader)
}

/// Like [Read::read_exact], but a short read zero-fills the rest of `buf`
/// instead of failing. Returns the number of bytes actually read.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf[filled..].fill(0);
    Ok(filled)
}

/// Protects the file at `input` into a new file at `output`. A partial
/// output is removed on failure.
pub fn protect_file(input: &Path, output: &Path, config: &Config) -> Result<Header, Error> {
    let source = File::open(input)?;
    let payload_len = source.metadata()?.len();

    with_output(output, |file| {
        protect(BufReader::new(source), payload_len, BufWriter::new(file), config)
    })
}

/// Recovers the file at `input` into a new file at `output`. A partial
/// output is removed on failure.
pub fn recover_file(input: &Path, output: &Path, mode: RecoveryMode) -> Result<RecoveryReport, Error> {
    let source = File::open(input)?;

    with_output(output, |file| {
        recover(BufReader::new(source), BufWriter::new(file), mode)
    })
}

fn with_output<T>(
    output: &Path,
    f: impl FnOnce(&mut File) -> Result<T, Error>,
) -> Result<T, Error> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)?;

    let result = f(&mut file).and_then(|v| {
        file.sync_all()?;
        Ok(v)
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => {
            drop(file);
            if let Err(rm_err) = std::fs::remove_file(output) {
                warn!(err = %rm_err, output = ?output, "unable to remove partial output");
            }
            Err(e)
        }
    }
}
