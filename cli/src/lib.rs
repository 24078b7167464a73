use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bstr::ByteSlice;
use tracing::{info, instrument, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use wofs_erasure::{Config, RecoveryMode, RecoveryReport};
use wofs_image::integrity::{locate_trailer, verify_integrity, Trailer};
use wofs_image::{ImageFs, ImageReader, ImportOptions, Kind};

pub mod args;
mod errors;

pub use args::{Cli, Commands, ImageArgs};
pub use errors::Error;

/// The image is served from the file holding it, shared between readers.
pub type Fs = ImageFs<Arc<File>>;

/// Appends `ext` to the file name of `path`.
pub fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Masters `path` into `<output>.necc`, and unless `config` is `None`,
/// protects that into `<output>`.
#[instrument(skip_all, fields(path = ?path, output = ?output, indicatif.pb_show=1), err)]
pub fn master(
    path: &Path,
    output: &Path,
    key: &[u8],
    options: &ImportOptions,
    config: Option<&Config>,
) -> Result<(), Error> {
    let span = Span::current();
    span.pb_set_style(&wofs_tracing::PB_SPINNER_STYLE);
    span.pb_set_message("Mastering…");
    span.pb_start();

    let Some(config) = config else {
        wofs_image::master(path, output, key, options)?;
        return Ok(());
    };

    let necc = with_extension(output, "necc");
    wofs_image::master(path, &necc, key, options)?;

    span.pb_set_message("Adding error correction…");
    let header = wofs_erasure::protect_file(&necc, output, config)?;
    info!(
        stripes = header.stripe_count(),
        size = header.protected_len(),
        "protected image"
    );

    Ok(())
}

/// Prepares an image for reading: recovers it from its erasure layer into
/// `<image>.rec` (unless it has none), verifies its integrity, and opens
/// it.
///
/// Damage the erasure layer cannot repair, and integrity failures, stop
/// here unless overridden in `args`. A malformed image always does.
#[instrument(skip_all, fields(image = ?args.image), err)]
pub fn open_image(args: &ImageArgs) -> Result<Fs, Error> {
    let path = recover(args)?;
    let mut file = File::open(&path)?;
    let trailer = locate_trailer(&mut file)?;

    if !verify_integrity(&mut file, args.key.as_bytes())? {
        if !args.ignore_integrity {
            return Err(Error::Integrity(path));
        }
        warn!(path = ?path, "integrity verification failed, serving unverified content");
    }

    Ok(ImageFs::new(ImageReader::new(Arc::new(file), trailer.payload_len)))
}

/// Recovers and verifies an image without opening it for reads.
///
/// A failed integrity check is always an error here, `ignore_integrity`
/// only applies to serving reads.
#[instrument(skip_all, fields(image = ?args.image), err)]
pub fn verify(args: &ImageArgs) -> Result<Trailer, Error> {
    let path = recover(args)?;
    let mut file = File::open(&path)?;
    let trailer = locate_trailer(&mut file)?;

    if !verify_integrity(&mut file, args.key.as_bytes())? {
        return Err(Error::Integrity(path));
    }
    Ok(trailer)
}

/// Returns the path of the integrity-protected image, recovering it into
/// `<image>.rec` first unless it has no erasure layer.
fn recover(args: &ImageArgs) -> Result<PathBuf, Error> {
    if args.necc {
        return Ok(args.image.clone());
    }

    let recovered = with_extension(&args.image, "rec");
    let mode = if args.allow_degraded {
        RecoveryMode::BestEffort
    } else {
        RecoveryMode::Strict
    };
    let report = wofs_erasure::recover_file(&args.image, &recovered, mode)?;
    log_report(&report);
    Ok(recovered)
}

fn log_report(report: &RecoveryReport) {
    if report.is_degraded() {
        warn!(
            unrecoverable_stripes = report.unrecoverable_stripes,
            "image could only be recovered partially"
        );
    } else if !report.is_clean() {
        info!(
            corrupt_shards = report.corrupt_shards,
            repaired_shards = report.repaired_shards,
            used_header_copy = report.used_header_copy,
            "repaired image"
        );
    }
}

/// Mounts the image read-only at `dest`, and serves it until it is
/// unmounted.
#[cfg(feature = "fuse")]
#[instrument(skip_all, fields(image = ?args.image, dest = ?dest), err)]
pub fn mount(args: &ImageArgs, dest: &Path, threads: usize, allow_other: bool) -> Result<(), Error> {
    let fs = open_image(args)?;
    let fuse_daemon = wofs_image::fs::fuse::FuseDaemon::new(fs, dest, threads, allow_other)?;
    info!(dest = ?dest, "mounted image");

    fuse_daemon.wait();
    Ok(())
}

/// Writes one line per entry: kind, length, and path.
pub fn tree<W: Write>(fs: &Fs, mut out: W) -> Result<(), Error> {
    for (path, record) in fs.reader().walk()? {
        let kind = match record.metadata.kind {
            Kind::Directory => 'd',
            Kind::File => 'f',
        };
        writeln!(out, "{kind} {:>12} {path}", record.metadata.length)?;
    }
    Ok(())
}

pub fn stat<W: Write>(fs: &Fs, path: &str, mut out: W) -> Result<(), Error> {
    let attrs = fs.attributes(path)?;
    writeln!(out, "kind:    {:?}", attrs.kind)?;
    writeln!(out, "mode:    {:o}", attrs.mode)?;
    writeln!(out, "links:   {}", attrs.nlink)?;
    writeln!(out, "size:    {}", attrs.size)?;
    writeln!(out, "blocks:  {}", attrs.blocks)?;
    writeln!(out, "mtime:   {}", attrs.mtime)?;
    Ok(())
}

pub fn ls<W: Write>(fs: &Fs, path: &str, mut out: W) -> Result<(), Error> {
    for name in fs.list(path)? {
        writeln!(out, "{}", name.as_bstr())?;
    }
    Ok(())
}

/// Copies `length` bytes (or the rest of the file) from `offset` on.
pub fn cat<W: Write>(
    fs: &Fs,
    path: &str,
    offset: u64,
    length: Option<u64>,
    mut out: W,
) -> Result<(), Error> {
    let record = fs.open(path, libc::O_RDONLY)?;
    let end = match length {
        Some(length) => offset.saturating_add(length).min(record.metadata.length),
        None => record.metadata.length,
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut pos = offset;
    while pos < end {
        let want = (end - pos).min(buf.len() as u64) as usize;
        let n = fs.read(path, pos, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        pos += n as u64;
    }
    out.flush()?;
    Ok(())
}
