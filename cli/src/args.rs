use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use wofs_image::integrity::MIN_KEY_LEN;

/// Masters directories into self-verifying, error-correcting images, and
/// serves reads from them.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, default_value_t=Level::INFO)]
    pub log_level: Level,

    /// Don't draw progress bars.
    #[arg(long)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Masters a directory into an image.
    ///
    /// Writes the integrity-protected image to `<OUTPUT>.necc`, and the
    /// erasure-protected image to `<OUTPUT>`.
    Master {
        /// The directory to master.
        #[arg(long)]
        path: PathBuf,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        #[arg(long, env = "WOFS_KEY", hide_env_values = true, value_parser = parse_key)]
        key: String,

        /// Also master entries whose name starts with a `.`.
        #[arg(long)]
        include_hidden: bool,

        /// Only write the integrity-protected image, straight to `<OUTPUT>`.
        #[arg(long)]
        no_ecc: bool,

        #[arg(long, default_value_t = 8)]
        data_shards: u8,

        #[arg(long, default_value_t = 2)]
        parity_shards: u8,

        /// Bytes per shard.
        #[arg(long, default_value_t = 4096)]
        shard_size: u32,
    },
    /// Recovers and verifies an image, without reading from it.
    Verify {
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Lists every entry of an image.
    Tree {
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Shows the attributes of an entry.
    Stat {
        #[command(flatten)]
        image: ImageArgs,

        /// Absolute path, like `/root/a.txt`. `/` is the directory holding
        /// the mastered root.
        path: String,
    },
    /// Lists a directory.
    Ls {
        #[command(flatten)]
        image: ImageArgs,

        #[arg(default_value = "/")]
        path: String,
    },
    /// Writes (part of) a file to stdout.
    Cat {
        #[command(flatten)]
        image: ImageArgs,

        path: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to read. Defaults to the rest of the file.
        #[arg(long)]
        length: Option<u64>,
    },
    /// Mounts an image read-only at the given mountpoint, until it is
    /// unmounted again (`fusermount -u`).
    #[cfg(feature = "fuse")]
    Mount {
        #[command(flatten)]
        image: ImageArgs,

        #[clap(value_name = "PATH")]
        dest: PathBuf,

        /// Number of threads serving requests.
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Let users other than the one mounting access the mount.
        #[arg(long, env = "WOFS_ALLOW_OTHER")]
        allow_other: bool,
    },
}

/// How to open an image for reading.
#[derive(clap::Args, Clone, Debug)]
pub struct ImageArgs {
    #[arg(long, value_name = "FILE")]
    pub image: PathBuf,

    #[arg(long, env = "WOFS_KEY", hide_env_values = true, value_parser = parse_key)]
    pub key: String,

    /// The image has no erasure layer, it was written by `master --no-ecc`
    /// or is a `.necc` file.
    #[arg(long)]
    pub necc: bool,

    /// Carry on with a best-effort recovery if some stripe is beyond
    /// repair.
    #[arg(long)]
    pub allow_degraded: bool,

    /// Serve reads even if the integrity check fails.
    #[arg(long)]
    pub ignore_integrity: bool,
}

fn parse_key(key: &str) -> Result<String, String> {
    if key.len() < MIN_KEY_LEN {
        return Err(format!("must be at least {MIN_KEY_LEN} bytes long"));
    }
    Ok(key.to_owned())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[test]
    fn master_defaults() {
        let cli = Cli::try_parse_from([
            "wofs", "master", "--path", "src", "--output", "out.img", "--key", "sekrit",
        ])
        .expect("must parse");

        match cli.command {
            Commands::Master {
                key,
                include_hidden,
                no_ecc,
                data_shards,
                parity_shards,
                shard_size,
                ..
            } => {
                assert_eq!("sekrit", key);
                assert!(!include_hidden);
                assert!(!no_ecc);
                assert_eq!((8, 2, 4096), (data_shards, parity_shards, shard_size));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[rstest]
    #[case::empty("")]
    #[case::three("abc")]
    fn short_key(#[case] key: &str) {
        let err = Cli::try_parse_from(["wofs", "verify", "--image", "x", "--key", key])
            .expect_err("must fail");
        assert_eq!(clap::error::ErrorKind::ValueValidation, err.kind());
    }

    #[cfg(feature = "fuse")]
    #[test]
    fn mount() {
        let cli = Cli::try_parse_from([
            "wofs", "mount", "--image", "x.img", "--key", "abcd", "/mnt/x",
        ])
        .expect("must parse");

        match cli.command {
            Commands::Mount {
                image,
                dest,
                threads,
                allow_other,
            } => {
                assert_eq!(PathBuf::from("x.img"), image.image);
                assert_eq!(PathBuf::from("/mnt/x"), dest);
                assert_eq!(4, threads);
                assert!(!allow_other);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cat() {
        let cli = Cli::try_parse_from([
            "wofs", "cat", "--image", "x", "--key", "abcd", "--necc", "/root/a.txt", "--offset",
            "1",
        ])
        .expect("must parse");

        match cli.command {
            Commands::Cat {
                image,
                path,
                offset,
                length,
            } => {
                assert!(image.necc);
                assert!(!image.allow_degraded);
                assert_eq!("/root/a.txt", path);
                assert_eq!(1, offset);
                assert_eq!(None, length);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
