use clap::Parser;
use mimalloc::MiMalloc;
use tracing::info;
use wofs_cli::{args::Commands, Cli};
use wofs_erasure::Config;
use wofs_image::ImportOptions;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut tracing_builder = wofs_tracing::TracingBuilder::default().level(cli.log_level);
    if !cli.no_progress {
        tracing_builder = tracing_builder.enable_progressbar();
    }
    let handle = tracing_builder.build()?;
    let stdout = handle.get_stdout_writer();

    match cli.command {
        Commands::Master {
            path,
            output,
            key,
            include_hidden,
            no_ecc,
            data_shards,
            parity_shards,
            shard_size,
        } => {
            let options = ImportOptions {
                include_hidden,
                ..Default::default()
            };
            let config = Config {
                data_shards,
                parity_shards,
                shard_size,
            };

            wofs_cli::master(
                &path,
                &output,
                key.as_bytes(),
                &options,
                (!no_ecc).then_some(&config),
            )?;
            info!(output = ?output, "done");
        }
        Commands::Verify { image } => {
            let trailer = wofs_cli::verify(&image)?;
            info!(
                image = ?image.image,
                size = trailer.image_len(),
                blocks = trailer.block_count,
                "image is intact"
            );
        }
        Commands::Tree { image } => {
            let fs = wofs_cli::open_image(&image)?;
            wofs_cli::tree(&fs, stdout)?;
        }
        Commands::Stat { image, path } => {
            let fs = wofs_cli::open_image(&image)?;
            wofs_cli::stat(&fs, &path, stdout)?;
        }
        Commands::Ls { image, path } => {
            let fs = wofs_cli::open_image(&image)?;
            wofs_cli::ls(&fs, &path, stdout)?;
        }
        Commands::Cat {
            image,
            path,
            offset,
            length,
        } => {
            let fs = wofs_cli::open_image(&image)?;
            // Raw contents bypass the progress bar writer.
            wofs_cli::cat(&fs, &path, offset, length, std::io::stdout().lock())?;
        }
        #[cfg(feature = "fuse")]
        Commands::Mount {
            image,
            dest,
            threads,
            allow_other,
        } => {
            wofs_cli::mount(&image, &dest, threads, allow_other)?;
        }
    }

    Ok(())
}
