//! Log and progress bar setup shared by the wofs binaries.
//!
//! Log lines go to stderr. Spans carrying an `indicatif.pb_show` field
//! additionally get a progress bar, if enabled.

use indicatif::ProgressStyle;
use lazy_static::lazy_static;
use tracing::Level;
use tracing_indicatif::{filter::IndicatifFilter, writer, IndicatifLayer, IndicatifWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    /// Style for long-running steps, like mastering or recovering an image.
    pub static ref PB_SPINNER_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{spinner} {wide_msg} ({elapsed}) {pos:>7}/{len:7}"
    )
    .expect("invalid progress template");
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid RUST_LOG: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
}

/// Returned by [TracingBuilder::build], once the global subscriber is set.
#[derive(Clone)]
pub struct TracingHandle {
    stdout: IndicatifWriter<writer::Stdout>,
}

impl TracingHandle {
    /// A stdout writer that suspends progress bars while writing, so
    /// command output and bars don't interleave.
    pub fn get_stdout_writer(&self) -> IndicatifWriter<writer::Stdout> {
        // Cheap, the writer is an `Arc` inside.
        self.stdout.clone()
    }
}

pub struct TracingBuilder {
    level: Level,
    progress_bar: bool,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder {
            level: Level::INFO,
            progress_bar: false,
        }
    }
}

impl TracingBuilder {
    /// Lowest level that is logged, unless `RUST_LOG` says otherwise.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Draw progress bars. Off by default.
    pub fn enable_progressbar(mut self) -> TracingBuilder {
        self.progress_bar = true;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, Error> {
        Ok(EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env()?)
    }

    /// Installs the global subscriber: an [EnvFilter], a compact fmt layer
    /// writing to stderr, and the progress bar layer if enabled.
    pub fn build(self) -> Result<TracingHandle, Error> {
        let indicatif_layer = IndicatifLayer::new().with_progress_style(PB_SPINNER_STYLE.clone());
        let handle = TracingHandle {
            stdout: indicatif_layer.get_stdout_writer(),
        };

        let fmt_layer = tracing_subscriber::fmt::Layer::new()
            .with_writer(indicatif_layer.get_stderr_writer())
            .compact();
        let progress_layer = self
            .progress_bar
            .then(|| indicatif_layer.with_filter(IndicatifFilter::new(false)));

        tracing_subscriber::registry()
            .with(self.env_filter()?)
            .with(fmt_layer)
            .with(progress_layer)
            .try_init()?;

        Ok(handle)
    }
}
