use std::env::var;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log output should go.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Append-only log file, created together with its parent directory.
    pub file: Option<PathBuf>,
    /// Write to stdout. Disabled while a full-screen dashboard owns the terminal.
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { file: None, console: true }
    }
}

/// Initialize tracing with the default `info` level.
///
/// The returned guard flushes the file writer when dropped, so the caller
/// has to keep it alive for as long as it logs.
pub fn init(options: LogOptions) -> io::Result<Option<WorkerGuard>> {
    initialize_tracing(LevelFilter::INFO, options)
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

fn initialize_tracing(level: LevelFilter, options: LogOptions) -> io::Result<Option<WorkerGuard>> {
    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if options.console {
        let console = match log_format.as_str() {
            "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter(level)).boxed(),
            _ => tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(env_filter(level))
                .boxed(),
        };
        layers.push(console);
    }

    let mut guard = None;
    if let Some(path) = options.file {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;

        let appender = tracing_appender::rolling::never(&directory, file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let file_layer = match log_format.as_str() {
            "json" => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter(level))
                .boxed(),
            _ => tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter(level))
                .boxed(),
        };
        layers.push(file_layer);
    }

    tracing_subscriber::registry().with(layers).try_init().map_err(io::Error::other)?;

    Ok(guard)
}
