//! Tracing initialisation for the verifier binary.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored since
//! the global subscriber can only be set once per process.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initialise the global tracing subscriber.
///
/// * `verbose` - default to `debug` instead of `info` when `RUST_LOG` is unset.
/// * `json` - emit newline-delimited JSON on stderr.
/// * `log_file` - also append plain-text logs to this file, creating parent
///   directories. If the file cannot be opened logging continues on stderr only.
pub fn init_tracing(verbose: bool, json: bool, log_file: Option<&Path>) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let stderr_layer = if json {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let file_layer = log_file.and_then(|path| match open_log_file(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        ),
        Err(e) => {
            eprintln!("Failed to log to {}: {}; using stderr only", path.display(), e);
            None
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .ok();
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
