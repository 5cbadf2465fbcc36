//! Logging setup shared by the three binaries: tracing with a level picked
//! by `-v`/`-q`, writing to stdout or appending to `--log-file`.

use crate::cli::CommonArgs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the global subscriber. Must be called once, before any events
/// are emitted.
pub fn init(common: &CommonArgs) -> io::Result<()> {
    let level = if common.verbose {
        Level::DEBUG
    } else if common.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let result = match &common.log_file {
        Some(path) => {
            let file = OpenOptions::new().append(true).create(true).open(path)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
