use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("Failed to open log file {path:?}: {source}")]
    LogFile {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Module {0} is not loaded")]
    NotLoaded(String),

    #[error("Refusing to read {length} bytes, the limit is {max}")]
    ReadTooLong { length: usize, max: usize },
}
