use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to open capture {target}: {source}")]
    CaptureOpen {
        target: String,
        #[source]
        source: pcap::Error,
    },
    #[error("capture failed: {0}")]
    Capture(#[from] pcap::Error),
    #[error("failed to open command log {}: {source}", path.display())]
    CommandLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("shard worker {0} panicked")]
    WorkerPanicked(usize),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
