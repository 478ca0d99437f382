use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam::channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AnalyzerError, Result};

const RECORD_QUEUE_CAPACITY: usize = 65_536;

/// One observed request, written as a single JSON line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandRecord {
    pub full_cmd: String,
    pub receive_time: i64,
    pub src: String,
    pub dst: String,
}

/// `<tmp>/<monitor start>_<port>.txt`
pub fn default_log_path(monitor_start_us: i64, port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("{monitor_start_us}_{port}.txt"))
}

/// Line-delimited command log fed by every shard through one writer thread
pub struct CommandLog {
    path: PathBuf,
    sender: Sender<CommandRecord>,
    writer: thread::JoinHandle<u64>,
}

impl CommandLog {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .map_err(|source| AnalyzerError::CommandLog {
                path: path.clone(),
                source,
            })?;

        let (sender, receiver) = bounded(RECORD_QUEUE_CAPACITY);
        let writer_path = path.clone();
        let writer = thread::Builder::new()
            .name("command-log".to_string())
            .spawn(move || write_records(BufWriter::new(file), receiver, &writer_path))
            .map_err(|source| AnalyzerError::CommandLog {
                path: path.clone(),
                source,
            })?;

        info!("Writing observed commands to {}", path.display());
        Ok(Self {
            path,
            sender,
            writer,
        })
    }

    pub fn recorder(&self) -> CommandRecorder {
        CommandRecorder {
            sender: self.sender.clone(),
        }
    }

    /// Close the log once every recorder is gone and return the number of records written
    pub fn finish(self) -> u64 {
        drop(self.sender);
        match self.writer.join() {
            Ok(written) => {
                info!("Command log {} complete: {} records", self.path.display(), written);
                written
            }
            Err(e) => {
                warn!("Command log writer for {} panicked: {:?}", self.path.display(), e);
                0
            }
        }
    }
}

/// Cheap handle a shard worker uses to submit records
#[derive(Clone)]
pub struct CommandRecorder {
    sender: Sender<CommandRecord>,
}

impl CommandRecorder {
    pub fn record(&self, record: CommandRecord) {
        if self.sender.send(record).is_err() {
            warn!("Command log writer is gone, dropping record");
        }
    }
}

fn write_records<W: Write>(mut out: W, records: Receiver<CommandRecord>, path: &Path) -> u64 {
    let mut written = 0u64;

    for record in records.iter() {
        match write_record(&mut out, &record) {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to write command record to {}: {}", path.display(), e),
        }
    }

    if let Err(e) = out.flush() {
        warn!("Failed to flush command log {}: {}", path.display(), e);
    }
    written
}

/// A record goes out in a single write so a failure never leaves half a line behind
fn write_record<W: Write>(out: &mut W, record: &CommandRecord) -> io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line)
}
