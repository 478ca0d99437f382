use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Capture files to analyze: `path` itself, or every `*.<extension>` directly
/// inside it, sorted by name
pub fn capture_files(path: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let candidate = entry.path();
        let matches = candidate
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches && entry.file_type()?.is_file() {
            files.push(candidate);
        } else {
            debug!("Skipping {}", candidate.display());
        }
    }
    files.sort();
    Ok(files)
}
