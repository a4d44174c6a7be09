// fs_atomic.rs - Atomic writes and bounded-retry reads.
//
// Every file the engine produces is written to a named temp file in the
// destination directory and then persisted (renamed) over the target.
// Rename within one directory is atomic, so readers see either the old
// content or the new content, never a torn write. A temp file that is
// never persisted is removed when it drops.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::error::PolicyError;

/// Write `content` to `path` atomically, creating parent directories.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), PolicyError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PolicyError::io(parent, e))?;

    // Same directory as the target, so persist is a plain rename(2).
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| PolicyError::io(parent, e))?;
    tmp.write_all(content).map_err(|e| PolicyError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| PolicyError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PolicyError::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| PolicyError::io(path, e.error))?;
    Ok(())
}

/// Read a file as UTF-8, retrying up to `attempts` times with `backoff`
/// between tries. Returns the last error once attempts run out.
pub fn read_with_retry(path: &Path, attempts: u32, backoff: Duration) -> io::Result<String> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match fs::read_to_string(path) {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "policy read failed");
                last_err = Some(e);
                if attempt < attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no read attempted")))
}
