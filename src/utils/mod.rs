pub mod elf;

use std::io::ErrorKind;
use std::path::Path;
use tokio::io;

/// `Ok(false)` only for a genuinely absent path; other metadata failures propagate.
pub async fn path_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn is_file(path: impl AsRef<Path>) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(md) => Ok(md.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
