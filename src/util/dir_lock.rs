use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{remove_file, OpenOptions};
use tokio::time::sleep;
use tracing::warn;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);
const STALE_AFTER: Duration = Duration::from_secs(60);

/// Advisory lock on a directory, held as a `.lock` marker file so that
/// concurrent builds on the same machine do not write the same cache
/// directory at once. Dropped locks remove the marker.
///
/// A marker older than a minute is treated as left behind by a crashed
/// process and taken over.
pub struct DirLock {
    lock_file: PathBuf,
}

impl DirLock {
    pub async fn acquire(directory: &Path) -> anyhow::Result<DirLock> {
        let lock_file = directory.join(".lock");
        tokio::fs::create_dir_all(directory).await?;

        loop {
            match OpenOptions::new().create_new(true).write(true).open(&lock_file).await {
                Ok(_) => return Ok(DirLock { lock_file }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_file).await {
                        warn!("taking over stale lock {}", lock_file.display());
                        let _ = remove_file(&lock_file).await;
                        continue;
                    }
                    sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn is_stale(lock_file: &Path) -> bool {
    match tokio::fs::metadata(lock_file).await {
        Ok(metadata) => match metadata.modified().ok().and_then(|m| m.elapsed().ok()) {
            Some(age) => age > STALE_AFTER,
            None => false,
        },
        // already gone, the next create attempt decides
        Err(_) => false,
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_file) {
            warn!("failed to release lock {}: {}", self.lock_file.display(), e);
        }
    }
}
