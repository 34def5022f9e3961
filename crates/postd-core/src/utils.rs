use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::{errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for responses/logs).
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339()
}

/// `chrono` view of a std duration (saturating for absurd values).
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

// ============== Atomic Writes ==============

/// Atomically write `data` to `path` using a tempfile in the same directory,
/// so readers never observe a partially written state file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// ============== Cross-process Lock ==============

#[derive(Clone, Copy, Debug)]
pub struct LockOptions {
    /// How long to wait for a held lock before giving up.
    pub wait: Duration,
    /// A lock file older than this is treated as abandoned.
    pub stale_after: Duration,
    pub poll: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(90),
            stale_after: Duration::from_secs(120),
            poll: Duration::from_millis(50),
        }
    }
}

/// Exclusive lock file; removed on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub async fn acquire(path: PathBuf, opts: LockOptions) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + opts.wait;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    let _ = writeln!(f, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path, opts.stale_after) && reclaim(&path, opts.stale_after)? {
                        tracing::warn!(lock = %path.display(), "removed stale state lock");
                        continue;
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Lock(format!(
                    "timed out after {:?} waiting for {}",
                    opts.wait,
                    path.display()
                )));
            }
            tokio::time::sleep(opts.poll).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Move a stale lock aside and delete it. The move is atomic, so of several
/// waiters only one takes the file; if what it took turns out to be a fresh
/// lock (another waiter already replaced the stale one) it is put back.
fn reclaim(path: &Path, stale_after: Duration) -> Result<bool> {
    let aside = aside_path(path);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::Io(e)),
    }

    if is_stale(&aside, stale_after) {
        fs::remove_file(&aside)?;
        return Ok(true);
    }

    // hard_link never replaces an existing file.
    if let Err(e) = fs::hard_link(&aside, path) {
        tracing::warn!(lock = %path.display(), error = %e, "could not restore live state lock");
    }
    let _ = fs::remove_file(&aside);
    Ok(false)
}

fn aside_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(
        ".stale.{}.{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(name)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(md) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = md.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[tokio::test]
    async fn second_lock_times_out_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");
        let opts = LockOptions {
            wait: Duration::from_millis(120),
            stale_after: Duration::from_secs(60),
            poll: Duration::from_millis(10),
        };

        let first = FileLock::acquire(path.clone(), opts).await.unwrap();
        let second = FileLock::acquire(path.clone(), opts).await;
        assert!(matches!(second, Err(Error::Lock(_))));

        drop(first);
        assert!(!path.exists());
        let third = FileLock::acquire(path.clone(), opts).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");
        fs::write(&path, "999999").unwrap();

        let opts = LockOptions {
            wait: Duration::from_millis(200),
            stale_after: Duration::ZERO,
            poll: Duration::from_millis(10),
        };
        // With a zero staleness threshold any existing file is abandoned.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let lock = FileLock::acquire(path.clone(), opts).await;
        assert!(lock.is_ok());
    }

    #[test]
    fn reclaim_puts_back_a_lock_that_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");
        fs::write(&path, "4242").unwrap();

        assert!(!reclaim(&path, Duration::from_secs(60)).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn only_one_waiter_takes_over_a_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");
        fs::write(&path, "999999").unwrap();
        std::thread::sleep(Duration::from_millis(150));

        let opts = LockOptions {
            wait: Duration::from_millis(40),
            stale_after: Duration::from_millis(100),
            poll: Duration::from_millis(5),
        };
        let a = tokio::spawn(FileLock::acquire(path.clone(), opts));
        let b = tokio::spawn(FileLock::acquire(path.clone(), opts));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(path.exists());
    }
}
