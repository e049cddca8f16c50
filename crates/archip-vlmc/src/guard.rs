//! Host-wide exclusive section
//!
//! Mapping operations may run from several command invocations at once, so
//! the section is serialized with an advisory `flock` on a shared lock
//! file rather than an in-process mutex. The lock goes away with the file
//! descriptor, on every exit path and even if the process dies.

use crate::error::{VlmcError, VlmcResult};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Lock file shared by every process on the host
#[derive(Clone, Debug)]
pub struct ExclusiveLock {
    path: PathBuf,
}

impl ExclusiveLock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held
    pub fn acquire(&self) -> VlmcResult<ExclusiveGuard> {
        let lock_err = |source: std::io::Error| VlmcError::Lock {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(lock_err)?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_err(errno.into()))?;
        trace!("acquired {}", self.path.display());
        Ok(ExclusiveGuard { _lock: lock })
    }

    /// Run `f` while holding the lock
    pub fn run<T>(&self, f: impl FnOnce() -> VlmcResult<T>) -> VlmcResult<T> {
        let _guard = self.acquire()?;
        f()
    }
}

/// Held lock; released on drop
#[must_use = "the lock is released when the guard is dropped"]
pub struct ExclusiveGuard {
    _lock: Flock<File>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_run_releases_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ExclusiveLock::new(dir.path().join("locks/archipelago.lock"));

        let result: VlmcResult<()> = lock.run(|| Err(VlmcError::driver("tap-ctl failed")));
        assert!(matches!(result, Err(VlmcError::Driver(_))));

        // Would block forever if the failed section kept the lock
        assert_eq!(lock.run(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_sections_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archipelago.lock");
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                // Separate lock objects, as separate processes would have
                let lock = ExclusiveLock::new(&path);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..5 {
                        lock.run(|| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
