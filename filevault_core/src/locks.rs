//! Vault locking.
//!
//! [`RootLock`] keeps other processes out of a vault root for as long as a
//! handle is open. Inside one process, [`HashLocks`] stripes are keyed by
//! the leading hash byte, which is also the payload shard directory. Holding
//! a stripe therefore serializes every payload file create/remove in that
//! shard, including empty shard cleanup.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const STRIPES: usize = 256;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock on a vault's lock file, released on drop.
#[derive(Debug)]
pub(crate) struct RootLock {
    _file: File,
}

impl RootLock {
    /// Lock the file at `path`, polling until `timeout` has passed.
    pub(crate) fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!(path = %path.display(), "acquired vault lock");
                    return Ok(Self { _file: file });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(Error::VaultLocked {
                            path: path.to_path_buf(),
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct HashLocks {
    stripes: Vec<Mutex<()>>,
}

impl HashLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn lock(&self, hash: &ContentHash) -> MutexGuard<'_, ()> {
        self.stripes[Self::stripe(hash)].lock()
    }

    fn stripe(hash: &ContentHash) -> usize {
        hash.as_bytes()[0] as usize
    }
}

impl Default for HashLocks {
    fn default() -> Self {
        Self::new()
    }
}
