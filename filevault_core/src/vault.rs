//! Vault management.
//!
//! A vault root holds:
//! - `config`: key=value settings
//! - `objects/{algorithm}/`: payload object files
//! - `records.json`: snapshot of the record store
//! - `lock`: held exclusively by the process that has the vault open

use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::locks::{HashLocks, RootLock};
use crate::payload::PayloadStore;
use crate::record_store::{MemoryRecordStore, RecordStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const CONFIG_FILE: &str = "config";
const RECORDS_FILE: &str = "records.json";
const LOCK_FILE: &str = "lock";

/// How long `init` and `open` wait for another process to close the vault.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A content-addressed, deduplicating file vault.
///
/// Metadata goes through the record store `S`; payload bytes live in object
/// files under the vault root.
#[derive(Debug)]
pub struct Vault<S: RecordStore = MemoryRecordStore> {
    root: PathBuf,
    config: VaultConfig,
    pub(crate) records: S,
    pub(crate) payloads: PayloadStore,
    pub(crate) locks: HashLocks,
    // Dropped after `records` so deferred changes are flushed under the lock
    root_lock: Option<RootLock>,
}

impl Vault<MemoryRecordStore> {
    /// Initialize a new vault at the given path.
    ///
    /// Fails if the directory already holds a vault.
    pub fn init<P: AsRef<Path>>(root: P, config: VaultConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(Error::invalid_store(&root, "vault already initialized"));
        }

        fs::create_dir_all(&root)?;
        let root_lock = RootLock::acquire(&root.join(LOCK_FILE), DEFAULT_LOCK_TIMEOUT)?;
        // A racing init may have finished while we waited
        if config_path.exists() {
            return Err(Error::invalid_store(&root, "vault already initialized"));
        }
        fs::write(&config_path, config.render())?;

        let records = MemoryRecordStore::open(root.join(RECORDS_FILE))?;
        let mut vault = Self::with_record_store(&root, config, records)?;
        vault.root_lock = Some(root_lock);

        info!(root = %root.display(), "initialized vault");
        Ok(vault)
    }

    /// Open an existing vault at the given path.
    ///
    /// Waits up to [`DEFAULT_LOCK_TIMEOUT`] for another handle to close it.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_timeout(root, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open an existing vault, waiting up to `timeout` for its lock.
    ///
    /// Fails with `VaultLocked` if another handle still holds it.
    pub fn open_with_timeout<P: AsRef<Path>>(root: P, timeout: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config = VaultConfig::parse(&fs::read_to_string(&config_path)?, &config_path)?;

        let objects_dir = root.join("objects").join(config.algorithm.as_str());
        if !objects_dir.exists() {
            return Err(Error::invalid_store(
                &root,
                "objects directory structure missing",
            ));
        }

        let root_lock = RootLock::acquire(&root.join(LOCK_FILE), timeout)?;
        let records = MemoryRecordStore::open(root.join(RECORDS_FILE))?;
        let mut vault = Self::with_record_store(&root, config, records)?;
        vault.root_lock = Some(root_lock);
        Ok(vault)
    }
}

impl<S: RecordStore> Vault<S> {
    /// Build a vault over any record store, keeping payloads under `root`.
    ///
    /// No lock file is taken; the caller coordinates access to `root`.
    pub fn with_record_store<P: AsRef<Path>>(
        root: P,
        config: VaultConfig,
        records: S,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let payloads = PayloadStore::new(&root, config.algorithm, config.compression_threshold);
        fs::create_dir_all(payloads.objects_dir())?;

        Ok(Self {
            root,
            config,
            records,
            payloads,
            locks: HashLocks::new(),
            root_lock: None,
        })
    }

    /// Get the root directory of the vault.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The record store holding the vault's metadata.
    pub fn records(&self) -> &S {
        &self.records
    }

    pub fn payloads(&self) -> &PayloadStore {
        &self.payloads
    }
}
