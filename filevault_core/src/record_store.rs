//! The record store collaborator.
//!
//! The vault persists its metadata as typed records through [`RecordStore`]:
//! transactional create/update/delete plus keyed and predicate lookups. Every
//! composite mutation runs inside one [`RecordStore::with_transaction`] call,
//! so it either commits completely or leaves no trace.
//!
//! [`MemoryRecordStore`] is the bundled implementation: typed tables behind a
//! single lock, an undo log for rollback, and an optional JSON snapshot that
//! is rewritten atomically after every committed transaction. The snapshot
//! file is written with readers already let back in; only other writers
//! wait for it.

use crate::error::{Error, Result};
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::{debug, warn};

/// Store-assigned record identifier.
///
/// Ids start at 1. Once a record commits, its id is never handed out again;
/// ids taken by a rolled-back transaction are released.
pub type RecordId = u64;

/// A typed record kept in one table of the store.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name, used in diagnostics and by engines that map tables by name.
    const TABLE: &'static str;

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    /// Key that must be unique within the table, if any.
    fn unique_key(&self) -> Option<String>;

    #[doc(hidden)]
    fn table(tables: &Tables) -> &Table<Self>;

    #[doc(hidden)]
    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;
}

/// Read access to records.
pub trait View {
    fn get<R: Record>(&self, id: RecordId) -> Option<R>;

    fn find_by_key<R: Record>(&self, key: &str) -> Option<R>;

    fn find<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> Option<R>;

    fn find_many<R: Record>(
        &self,
        predicate: impl Fn(&R) -> bool,
        order: impl FnMut(&R, &R) -> Ordering,
        limit: Option<usize>,
    ) -> Vec<R>;

    fn count<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> usize;
}

/// Read/write access inside a transaction.
pub trait Transaction: View {
    /// Insert a record, assigning its id.
    ///
    /// Fails with `ConstraintViolation` if its unique key is taken.
    fn create<R: Record>(&mut self, record: R) -> Result<R>;

    fn update<R: Record>(&mut self, record: &R) -> Result<()>;

    fn delete<R: Record>(&mut self, id: RecordId) -> Result<R>;
}

/// Transactional typed storage consumed by the vault.
pub trait RecordStore: Send + Sync {
    type View<'a>: View;

    type Tx<'a>: Transaction;

    /// Run `body` against a consistent read-only view.
    fn read<T>(&self, body: impl FnOnce(&Self::View<'_>) -> T) -> T;

    /// Run `body` atomically: every record operation it performs commits if it
    /// returns `Ok`, and all of them are rolled back if it returns `Err`.
    fn with_transaction<T>(&self, body: impl FnOnce(&mut Self::Tx<'_>) -> Result<T>)
    -> Result<T>;

    /// Like [`with_transaction`](RecordStore::with_transaction), but the
    /// store may postpone making the commit durable until a later commit or
    /// shutdown.
    ///
    /// For bookkeeping such as download counters, where losing the last few
    /// increments on a crash is acceptable.
    fn with_deferred_transaction<T>(
        &self,
        body: impl FnOnce(&mut Self::Tx<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_transaction(body)
    }
}

/// Sort records by id; the default ordering for listings.
pub fn by_id<R: Record>(a: &R, b: &R) -> Ordering {
    a.id().cmp(&b.id())
}

/// One table: rows by id plus a unique-key index.
#[derive(Debug, Clone)]
pub struct Table<R> {
    rows: BTreeMap<RecordId, R>,
    keys: HashMap<String, RecordId>,
    next_id: RecordId,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            keys: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<R: Record> Table<R> {
    fn from_rows(next_id: RecordId, rows: Vec<R>) -> Self {
        let mut table = Self {
            next_id,
            ..Self::default()
        };
        for row in rows {
            table.next_id = table.next_id.max(row.id() + 1);
            table.put_row(row);
        }
        table
    }

    fn insert_new(&mut self, mut record: R) -> Result<R> {
        if let Some(key) = record.unique_key()
            && self.keys.contains_key(&key)
        {
            return Err(Error::constraint(R::TABLE, key));
        }

        record.set_id(self.next_id);
        self.next_id += 1;
        self.put_row(record.clone());
        Ok(record)
    }

    /// Replace an existing row, returning the previous version.
    fn replace(&mut self, record: R) -> Result<R> {
        let id = record.id();
        let Some(old) = self.rows.get(&id).cloned() else {
            return Err(Error::consistency(format!(
                "update of missing {} record {}",
                R::TABLE,
                id
            )));
        };

        if let Some(key) = record.unique_key()
            && self.keys.get(&key).is_some_and(|owner| *owner != id)
        {
            return Err(Error::constraint(R::TABLE, key));
        }

        self.put_row(record);
        Ok(old)
    }

    /// Undo an `insert_new`, handing its id back out.
    fn unassign(&mut self, id: RecordId) {
        self.remove(id);
        self.next_id = id;
    }

    fn remove(&mut self, id: RecordId) -> Option<R> {
        let row = self.rows.remove(&id)?;
        if let Some(key) = row.unique_key() {
            self.keys.remove(&key);
        }
        Some(row)
    }

    /// Insert or overwrite a row by id, keeping the key index in sync.
    fn put_row(&mut self, row: R) {
        let id = row.id();
        if let Some(previous) = self.rows.get(&id)
            && let Some(key) = previous.unique_key()
        {
            self.keys.remove(&key);
        }
        if let Some(key) = row.unique_key() {
            self.keys.insert(key, id);
        }
        self.rows.insert(id, row);
    }

    fn by_key(&self, key: &str) -> Option<&R> {
        self.keys.get(key).and_then(|id| self.rows.get(id))
    }

    fn values(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }
}

#[derive(Serialize)]
struct TableSnapshotRef<'a, R> {
    next_id: RecordId,
    rows: Vec<&'a R>,
}

#[derive(Deserialize)]
struct TableSnapshot<R> {
    next_id: RecordId,
    rows: Vec<R>,
}

impl<R: Record> Serialize for Table<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        TableSnapshotRef {
            next_id: self.next_id,
            rows: self.rows.values().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de, R: Record> Deserialize<'de> for Table<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let snapshot = TableSnapshot::<R>::deserialize(deserializer)?;
        Ok(Table::from_rows(snapshot.next_id, snapshot.rows))
    }
}

/// All tables of the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    pub(crate) nodes: Table<crate::records::NamespaceNode>,
    pub(crate) blocks: Table<crate::records::ContentBlock>,
    pub(crate) bindings: Table<crate::records::FileBinding>,
    pub(crate) symlinks: Table<crate::records::SymlinkBinding>,
    pub(crate) accounts: Table<crate::records::OwnerAccount>,
    pub(crate) grants: Table<crate::records::ShareGrant>,
}

impl View for Tables {
    fn get<R: Record>(&self, id: RecordId) -> Option<R> {
        R::table(self).rows.get(&id).cloned()
    }

    fn find_by_key<R: Record>(&self, key: &str) -> Option<R> {
        R::table(self).by_key(key).cloned()
    }

    fn find<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> Option<R> {
        R::table(self).values().find(|r| predicate(r)).cloned()
    }

    fn find_many<R: Record>(
        &self,
        predicate: impl Fn(&R) -> bool,
        mut order: impl FnMut(&R, &R) -> Ordering,
        limit: Option<usize>,
    ) -> Vec<R> {
        let mut found: Vec<R> = R::table(self)
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| order(a, b));
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        found
    }

    fn count<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> usize {
        R::table(self).values().filter(|r| predicate(r)).count()
    }
}

type UndoOp = Box<dyn FnOnce(&mut Tables)>;

/// A transaction over the in-memory tables.
///
/// Holds the store's write lock for its whole lifetime and records an undo
/// operation for every change.
pub struct MemoryTx<'a> {
    tables: &'a mut Tables,
    undo: Vec<UndoOp>,
}

/// Apply an undo log newest first.
fn rollback(tables: &mut Tables, undo: Vec<UndoOp>) {
    debug!(operations = undo.len(), "rolling back transaction");
    for op in undo.into_iter().rev() {
        op(tables);
    }
}

impl View for MemoryTx<'_> {
    fn get<R: Record>(&self, id: RecordId) -> Option<R> {
        self.tables.get(id)
    }

    fn find_by_key<R: Record>(&self, key: &str) -> Option<R> {
        self.tables.find_by_key(key)
    }

    fn find<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> Option<R> {
        self.tables.find(predicate)
    }

    fn find_many<R: Record>(
        &self,
        predicate: impl Fn(&R) -> bool,
        order: impl FnMut(&R, &R) -> Ordering,
        limit: Option<usize>,
    ) -> Vec<R> {
        self.tables.find_many(predicate, order, limit)
    }

    fn count<R: Record>(&self, predicate: impl Fn(&R) -> bool) -> usize {
        self.tables.count(predicate)
    }
}

impl Transaction for MemoryTx<'_> {
    fn create<R: Record>(&mut self, record: R) -> Result<R> {
        let created = R::table_mut(self.tables).insert_new(record)?;
        let id = created.id();
        self.undo.push(Box::new(move |tables| {
            R::table_mut(tables).unassign(id);
        }));
        Ok(created)
    }

    fn update<R: Record>(&mut self, record: &R) -> Result<()> {
        let old = R::table_mut(self.tables).replace(record.clone())?;
        self.undo.push(Box::new(move |tables| {
            R::table_mut(tables).put_row(old);
        }));
        Ok(())
    }

    fn delete<R: Record>(&mut self, id: RecordId) -> Result<R> {
        let Some(old) = R::table_mut(self.tables).remove(id) else {
            return Err(Error::consistency(format!(
                "delete of missing {} record {}",
                R::TABLE,
                id
            )));
        };
        let restored = old.clone();
        self.undo.push(Box::new(move |tables| {
            R::table_mut(tables).put_row(restored);
        }));
        Ok(old)
    }
}

/// In-memory record store with optional snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    snapshot: Option<PathBuf>,
    /// Deferred commits not yet in the snapshot file.
    dirty: AtomicBool,
}

impl MemoryRecordStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, loading the snapshot if it exists.
    ///
    /// Every committed transaction rewrites the snapshot. The caller must
    /// make sure no other store has the same file open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let tables = match fs::File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "opened record snapshot");

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    /// Path of the snapshot file, if persistent.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write deferred commits to the snapshot file.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let guard = self.tables.upgradable_read();
        if !self.dirty.load(AtomicOrdering::Acquire) {
            return Ok(());
        }
        let bytes = serde_json::to_vec(&*guard)?;
        write_snapshot(path, &bytes)?;
        self.dirty.store(false, AtomicOrdering::Release);
        Ok(())
    }
}

/// Atomically replace the snapshot file with `bytes`.
fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::invalid_store(path, "snapshot path has no parent"))?;
    let temp_file = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp_file.as_file());
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    temp_file.persist(path)?;
    Ok(())
}

impl RecordStore for MemoryRecordStore {
    type View<'a> = Tables;
    type Tx<'a> = MemoryTx<'a>;

    fn read<T>(&self, body: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.tables.read();
        body(&guard)
    }

    fn with_transaction<T>(&self, body: impl FnOnce(&mut MemoryTx<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.write();
        let mut tx = MemoryTx {
            tables: &mut guard,
            undo: Vec::new(),
        };

        let outcome = body(&mut tx);
        let undo = std::mem::take(&mut tx.undo);
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                rollback(&mut guard, undo);
                return Err(e);
            }
        };

        let Some(path) = &self.snapshot else {
            return Ok(value);
        };
        if undo.is_empty() {
            return Ok(value);
        }

        let bytes = match serde_json::to_vec(&*guard) {
            Ok(bytes) => bytes,
            Err(e) => {
                rollback(&mut guard, undo);
                return Err(e.into());
            }
        };

        // Readers may proceed while the file is written; writers stay out
        // so the undo log is still valid if the write fails.
        let guard = RwLockWriteGuard::downgrade_to_upgradable(guard);
        match write_snapshot(path, &bytes) {
            Ok(()) => {
                self.dirty.store(false, AtomicOrdering::Release);
                Ok(value)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "snapshot write failed, rolling back");
                let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
                rollback(&mut guard, undo);
                Err(e)
            }
        }
    }

    fn with_deferred_transaction<T>(
        &self,
        body: impl FnOnce(&mut MemoryTx<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.tables.write();
        let mut tx = MemoryTx {
            tables: &mut guard,
            undo: Vec::new(),
        };

        let outcome = body(&mut tx);
        let undo = std::mem::take(&mut tx.undo);
        match outcome {
            Ok(value) => {
                if !undo.is_empty() && self.snapshot.is_some() {
                    self.dirty.store(true, AtomicOrdering::Release);
                }
                Ok(value)
            }
            Err(e) => {
                rollback(&mut guard, undo);
                Err(e)
            }
        }
    }
}

impl Drop for MemoryRecordStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush deferred record changes");
        }
    }
}
