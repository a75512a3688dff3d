//! # FileVault Core
//!
//! A content-addressed, deduplicating file store with a per-owner
//! hierarchical namespace.
//!
//! Every file's payload is stored once per unique BLAKE3 hash and shared by
//! all namespace entries that reference it. Reference counts decide when a
//! payload is physically removed. Metadata lives in a transactional
//! [`RecordStore`]; payloads live in immutable object files.
//!
//! ## Features
//!
//! - Namespace tree of directories, files and symbolic links per owner
//! - Upload deduplication by content hash, with quota charged once
//! - Hard links sharing a block, soft links resolved at read time
//! - Share grants with optional password and expiry
//! - Garbage collection of orphan payloads and a consistency checker
//!
//! ## Example
//!
//! ```no_run
//! use filevault_core::{Vault, VaultConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = Vault::init("./my-vault", VaultConfig::default())?;
//! let owner = vault.create_account(Some(1_000_000))?.id;
//!
//! // Identical bytes are stored once
//! vault.upload(owner, "/docs", "report.pdf", b"%PDF-1.7 ...", "application/pdf")?;
//! let copy = vault.upload(owner, "/backup", "report.pdf", b"%PDF-1.7 ...", "application/pdf")?;
//! assert!(copy.dedup);
//!
//! vault.hard_link(owner, "/docs/report.pdf", "/shared/report.pdf")?;
//! vault.delete_file(owner, "/docs/report.pdf")?;
//!
//! let stats = vault.compute_dedup_stats();
//! println!("Dedup efficiency: {}", stats.efficiency());
//! # Ok(())
//! # }
//! ```

mod accounts;
mod bindings;
mod blocks;
mod config;
mod error;
mod gc;
mod hash;
mod locks;
pub mod mime;
mod namespace;
mod object;
mod payload;
pub mod record_store;
mod records;
mod shares;
mod vault;
mod walk;

pub use accounts::DedupStats;
pub use bindings::{FileEntry, SearchQuery, upload_path};
pub use blocks::hash;
pub use config::{DEFAULT_QUOTA, DEFAULT_RATE_LIMIT_CALLS, VaultConfig};
pub use error::{Error, Result};
pub use gc::{ConsistencyReport, GcStats};
pub use hash::{Algorithm, ContentHash};
pub use namespace::{ListEntry, MAX_SYMLINK_HOPS, split_path};
pub use object::{CompressionType, ObjectHeader, ObjectType};
pub use payload::{DEFAULT_COMPRESSION_THRESHOLD, PayloadStore};
pub use record_store::{
    MemoryRecordStore, Record, RecordId, RecordStore, Transaction, View, by_id,
};
pub use records::{
    ContentBlock, FileBinding, NamespaceNode, NodeId, NodeKind, OwnerAccount, OwnerId, ShareGrant,
    SymlinkBinding,
};
pub use shares::SharedFile;
pub use vault::{DEFAULT_LOCK_TIMEOUT, Vault};
pub use walk::ImportStats;
