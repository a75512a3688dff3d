//! Garbage collection and consistency checking.

use crate::error::Result;
use crate::hash::ContentHash;
use crate::record_store::{RecordStore, View, by_id};
use crate::records::{
    ContentBlock, FileBinding, NamespaceNode, NodeKind, OwnerAccount, ShareGrant, SymlinkBinding,
};
use crate::vault::Vault;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Number of payload files deleted.
    pub objects_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// Result of [`Vault::check_consistency`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub blocks_checked: usize,
    pub bindings_checked: usize,
    pub accounts_checked: usize,
    /// One line per violated invariant; empty when healthy.
    pub problems: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

impl<S: RecordStore> Vault<S> {
    /// Run garbage collection.
    ///
    /// Deletes payload files that no content block references. These are left
    /// behind when a process dies between writing a payload and committing
    /// its block. If `dry_run` is true, reports what would be deleted without
    /// actually deleting.
    pub fn gc(&self, dry_run: bool) -> Result<GcStats> {
        let mut stats = GcStats {
            objects_deleted: 0,
            bytes_freed: 0,
        };

        for (hash, size) in self.payloads.list()? {
            let _stripe = self.locks.lock(&hash);
            if self.block_exists(&hash) {
                continue;
            }

            if dry_run {
                stats.objects_deleted += 1;
                stats.bytes_freed += size;
            } else if let Some(freed) = self.payloads.remove(&hash)? {
                stats.objects_deleted += 1;
                stats.bytes_freed += freed;
            }
        }

        info!(
            dry_run,
            objects_deleted = stats.objects_deleted,
            bytes_freed = stats.bytes_freed,
            "garbage collection finished"
        );
        Ok(stats)
    }

    fn block_exists(&self, hash: &ContentHash) -> bool {
        self.records
            .read(|view| view.find_by_key::<ContentBlock>(&hash.to_hex()).is_some())
    }

    /// Verify the bookkeeping invariants.
    ///
    /// Checks that every block's reference count matches its live bindings
    /// and has a payload file, that every binding, symlink and grant points at
    /// live records, and that each owner's used quota equals the sizes of
    /// their charged bindings.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let (mut report, blocks) = self.records.read(|view| {
            let blocks = view.find_many(|_: &ContentBlock| true, by_id, None);
            let bindings = view.find_many(|_: &FileBinding| true, by_id, None);
            let accounts = view.find_many(|_: &OwnerAccount| true, by_id, None);

            let mut report = ConsistencyReport {
                blocks_checked: blocks.len(),
                bindings_checked: bindings.len(),
                accounts_checked: accounts.len(),
                problems: Vec::new(),
            };

            let mut live_refs: HashMap<ContentHash, u64> = HashMap::new();
            let mut charged: HashMap<u64, u64> = HashMap::new();

            for binding in &bindings {
                *live_refs.entry(binding.hash).or_default() += 1;

                match view.get::<NamespaceNode>(binding.node) {
                    Some(node) if node.kind == NodeKind::File => {
                        if !binding.dedup {
                            *charged.entry(node.owner).or_default() += binding.size;
                        }
                    }
                    Some(node) => report.problems.push(format!(
                        "binding {} is attached to {} node {}",
                        binding.id,
                        node.kind.as_str(),
                        node.path
                    )),
                    None => report.problems.push(format!(
                        "binding {} references missing node {}",
                        binding.id, binding.node
                    )),
                }

                if view.find_by_key::<ContentBlock>(&binding.hash.to_hex()).is_none() {
                    report.problems.push(format!(
                        "binding {} references missing block {}",
                        binding.id, binding.hash
                    ));
                }
            }

            for block in &blocks {
                let live = live_refs.get(&block.hash).copied().unwrap_or(0);
                if block.ref_count != live {
                    report.problems.push(format!(
                        "block {} has ref_count {} but {} live bindings",
                        block.hash, block.ref_count, live
                    ));
                }
            }

            for account in &accounts {
                let expected = charged.get(&account.id).copied().unwrap_or(0);
                if account.quota_used != expected {
                    report.problems.push(format!(
                        "owner {} has quota_used {} but charged bindings total {}",
                        account.id, account.quota_used, expected
                    ));
                }
            }

            for link in view.find_many(|_: &SymlinkBinding| true, by_id, None) {
                if view.get::<NamespaceNode>(link.node).is_none() {
                    report.problems.push(format!(
                        "symlink {} references missing node {}",
                        link.id, link.node
                    ));
                }
            }

            for grant in view.find_many(|_: &ShareGrant| true, by_id, None) {
                if view.get::<FileBinding>(grant.binding).is_none() {
                    report.problems.push(format!(
                        "grant {} references missing binding {}",
                        grant.id, grant.binding
                    ));
                }
            }

            (report, blocks)
        });

        for block in &blocks {
            if !self.payloads.contains(&block.hash) {
                report
                    .problems
                    .push(format!("block {} has no payload file", block.hash));
            }
        }

        if !report.is_healthy() {
            warn!(problems = report.problems.len(), "consistency check found problems");
        }
        report
    }
}
