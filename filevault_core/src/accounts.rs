//! Owner accounts and global dedup statistics.

use crate::error::{Error, Result};
use crate::record_store::{RecordStore, Transaction, View, by_id};
use crate::records::{ContentBlock, FileBinding, OwnerAccount, OwnerId};
use crate::vault::Vault;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

/// Vault-wide deduplication statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupStats {
    /// Live file bindings, hard links included.
    pub total_files: u64,
    pub unique_blocks: u64,
    /// Sum of binding sizes.
    pub logical_size: u64,
    /// Sum of block sizes.
    pub physical_size: u64,
    /// Sum of every owner's cumulative saved storage.
    pub space_saved: u64,
    /// `space_saved / logical_size`, or 0 for an empty vault.
    pub dedup_ratio: f64,
}

impl DedupStats {
    /// The dedup ratio as a percentage string, e.g. `"12.50%"`.
    pub fn efficiency(&self) -> String {
        format!("{:.2}%", self.dedup_ratio * 100.0)
    }
}

impl<S: RecordStore> Vault<S> {
    /// Open a new owner account. `None` uses the configured default quota.
    pub fn create_account(&self, quota_max: Option<u64>) -> Result<OwnerAccount> {
        let account = self.records.with_transaction(|tx| {
            tx.create(OwnerAccount {
                id: 0,
                quota_used: 0,
                quota_max: quota_max.unwrap_or(self.config().default_quota),
                storage_saved: 0,
                rate_limit_calls: self.config().rate_limit_calls,
                created_at: Utc::now(),
            })
        })?;
        info!(owner = account.id, quota_max = account.quota_max, "created account");
        Ok(account)
    }

    pub fn account(&self, owner: OwnerId) -> Result<OwnerAccount> {
        self.records
            .read(|view| view.get(owner))
            .ok_or(Error::UnknownOwner { owner })
    }

    pub fn list_accounts(&self) -> Vec<OwnerAccount> {
        self.records
            .read(|view| view.find_many(|_: &OwnerAccount| true, by_id, None))
    }

    /// Change an owner's quota.
    ///
    /// Lowering it below current usage only blocks further charged uploads.
    pub fn set_quota(&self, owner: OwnerId, quota_max: u64) -> Result<OwnerAccount> {
        let account = self.records.with_transaction(|tx| {
            let mut account: OwnerAccount =
                tx.get(owner).ok_or(Error::UnknownOwner { owner })?;
            account.quota_max = quota_max;
            tx.update(&account)?;
            Ok(account)
        })?;
        info!(owner, quota_max, "updated quota");
        Ok(account)
    }

    /// Compute deduplication statistics over the whole vault.
    pub fn compute_dedup_stats(&self) -> DedupStats {
        self.records.read(|view| {
            let bindings = view.find_many(|_: &FileBinding| true, by_id, None);
            let blocks = view.find_many(|_: &ContentBlock| true, by_id, None);
            let accounts = view.find_many(|_: &OwnerAccount| true, by_id, None);

            let logical_size: u64 = bindings.iter().map(|b| b.size).sum();
            let space_saved: u64 = accounts.iter().map(|a| a.storage_saved).sum();
            let dedup_ratio = if logical_size == 0 {
                0.0
            } else {
                space_saved as f64 / logical_size as f64
            };

            DedupStats {
                total_files: bindings.len() as u64,
                unique_blocks: blocks.len() as u64,
                logical_size,
                physical_size: blocks.iter().map(|b| b.size).sum(),
                space_saved,
                dedup_ratio,
            }
        })
    }
}
