//! Typed records persisted through the record store.

use crate::hash::ContentHash;
use crate::record_store::{Record, RecordId, Table, Tables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an owner; equal to the id of their [`OwnerAccount`].
pub type OwnerId = RecordId;

/// Identifier of a [`NamespaceNode`].
pub type NodeId = RecordId;

/// Kind of a namespace node. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::File => "file",
            NodeKind::Symlink => "symlink",
        }
    }
}

/// One path-addressable entry in an owner's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceNode {
    pub id: NodeId,
    /// Single path segment; empty for the root.
    pub name: String,
    /// Full resolved path, `/` for the root.
    pub path: String,
    pub owner: OwnerId,
    pub kind: NodeKind,
    pub public: bool,
    pub created_at: DateTime<Utc>,
    pub parent: Option<NodeId>,
}

impl NamespaceNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Unique key of the child named `name` under `parent`.
    pub(crate) fn child_key(owner: OwnerId, parent: Option<NodeId>, name: &str) -> String {
        match parent {
            Some(parent) => format!("{}:{}:{}", owner, parent, name),
            None => format!("{}:root", owner),
        }
    }
}

/// A unique, hash-addressed, reference-counted payload.
///
/// The bytes themselves live in the payload object file named by `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: RecordId,
    pub hash: ContentHash,
    pub size: u64,
    pub ref_count: u64,
    pub created_at: DateTime<Utc>,
}

/// File-specific facet of a file node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBinding {
    pub id: RecordId,
    pub node: NodeId,
    pub original_name: String,
    pub hash: ContentHash,
    pub declared_mime: String,
    pub sniffed_mime: String,
    pub size: u64,
    /// Own reference count, distinct from the block's.
    pub ref_count: u64,
    /// True when the block already existed at upload, or for hard links.
    pub dedup: bool,
    pub downloads: u64,
    pub tags: String,
    pub created_at: DateTime<Utc>,
}

/// Symlink facet: an unresolved target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkBinding {
    pub id: RecordId,
    pub node: NodeId,
    pub target: String,
    pub created_at: DateTime<Utc>,
}

/// Per-owner quota and savings ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerAccount {
    /// Doubles as the owner id.
    pub id: OwnerId,
    pub quota_used: u64,
    pub quota_max: u64,
    /// Cumulative bytes not stored thanks to dedup and hard links.
    pub storage_saved: u64,
    /// Request-rate budget consumed by the external rate limiter.
    pub rate_limit_calls: u32,
    pub created_at: DateTime<Utc>,
}

impl OwnerAccount {
    /// Bytes still available before the quota is reached.
    pub fn quota_remaining(&self) -> u64 {
        self.quota_max.saturating_sub(self.quota_used)
    }
}

/// A capability over one file binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: RecordId,
    pub binding: RecordId,
    pub owner: OwnerId,
    pub token: String,
    /// Argon2 PHC string.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
}

impl ShareGrant {
    /// Whether the grant has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

macro_rules! impl_record {
    ($ty:ty, $table:literal, $field:ident, |$rec:ident| $key:expr) => {
        impl Record for $ty {
            const TABLE: &'static str = $table;

            fn id(&self) -> RecordId {
                self.id
            }

            fn set_id(&mut self, id: RecordId) {
                self.id = id;
            }

            fn unique_key(&self) -> Option<String> {
                let $rec = self;
                $key
            }

            fn table(tables: &Tables) -> &Table<Self> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
                &mut tables.$field
            }
        }
    };
}

impl_record!(NamespaceNode, "nodes", nodes, |n| Some(
    NamespaceNode::child_key(n.owner, n.parent, &n.name)
));
impl_record!(ContentBlock, "blocks", blocks, |b| Some(b.hash.to_hex()));
impl_record!(FileBinding, "bindings", bindings, |b| Some(b.node.to_string()));
impl_record!(SymlinkBinding, "symlinks", symlinks, |s| Some(s.node.to_string()));
impl_record!(OwnerAccount, "accounts", accounts, |_a| None);
impl_record!(ShareGrant, "grants", grants, |g| Some(g.token.clone()));

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_child_key_scopes_owner_and_parent() {
        assert_ne!(
            NamespaceNode::child_key(1, Some(5), "a"),
            NamespaceNode::child_key(2, Some(5), "a")
        );
        assert_ne!(
            NamespaceNode::child_key(1, Some(5), "a"),
            NamespaceNode::child_key(1, Some(6), "a")
        );
        assert_eq!(NamespaceNode::child_key(1, None, ""), "1:root");
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let mut grant = ShareGrant {
            id: 1,
            binding: 1,
            owner: 1,
            token: "t".to_string(),
            password_hash: None,
            expires_at: None,
            downloads: 0,
            created_at: now,
        };
        assert!(!grant.is_expired_at(now));

        grant.expires_at = Some(now + Duration::hours(1));
        assert!(!grant.is_expired_at(now));
        assert!(grant.is_expired_at(now + Duration::hours(1)));
    }

    #[test]
    fn test_node_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&NodeKind::Symlink).unwrap(),
            "\"symlink\""
        );
    }
}
