//! The namespace tree.
//!
//! Each owner has a trie of [`NamespaceNode`] records rooted at `/`. Nodes are
//! found by walking parent to child through the `(owner, parent, name)` unique
//! key, so resolution costs one keyed lookup per segment.

use crate::error::{Error, Result};
use crate::record_store::{RecordStore, Transaction, View, by_id};
use crate::records::{
    FileBinding, NamespaceNode, NodeId, NodeKind, OwnerAccount, OwnerId, SymlinkBinding,
};
use crate::vault::Vault;
use chrono::Utc;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Maximum symlinks followed while resolving one path.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Split a path into validated segments.
///
/// One leading and one trailing `/` are ignored. `""` and `"/"` name the root
/// and yield no segments. Empty, `.`, `..` and whitespace-only segments are
/// rejected.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

    trimmed
        .split('/')
        .map(|segment| match check_segment(segment) {
            Ok(()) => Ok(segment),
            Err(reason) => Err(Error::invalid_path(path, reason)),
        })
        .collect()
}

fn check_segment(segment: &str) -> std::result::Result<(), &'static str> {
    if segment.is_empty() {
        Err("empty segment")
    } else if segment == "." || segment == ".." {
        Err("reserved segment")
    } else if segment.trim().is_empty() {
        Err("whitespace-only segment")
    } else {
        Ok(())
    }
}

/// Join a resolved parent path and a child name.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Directory(NamespaceNode),
    File {
        node: NamespaceNode,
        binding: FileBinding,
    },
    Symlink {
        node: NamespaceNode,
        target: String,
    },
}

impl ListEntry {
    pub fn node(&self) -> &NamespaceNode {
        match self {
            ListEntry::Directory(node) => node,
            ListEntry::File { node, .. } => node,
            ListEntry::Symlink { node, .. } => node,
        }
    }
}

pub(crate) fn find_root<V: View>(view: &V, owner: OwnerId) -> Option<NamespaceNode> {
    view.find_by_key(&NamespaceNode::child_key(owner, None, ""))
}

pub(crate) fn find_child<V: View>(
    view: &V,
    owner: OwnerId,
    parent: NodeId,
    name: &str,
) -> Option<NamespaceNode> {
    view.find_by_key(&NamespaceNode::child_key(owner, Some(parent), name))
}

/// Fetch the owner's root, creating it on first access.
pub(crate) fn ensure_root<T: Transaction>(tx: &mut T, owner: OwnerId) -> Result<NamespaceNode> {
    if let Some(root) = find_root(tx, owner) {
        return Ok(root);
    }

    if tx.get::<OwnerAccount>(owner).is_none() {
        return Err(Error::UnknownOwner { owner });
    }

    debug!(owner, "creating root directory");
    tx.create(NamespaceNode {
        id: 0,
        name: String::new(),
        path: "/".to_string(),
        owner,
        kind: NodeKind::Directory,
        public: false,
        created_at: Utc::now(),
        parent: None,
    })
}

/// Resolve a path to a node without following symlinks.
pub(crate) fn resolve<V: View>(view: &V, owner: OwnerId, path: &str) -> Result<NamespaceNode> {
    let segments = split_path(path)?;

    let Some(mut current) = find_root(view, owner) else {
        if view.get::<OwnerAccount>(owner).is_none() {
            return Err(Error::UnknownOwner { owner });
        }
        return Err(Error::not_found(path));
    };

    for segment in segments {
        if current.kind != NodeKind::Directory {
            return Err(Error::not_found(path));
        }
        current =
            find_child(view, owner, current.id, segment).ok_or_else(|| Error::not_found(path))?;
    }

    Ok(current)
}

/// Resolve a path, following symlinks at any position.
///
/// Absolute targets restart at the owner's root; relative targets are
/// resolved against the directory holding the link.
pub(crate) fn resolve_following<V: View>(
    view: &V,
    owner: OwnerId,
    path: &str,
) -> Result<NamespaceNode> {
    let mut pending: VecDeque<String> = split_path(path)?.into_iter().map(String::from).collect();

    let Some(root) = find_root(view, owner) else {
        if view.get::<OwnerAccount>(owner).is_none() {
            return Err(Error::UnknownOwner { owner });
        }
        return Err(Error::not_found(path));
    };

    let mut current = root.clone();
    let mut hops = 0;

    while let Some(segment) = pending.pop_front() {
        if current.kind != NodeKind::Directory {
            return Err(Error::not_found(path));
        }

        let child =
            find_child(view, owner, current.id, &segment).ok_or_else(|| Error::not_found(path))?;

        if child.kind != NodeKind::Symlink {
            current = child;
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(Error::SymlinkLoop {
                path: path.to_string(),
            });
        }

        let link = symlink_binding(view, &child)?;
        let target_segments = split_path(&link.target).map_err(|_| Error::not_found(path))?;
        for segment in target_segments.into_iter().rev() {
            pending.push_front(segment.to_string());
        }
        if link.target.starts_with('/') {
            current = root.clone();
        }
    }

    Ok(current)
}

pub(crate) fn file_binding<V: View>(view: &V, node: &NamespaceNode) -> Result<FileBinding> {
    view.find_by_key(&node.id.to_string()).ok_or_else(|| {
        Error::consistency(format!("file node {} has no binding", node.path))
    })
}

pub(crate) fn symlink_binding<V: View>(view: &V, node: &NamespaceNode) -> Result<SymlinkBinding> {
    view.find_by_key(&node.id.to_string()).ok_or_else(|| {
        Error::consistency(format!("symlink node {} has no target", node.path))
    })
}

/// Insert a node at `path`, creating missing intermediate directories.
///
/// A directory request on an existing directory returns it unchanged. Any
/// other collision on the terminal segment is `FileExists`. An intermediate
/// file or symlink is `FileIsNotADirectory`.
pub(crate) fn insert<T: Transaction>(
    tx: &mut T,
    owner: OwnerId,
    path: &str,
    kind: NodeKind,
    public: bool,
) -> Result<NamespaceNode> {
    let segments = split_path(path)?;
    let mut current = ensure_root(tx, owner)?;

    if segments.is_empty() {
        return match kind {
            NodeKind::Directory => Ok(current),
            _ => Err(Error::file_exists("/")),
        };
    }

    let last = segments.len() - 1;
    for (i, segment) in segments.into_iter().enumerate() {
        let terminal = i == last;

        if let Some(existing) = find_child(tx, owner, current.id, segment) {
            if !terminal {
                if existing.kind != NodeKind::Directory {
                    return Err(Error::file_is_not_a_directory(existing.path));
                }
                current = existing;
                continue;
            }

            return if kind == NodeKind::Directory && existing.kind == NodeKind::Directory {
                Ok(existing)
            } else {
                Err(Error::file_exists(existing.path))
            };
        }

        current = tx.create(NamespaceNode {
            id: 0,
            name: segment.to_string(),
            path: join_path(&current.path, segment),
            owner,
            kind: if terminal { kind } else { NodeKind::Directory },
            public: terminal && public,
            created_at: Utc::now(),
            parent: Some(current.id),
        })?;
    }

    Ok(current)
}

/// Remove a node that has no children and no binding.
pub(crate) fn remove<T: Transaction>(tx: &mut T, node: &NamespaceNode) -> Result<()> {
    if node.is_root() {
        return Err(Error::consistency("attempted to remove a root node"));
    }
    if tx.count::<NamespaceNode>(|n| n.parent == Some(node.id)) > 0 {
        return Err(Error::consistency(format!(
            "removing {} which still has children",
            node.path
        )));
    }
    let key = node.id.to_string();
    if tx.find_by_key::<FileBinding>(&key).is_some()
        || tx.find_by_key::<SymlinkBinding>(&key).is_some()
    {
        return Err(Error::consistency(format!(
            "removing {} which is still bound",
            node.path
        )));
    }

    tx.delete::<NamespaceNode>(node.id)?;
    Ok(())
}

pub(crate) fn children<V: View>(view: &V, parent: &NamespaceNode) -> Vec<NamespaceNode> {
    view.find_many(
        |n: &NamespaceNode| n.parent == Some(parent.id) && n.owner == parent.owner,
        |a, b| a.name.cmp(&b.name).then_with(|| by_id(a, b)),
        None,
    )
}

fn list_entry<V: View>(view: &V, node: NamespaceNode) -> Result<ListEntry> {
    Ok(match node.kind {
        NodeKind::Directory => ListEntry::Directory(node),
        NodeKind::File => ListEntry::File {
            binding: file_binding(view, &node)?,
            node,
        },
        NodeKind::Symlink => ListEntry::Symlink {
            target: symlink_binding(view, &node)?.target,
            node,
        },
    })
}

impl<S: RecordStore> Vault<S> {
    /// Create the owner's root if this is their first access.
    pub(crate) fn ensure_owner_root(&self, owner: OwnerId) -> Result<()> {
        if self.records.read(|view| find_root(view, owner).is_some()) {
            return Ok(());
        }
        self.records.with_transaction(|tx| ensure_root(tx, owner))?;
        Ok(())
    }

    /// Resolve a path to a node of the owner's tree.
    pub fn resolve(&self, owner: OwnerId, path: &str) -> Result<NamespaceNode> {
        self.ensure_owner_root(owner)?;
        self.records.read(|view| resolve(view, owner, path))
    }

    /// Create a directory and any missing parents.
    ///
    /// Returns the existing directory if one is already at `path`.
    pub fn insert_directory(
        &self,
        owner: OwnerId,
        path: &str,
        public: bool,
    ) -> Result<NamespaceNode> {
        let node = self
            .records
            .with_transaction(|tx| insert(tx, owner, path, NodeKind::Directory, public))?;
        debug!(owner, path = %node.path, "directory ready");
        Ok(node)
    }

    /// List the direct children of a directory, ordered by name.
    ///
    /// If `path` names a file or symlink, the result describes that node alone.
    pub fn list_children(&self, owner: OwnerId, path: &str) -> Result<Vec<ListEntry>> {
        self.ensure_owner_root(owner)?;
        self.records.read(|view| {
            let node = resolve(view, owner, path)?;
            if node.kind != NodeKind::Directory {
                return Ok(vec![list_entry(view, node)?]);
            }
            children(view, &node)
                .into_iter()
                .map(|child| list_entry(view, child))
                .collect()
        })
    }

    /// Remove an empty directory. The root cannot be removed.
    pub fn remove_directory(&self, owner: OwnerId, path: &str) -> Result<()> {
        self.ensure_owner_root(owner)?;
        self.records.with_transaction(|tx| {
            let node = resolve(tx, owner, path)?;
            if node.kind != NodeKind::Directory {
                return Err(Error::not_a_directory(path));
            }
            if node.is_root() {
                return Err(Error::invalid_path(path, "the root directory cannot be removed"));
            }
            if tx.count::<NamespaceNode>(|n| n.parent == Some(node.id)) > 0 {
                return Err(Error::DirectoryNotEmpty {
                    path: node.path.clone(),
                });
            }
            remove(tx, &node)
        })?;
        info!(owner, path, "removed directory");
        Ok(())
    }

    /// Mark a node public or private.
    pub fn set_visibility(
        &self,
        owner: OwnerId,
        path: &str,
        public: bool,
    ) -> Result<NamespaceNode> {
        self.ensure_owner_root(owner)?;
        self.records.with_transaction(|tx| {
            let mut node = resolve(tx, owner, path)?;
            node.public = public;
            tx.update(&node)?;
            Ok(node)
        })
    }
}
