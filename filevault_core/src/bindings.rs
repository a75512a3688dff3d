//! The file/link binding layer.
//!
//! Uploads, hard links, soft links and deletes. Every composite mutation runs
//! in one record store transaction while holding the stripe lock of the
//! content hash it touches, so payload files and block records change
//! together.

use crate::blocks;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::mime;
use crate::namespace::{self, split_path};
use crate::record_store::{RecordId, RecordStore, Transaction, View};
use crate::records::{
    FileBinding, NamespaceNode, NodeId, NodeKind, OwnerAccount, OwnerId, ShareGrant,
    SymlinkBinding,
};
use crate::vault::Vault;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Outcome of one optimistic attempt made under a stripe lock.
enum Attempt<T> {
    Done(T),
    /// The binding's hash changed between the read and the lock.
    HashChanged,
}

/// Filters for [`Vault::search_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Case-insensitive substring of the original file name.
    pub name: Option<String>,
    /// Prefix of the sniffed MIME type.
    pub mime_prefix: Option<String>,
    pub limit: Option<usize>,
}

/// A file returned by search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub node: NamespaceNode,
    pub binding: FileBinding,
}

/// Full path of `filename` inside `dir_path`, as `upload` stores it.
pub fn upload_path(dir_path: &str, filename: &str) -> Result<String> {
    if filename.contains('/') {
        return Err(Error::invalid_path(filename, "file name contains '/'"));
    }
    let name = match split_path(filename)?.as_slice() {
        [name] => name.to_string(),
        _ => return Err(Error::invalid_path(filename, "empty file name")),
    };

    let mut segments = split_path(dir_path)?;
    segments.push(&name);
    Ok(format!("/{}", segments.join("/")))
}

fn require_account<V: View>(view: &V, owner: OwnerId) -> Result<OwnerAccount> {
    view.get(owner).ok_or(Error::UnknownOwner { owner })
}

fn resolve_file<V: View>(
    view: &V,
    owner: OwnerId,
    path: &str,
) -> Result<(NamespaceNode, FileBinding)> {
    let node = namespace::resolve(view, owner, path)?;
    if node.kind != NodeKind::File {
        return Err(Error::not_a_file(path));
    }
    let binding = namespace::file_binding(view, &node)?;
    Ok((node, binding))
}

fn resolve_symlink<V: View>(
    view: &V,
    owner: OwnerId,
    path: &str,
) -> Result<(NamespaceNode, SymlinkBinding)> {
    let node = namespace::resolve(view, owner, path)?;
    if node.kind != NodeKind::Symlink {
        return Err(Error::NotASymlink {
            path: path.to_string(),
        });
    }
    let link = namespace::symlink_binding(view, &node)?;
    Ok((node, link))
}

impl<S: RecordStore> Vault<S> {
    /// Store `payload` as `filename` inside `dir_path`.
    ///
    /// Missing directories are created. The owner is charged for the bytes
    /// only if no block with the same content exists yet; otherwise the
    /// upload is a dedup hit and counts as saved storage.
    pub fn upload(
        &self,
        owner: OwnerId,
        dir_path: &str,
        filename: &str,
        payload: &[u8],
        declared_mime: &str,
    ) -> Result<FileBinding> {
        let path = upload_path(dir_path, filename)?;
        let hash = blocks::hash(payload);
        let size = payload.len() as u64;

        let sniffed = mime::sniff_and_check(payload, filename, declared_mime);
        let declared = if declared_mime.trim().is_empty() {
            mime::from_extension(filename).unwrap_or_else(|| mime::OCTET_STREAM.to_string())
        } else {
            declared_mime.trim().to_string()
        };

        let _stripe = self.locks.lock(&hash);
        self.payloads.put(&hash, payload)?;

        let outcome = self.records.with_transaction(|tx| {
            let mut account = require_account(tx, owner)?;
            let charge = if blocks::find_block(tx, &hash).is_some() {
                0
            } else {
                size
            };
            // Dedup hits are never charged
            if charge > 0 && account.quota_used.saturating_add(charge) > account.quota_max {
                return Err(Error::QuotaExceeded {
                    owner,
                    used: account.quota_used,
                    requested: charge,
                    max: account.quota_max,
                });
            }

            let node = namespace::insert(tx, owner, &path, NodeKind::File, false)?;
            let (_block, created) = blocks::acquire_or_create(tx, &hash, size)?;

            if created {
                account.quota_used += size;
            } else {
                account.storage_saved += size;
            }
            tx.update(&account)?;

            tx.create(FileBinding {
                id: 0,
                node: node.id,
                original_name: filename.to_string(),
                hash,
                declared_mime: declared.clone(),
                sniffed_mime: sniffed.to_string(),
                size,
                ref_count: 1,
                dedup: !created,
                downloads: 0,
                tags: String::new(),
                created_at: Utc::now(),
            })
        });

        match outcome {
            Ok(binding) => {
                info!(owner, path, %hash, size, dedup = binding.dedup, "uploaded file");
                Ok(binding)
            }
            Err(e) => {
                self.discard_unreferenced_payload(&hash);
                Err(e)
            }
        }
    }

    /// Remove the payload file for `hash` if no block references it.
    ///
    /// Callers hold the hash's stripe lock.
    fn discard_unreferenced_payload(&self, hash: &ContentHash) {
        if self
            .records
            .read(|view| blocks::find_block(view, hash).is_some())
        {
            return;
        }
        if let Err(e) = self.payloads.remove(hash) {
            warn!(%hash, error = %e, "failed to remove unreferenced payload; gc will reclaim it");
        }
    }

    /// Create `dest_path` as a new binding to the content of `source_path`.
    ///
    /// The link has its own reference count and is always a dedup binding:
    /// it never charges quota and adds its size to the owner's saved storage.
    pub fn hard_link(
        &self,
        owner: OwnerId,
        source_path: &str,
        dest_path: &str,
    ) -> Result<FileBinding> {
        let source_error = |e: Error| match e {
            Error::NotFound { .. } => Error::SourceNotFound {
                path: source_path.to_string(),
            },
            Error::NotAFile { .. } => Error::SourceNotAFile {
                path: source_path.to_string(),
            },
            other => other,
        };

        self.ensure_owner_root(owner)?;
        loop {
            let hash = self
                .records
                .read(|view| resolve_file(view, owner, source_path).map(|(_, b)| b.hash))
                .map_err(source_error)?;

            let _stripe = self.locks.lock(&hash);
            let attempt = self.records.with_transaction(|tx| {
                let (_, source) = resolve_file(tx, owner, source_path).map_err(source_error)?;
                if source.hash != hash {
                    return Ok(Attempt::HashChanged);
                }

                let node = namespace::insert(tx, owner, dest_path, NodeKind::File, false)
                    .map_err(Error::into_dest_error)?;
                blocks::acquire(tx, &hash)?;

                let mut account = require_account(tx, owner)?;
                account.storage_saved += source.size;
                tx.update(&account)?;

                tx.create(FileBinding {
                    id: 0,
                    node: node.id,
                    original_name: source.original_name.clone(),
                    hash,
                    declared_mime: source.declared_mime.clone(),
                    sniffed_mime: source.sniffed_mime.clone(),
                    size: source.size,
                    ref_count: 1,
                    dedup: true,
                    downloads: 0,
                    tags: String::new(),
                    created_at: Utc::now(),
                })
                .map(Attempt::Done)
            })?;

            match attempt {
                Attempt::Done(binding) => {
                    info!(owner, source_path, dest_path, %hash, "created hard link");
                    return Ok(binding);
                }
                Attempt::HashChanged => debug!(source_path, "source changed, retrying hard link"),
            }
        }
    }

    /// Create a symlink at `dest_path` whose target is `target`.
    ///
    /// The target is stored verbatim and only resolved when read.
    pub fn soft_link(
        &self,
        owner: OwnerId,
        target: &str,
        dest_path: &str,
    ) -> Result<SymlinkBinding> {
        let link = self.records.with_transaction(|tx| {
            let node = namespace::insert(tx, owner, dest_path, NodeKind::Symlink, false)
                .map_err(Error::into_dest_error)?;
            tx.create(SymlinkBinding {
                id: 0,
                node: node.id,
                target: target.to_string(),
                created_at: Utc::now(),
            })
        })?;
        info!(owner, target, dest_path, "created soft link");
        Ok(link)
    }

    /// Delete the file at `path`.
    ///
    /// Releases the content block; the payload file is removed once the last
    /// binding to it is gone. Deleting the binding that was charged at upload
    /// returns its bytes to the owner's quota.
    pub fn delete_file(&self, owner: OwnerId, path: &str) -> Result<()> {
        self.ensure_owner_root(owner)?;
        loop {
            let hash = self
                .records
                .read(|view| resolve_file(view, owner, path).map(|(_, b)| b.hash))?;

            let _stripe = self.locks.lock(&hash);
            let attempt = self.records.with_transaction(|tx| {
                let (node, mut binding) = resolve_file(tx, owner, path)?;
                if binding.hash != hash {
                    return Ok(Attempt::HashChanged);
                }

                binding.ref_count = binding.ref_count.checked_sub(1).ok_or_else(|| {
                    Error::consistency(format!("binding at {} has zero references", path))
                })?;
                if binding.ref_count > 0 {
                    tx.update(&binding)?;
                    return Ok(Attempt::Done(None));
                }

                let remaining = blocks::release(tx, &hash)?;
                release_binding(tx, &binding)?;
                namespace::remove(tx, &node)?;

                if !binding.dedup {
                    let mut account = require_account(tx, owner)?;
                    account.quota_used =
                        account.quota_used.checked_sub(binding.size).ok_or_else(|| {
                            Error::consistency(format!(
                                "quota underflow for owner {} deleting {}",
                                owner, path
                            ))
                        })?;
                    tx.update(&account)?;
                }

                Ok(Attempt::Done(Some(remaining)))
            })?;

            match attempt {
                Attempt::Done(remaining) => {
                    if remaining == Some(0)
                        && let Err(e) = self.payloads.remove(&hash)
                    {
                        warn!(
                            %hash,
                            error = %e,
                            "failed to remove released payload; gc will reclaim it"
                        );
                    }
                    info!(owner, path, %hash, "deleted file");
                    return Ok(());
                }
                Attempt::HashChanged => debug!(path, "file changed, retrying delete"),
            }
        }
    }

    /// Read a file's binding and content, following symlinks.
    ///
    /// Counts as a download.
    pub fn read_file(&self, owner: OwnerId, path: &str) -> Result<(FileBinding, Vec<u8>)> {
        self.ensure_owner_root(owner)?;
        let binding = self.records.read(|view| {
            let node = namespace::resolve_following(view, owner, path)?;
            if node.kind != NodeKind::File {
                return Err(Error::not_a_file(path));
            }
            namespace::file_binding(view, &node)
        })?;

        let payload = self.fetch_payload(&binding, path)?;
        self.record_download(binding.id);
        Ok((binding, payload))
    }

    /// Read a file by node id on behalf of `requester`.
    ///
    /// Allowed for the owner, or for anyone when the node is public.
    pub fn download(&self, requester: OwnerId, node_id: NodeId) -> Result<(FileBinding, Vec<u8>)> {
        let (node, binding) = self.records.read(|view| {
            let node = view
                .get::<NamespaceNode>(node_id)
                .ok_or_else(|| Error::not_found(format!("node {}", node_id)))?;
            if node.owner != requester && !node.public {
                return Err(Error::AccessDenied { node: node_id });
            }
            if node.kind != NodeKind::File {
                return Err(Error::not_a_file(node.path.clone()));
            }
            let binding = namespace::file_binding(view, &node)?;
            Ok((node, binding))
        })?;

        let payload = self.fetch_payload(&binding, &node.path)?;
        self.record_download(binding.id);
        Ok((binding, payload))
    }

    /// Load a binding's payload, guarding against a concurrent final delete.
    pub(crate) fn fetch_payload(&self, binding: &FileBinding, path: &str) -> Result<Vec<u8>> {
        let _stripe = self.locks.lock(&binding.hash);
        let live = self
            .records
            .read(|view| view.get::<FileBinding>(binding.id).is_some());
        if !live {
            return Err(Error::not_found(path));
        }
        self.payloads.get(&binding.hash)
    }

    /// Increment a binding's download counter. Failures are only logged.
    ///
    /// The counter is not worth a snapshot write of its own; it reaches disk
    /// with the next real commit or when the vault closes.
    fn record_download(&self, binding_id: RecordId) {
        let result = self.records.with_deferred_transaction(|tx| {
            if let Some(mut binding) = tx.get::<FileBinding>(binding_id) {
                binding.downloads += 1;
                tx.update(&binding)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(binding_id, error = %e, "failed to record download");
        }
    }

    /// Target of the symlink at `path`.
    pub fn read_link(&self, owner: OwnerId, path: &str) -> Result<String> {
        self.ensure_owner_root(owner)?;
        self.records
            .read(|view| resolve_symlink(view, owner, path).map(|(_, link)| link.target))
    }

    /// Remove the symlink at `path`. Its target is unaffected.
    pub fn delete_symlink(&self, owner: OwnerId, path: &str) -> Result<()> {
        self.ensure_owner_root(owner)?;
        self.records.with_transaction(|tx| {
            let (node, link) = resolve_symlink(tx, owner, path)?;
            tx.delete::<SymlinkBinding>(link.id)?;
            namespace::remove(tx, &node)
        })?;
        info!(owner, path, "deleted soft link");
        Ok(())
    }

    /// Replace the tag string of the file at `path`.
    pub fn set_tags(&self, owner: OwnerId, path: &str, tags: &str) -> Result<FileBinding> {
        self.ensure_owner_root(owner)?;
        self.records.with_transaction(|tx| {
            let (_, mut binding) = resolve_file(tx, owner, path)?;
            binding.tags = tags.trim().to_string();
            tx.update(&binding)?;
            Ok(binding)
        })
    }

    /// Files visible to `requester` matching the query, ordered by path.
    ///
    /// Visible files are the requester's own plus every public file.
    pub fn search_files(&self, requester: OwnerId, query: &SearchQuery) -> Vec<FileEntry> {
        let name = query.name.as_deref().map(str::to_lowercase);
        let mime_prefix = query.mime_prefix.as_deref();

        self.records.read(|view| {
            let bindings = view.find_many(
                |b: &FileBinding| {
                    name.as_deref()
                        .is_none_or(|name| b.original_name.to_lowercase().contains(name))
                        && mime_prefix.is_none_or(|prefix| b.sniffed_mime.starts_with(prefix))
                },
                crate::record_store::by_id,
                None,
            );

            let mut entries: Vec<FileEntry> = bindings
                .into_iter()
                .filter_map(|binding| {
                    let node = view.get::<NamespaceNode>(binding.node)?;
                    (node.owner == requester || node.public).then_some(FileEntry { node, binding })
                })
                .collect();

            entries.sort_by(|a, b| {
                (a.node.owner, &a.node.path).cmp(&(b.node.owner, &b.node.path))
            });
            if let Some(limit) = query.limit {
                entries.truncate(limit);
            }
            entries
        })
    }
}

/// Delete a binding along with any share grants over it.
fn release_binding<T: Transaction>(tx: &mut T, binding: &FileBinding) -> Result<()> {
    let grants = tx.find_many(
        |g: &ShareGrant| g.binding == binding.id,
        crate::record_store::by_id,
        None,
    );
    for grant in grants {
        tx.delete::<ShareGrant>(grant.id)?;
    }
    tx.delete::<FileBinding>(binding.id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use tempfile::TempDir;

    fn vault_with_owner(quota: u64) -> (TempDir, Vault, OwnerId) {
        let temp_dir = TempDir::new().unwrap();
        let vault = Vault::init(temp_dir.path(), VaultConfig::default()).unwrap();
        let owner = vault.create_account(Some(quota)).unwrap().id;
        (temp_dir, vault, owner)
    }

    #[test]
    fn test_upload_path() {
        assert_eq!(upload_path("/docs", "a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(upload_path("/", "a.txt").unwrap(), "/a.txt");
        assert_eq!(upload_path("docs/", "a.txt").unwrap(), "/docs/a.txt");
        assert!(upload_path("/docs", "a/b").is_err());
        assert!(upload_path("/docs", "..").is_err());
        assert!(upload_path("/docs", "").is_err());
    }

    #[test]
    fn test_upload_records_mime_types() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        let binding = vault
            .upload(owner, "/docs", "r.pdf", b"%PDF-1.4 body", "application/pdf")
            .unwrap();
        assert_eq!(binding.sniffed_mime, "application/pdf");
        assert_eq!(binding.declared_mime, "application/pdf");
        assert_eq!(binding.original_name, "r.pdf");
        assert!(!binding.dedup);

        let guessed = vault.upload(owner, "/docs", "notes.txt", b"plain", "").unwrap();
        assert_eq!(guessed.declared_mime, "text/plain");
    }

    #[test]
    fn test_upload_existing_path_fails_without_side_effects() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.upload(owner, "/", "a.txt", b"first", "").unwrap();

        let result = vault.upload(owner, "/", "a.txt", b"second", "");
        assert!(matches!(result, Err(Error::FileExists { .. })));

        assert!(!vault.payloads().contains(&blocks::hash(b"second")));
        assert_eq!(vault.account(owner).unwrap().quota_used, 5);
    }

    #[test]
    fn test_quota_exceeded_leaves_no_trace() {
        let (_tmp, vault, owner) = vault_with_owner(10);
        let result = vault.upload(owner, "/big", "f.bin", &[7u8; 11], "");
        assert!(matches!(
            result,
            Err(Error::QuotaExceeded {
                used: 0,
                requested: 11,
                max: 10,
                ..
            })
        ));

        assert!(matches!(vault.resolve(owner, "/big"), Err(Error::NotFound { .. })));
        assert!(vault.payloads().list().unwrap().is_empty());
        assert_eq!(vault.account(owner).unwrap().quota_used, 0);
    }

    #[test]
    fn test_dedup_hit_is_free_even_at_full_quota() {
        let (_tmp, vault, owner) = vault_with_owner(10);
        vault.upload(owner, "/", "a", &[1u8; 10], "").unwrap();
        let dup = vault.upload(owner, "/", "b", &[1u8; 10], "").unwrap();
        assert!(dup.dedup);

        let account = vault.account(owner).unwrap();
        assert_eq!(account.quota_used, 10);
        assert_eq!(account.storage_saved, 10);
    }

    #[test]
    fn test_dedup_hit_allowed_when_usage_exceeds_lowered_quota() {
        let (_tmp, vault, owner) = vault_with_owner(100);
        let original = vault.upload(owner, "/", "a", &[4u8; 80], "").unwrap();
        vault.set_quota(owner, 20).unwrap();

        let dup = vault.upload(owner, "/copies", "a", &[4u8; 80], "").unwrap();
        assert!(dup.dedup);
        assert_eq!(dup.hash, original.hash);

        let account = vault.account(owner).unwrap();
        assert_eq!(account.quota_used, 80);
        assert_eq!(account.storage_saved, 80);

        // New bytes are still refused, and never with a zero charge
        assert!(matches!(
            vault.upload(owner, "/", "b", &[5u8; 1], ""),
            Err(Error::QuotaExceeded { requested: 1, used: 80, max: 20, .. })
        ));
    }

    #[test]
    fn test_hard_link_errors() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.upload(owner, "/", "a", b"aaa", "").unwrap();
        vault.insert_directory(owner, "/dir", false).unwrap();

        assert!(matches!(
            vault.hard_link(owner, "/missing", "/x"),
            Err(Error::SourceNotFound { .. })
        ));
        assert!(matches!(
            vault.hard_link(owner, "/dir", "/x"),
            Err(Error::SourceNotAFile { .. })
        ));
        assert!(matches!(
            vault.hard_link(owner, "/a", "/dir"),
            Err(Error::DestExists { .. })
        ));
        assert!(matches!(
            vault.hard_link(owner, "/a", "/a/b"),
            Err(Error::InvalidDestPath { .. })
        ));
        assert!(matches!(
            vault.hard_link(owner, "/a", "/x/../y"),
            Err(Error::InvalidDestPath { .. })
        ));
    }

    #[test]
    fn test_hard_link_survives_source_delete() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.upload(owner, "/", "orig", b"shared bytes", "").unwrap();
        let link = vault.hard_link(owner, "/orig", "/copy").unwrap();
        assert!(link.dedup);
        assert_eq!(link.ref_count, 1);

        vault.delete_file(owner, "/orig").unwrap();
        let (_, bytes) = vault.read_file(owner, "/copy").unwrap();
        assert_eq!(bytes, b"shared bytes");

        // The charged binding is gone, the link never was charged
        assert_eq!(vault.account(owner).unwrap().quota_used, 0);

        vault.delete_file(owner, "/copy").unwrap();
        assert!(vault.payloads().list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_errors() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.insert_directory(owner, "/dir", false).unwrap();
        assert!(matches!(
            vault.delete_file(owner, "/nope"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            vault.delete_file(owner, "/dir"),
            Err(Error::NotAFile { .. })
        ));
    }

    #[test]
    fn test_soft_link_resolution() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.upload(owner, "/data", "file.txt", b"linked", "").unwrap();

        vault.soft_link(owner, "/data/file.txt", "/abs").unwrap();
        vault.soft_link(owner, "file.txt", "/data/rel").unwrap();
        vault.soft_link(owner, "/data", "/dirlink").unwrap();

        assert_eq!(vault.read_file(owner, "/abs").unwrap().1, b"linked");
        assert_eq!(vault.read_file(owner, "/data/rel").unwrap().1, b"linked");
        assert_eq!(vault.read_file(owner, "/dirlink/file.txt").unwrap().1, b"linked");
        assert_eq!(vault.read_link(owner, "/abs").unwrap(), "/data/file.txt");

        assert!(matches!(
            vault.soft_link(owner, "/anything", "/abs"),
            Err(Error::DestExists { .. })
        ));
    }

    #[test]
    fn test_dangling_and_looping_links() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.soft_link(owner, "/nowhere", "/dangling").unwrap();
        vault.soft_link(owner, "/loop_b", "/loop_a").unwrap();
        vault.soft_link(owner, "/loop_a", "/loop_b").unwrap();

        assert!(matches!(
            vault.read_file(owner, "/dangling"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            vault.read_file(owner, "/loop_a"),
            Err(Error::SymlinkLoop { .. })
        ));
    }

    #[test]
    fn test_delete_symlink_keeps_target() {
        let (_tmp, vault, owner) = vault_with_owner(1000);
        vault.upload(owner, "/", "t", b"target", "").unwrap();
        vault.soft_link(owner, "/t", "/l").unwrap();

        assert!(matches!(
            vault.delete_file(owner, "/l"),
            Err(Error::NotAFile { .. })
        ));
        assert!(matches!(
            vault.delete_symlink(owner, "/t"),
            Err(Error::NotASymlink { .. })
        ));

        vault.delete_symlink(owner, "/l").unwrap();
        assert!(vault.resolve(owner, "/l").is_err());
        assert_eq!(vault.read_file(owner, "/t").unwrap().1, b"target");
    }

    #[test]
    fn test_download_access_and_counter() {
        let (_tmp, vault, alice) = vault_with_owner(1000);
        let bob = vault.create_account(None).unwrap().id;

        let binding = vault.upload(alice, "/", "doc", b"secret", "").unwrap();
        assert!(matches!(
            vault.download(bob, binding.node),
            Err(Error::AccessDenied { .. })
        ));

        let (_, bytes) = vault.download(alice, binding.node).unwrap();
        assert_eq!(bytes, b"secret");

        vault.set_visibility(alice, "/doc", true).unwrap();
        let (served, _) = vault.download(bob, binding.node).unwrap();
        assert_eq!(served.id, binding.id);

        let (counted, _) = vault.read_file(alice, "/doc").unwrap();
        assert_eq!(counted.downloads, 2);
    }

    #[test]
    fn test_download_counter_reaches_disk_on_close() {
        let temp_dir = TempDir::new().unwrap();
        let (owner, binding) = {
            let vault = Vault::init(temp_dir.path(), VaultConfig::default()).unwrap();
            let owner = vault.create_account(None).unwrap().id;
            let binding = vault.upload(owner, "/", "doc", b"counted", "").unwrap();
            for _ in 0..3 {
                vault.read_file(owner, "/doc").unwrap();
            }

            // Reads do not rewrite the snapshot
            let snapshot = std::fs::read(temp_dir.path().join("records.json")).unwrap();
            let on_disk: crate::record_store::Tables = serde_json::from_slice(&snapshot).unwrap();
            let stored = on_disk.get::<FileBinding>(binding.id).unwrap();
            assert_eq!(stored.downloads, 0);
            (owner, binding)
        };

        let vault = Vault::open(temp_dir.path()).unwrap();
        let reopened = vault
            .records()
            .read(|view| view.get::<FileBinding>(binding.id))
            .unwrap();
        assert_eq!(reopened.downloads, 3);
        assert_eq!(vault.account(owner).unwrap().quota_used, 7);
    }

    #[test]
    fn test_tags_and_search() {
        let (_tmp, vault, alice) = vault_with_owner(1000);
        let bob = vault.create_account(None).unwrap().id;

        vault.upload(alice, "/", "Report.pdf", b"%PDF-1.7 a", "").unwrap();
        vault.upload(alice, "/", "notes.txt", b"notes", "").unwrap();
        vault.upload(bob, "/", "bob-report.pdf", b"%PDF-1.7 b", "").unwrap();

        let tagged = vault.set_tags(alice, "/notes.txt", " work, todo ").unwrap();
        assert_eq!(tagged.tags, "work, todo");

        let query = SearchQuery {
            name: Some("REPORT".to_string()),
            ..SearchQuery::default()
        };
        let hits = vault.search_files(alice, &query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.path, "/Report.pdf");

        vault.set_visibility(bob, "/bob-report.pdf", true).unwrap();
        let pdfs = vault.search_files(
            alice,
            &SearchQuery {
                mime_prefix: Some("application/".to_string()),
                ..SearchQuery::default()
            },
        );
        assert_eq!(pdfs.len(), 2);

        let limited = vault.search_files(
            alice,
            &SearchQuery {
                limit: Some(1),
                ..SearchQuery::default()
            },
        );
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_unknown_owner_upload() {
        let (_tmp, vault, _owner) = vault_with_owner(1000);
        assert!(matches!(
            vault.upload(404, "/", "f", b"x", ""),
            Err(Error::UnknownOwner { owner: 404 })
        ));
        assert!(vault.payloads().list().unwrap().is_empty());
    }
}
