//! Importing local files and directory trees.

use crate::error::{Error, Result};
use crate::namespace::{join_path, split_path};
use crate::record_store::RecordStore;
use crate::records::OwnerId;
use crate::vault::Vault;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Summary of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Files that were dedup hits.
    pub dedup_hits: usize,
    /// Entries that could not be represented (symlinks, non-UTF-8 names).
    pub skipped: usize,
}

impl<S: RecordStore> Vault<S> {
    /// Import a local file or directory into `dest_dir`.
    ///
    /// A directory is imported recursively as `dest_dir/{name}`, respecting
    /// `.gitignore` files. Local symlinks are skipped. Each file is a
    /// separate upload, so a failure stops the import but keeps the files
    /// already stored.
    pub fn import_path(&self, owner: OwnerId, local: &Path, dest_dir: &str) -> Result<ImportStats> {
        if !local.exists() {
            return Err(Error::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Path does not exist: {}", local.display()),
                ),
            });
        }

        let base = format!("/{}", split_path(dest_dir)?.join("/"));
        let mut stats = ImportStats::default();
        let metadata = fs::metadata(local)?;

        if metadata.is_file() {
            let name = file_name(local)?;
            self.import_file(owner, local, &base, &name, &mut stats)?;
        } else if metadata.is_dir() {
            self.import_directory(owner, local, &base, &mut stats)?;
        } else {
            return Err(Error::invalid_path(
                local.display().to_string(),
                "unsupported file type",
            ));
        }

        info!(
            owner,
            local = %local.display(),
            dest_dir = %base,
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            "import finished"
        );
        Ok(stats)
    }

    fn import_file(
        &self,
        owner: OwnerId,
        local: &Path,
        dir: &str,
        name: &str,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let payload = fs::read(local)?;
        let binding = self.upload(owner, dir, name, &payload, "")?;
        stats.files += 1;
        stats.bytes += binding.size;
        if binding.dedup {
            stats.dedup_hits += 1;
        }
        Ok(())
    }

    fn import_directory(
        &self,
        owner: OwnerId,
        local: &Path,
        dest: &str,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let top = join_path(dest, &file_name(local)?);
        self.insert_directory(owner, &top, false)?;
        stats.directories += 1;

        let walker = ignore::WalkBuilder::new(local)
            .hidden(false) // Include hidden files
            .git_ignore(true) // Respect .gitignore
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry?;
            let entry_path = entry.path();
            if entry.depth() == 0 {
                continue;
            }

            let Some(relative) = entry_path
                .strip_prefix(local)
                .ok()
                .and_then(|rel| rel.to_str())
                .map(|rel| rel.replace(std::path::MAIN_SEPARATOR, "/"))
            else {
                warn!(path = %entry_path.display(), "skipping entry with non UTF-8 name");
                stats.skipped += 1;
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_some_and(|t| t.is_symlink()) {
                warn!(path = %entry_path.display(), "skipping symlink");
                stats.skipped += 1;
            } else if file_type.is_some_and(|t| t.is_dir()) {
                self.insert_directory(owner, &join_path(&top, &relative), false)?;
                stats.directories += 1;
            } else if file_type.is_some_and(|t| t.is_file()) {
                let full = join_path(&top, &relative);
                let (dir, name) = full.rsplit_once('/').unwrap_or(("", full.as_str()));
                self.import_file(owner, entry_path, dir, name, stats)?;
            }
        }

        Ok(())
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_path(path.display().to_string(), "no usable file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use tempfile::TempDir;

    fn vault() -> (TempDir, Vault, OwnerId) {
        let temp_dir = TempDir::new().unwrap();
        let vault = Vault::init(temp_dir.path().join("vault"), VaultConfig::default()).unwrap();
        let owner = vault.create_account(None).unwrap().id;
        (temp_dir, vault, owner)
    }

    #[test]
    fn test_import_single_file() {
        let (tmp, vault, owner) = vault();
        let local = tmp.path().join("hello.txt");
        fs::write(&local, b"hello").unwrap();

        let stats = vault.import_path(owner, &local, "/inbox").unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 5);

        let (_, bytes) = vault.read_file(owner, "/inbox/hello.txt").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_import_directory_tree() {
        let (tmp, vault, owner) = vault();
        let src = tmp.path().join("project");
        fs::create_dir_all(src.join("sub/deeper")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("a.txt"), b"same").unwrap();
        fs::write(src.join("sub/b.txt"), b"same").unwrap();
        fs::write(src.join("sub/deeper/c.txt"), b"other").unwrap();

        let stats = vault.import_path(owner, &src, "/").unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 4);
        assert_eq!(stats.dedup_hits, 1);

        assert_eq!(
            vault.read_file(owner, "/project/sub/deeper/c.txt").unwrap().1,
            b"other"
        );
        assert!(vault.resolve(owner, "/project/empty").is_ok());
    }

    #[test]
    fn test_import_respects_gitignore() {
        let (tmp, vault, owner) = vault();
        let src = tmp.path().join("repo");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(".gitignore"), "*.log\n").unwrap();
        fs::write(src.join("keep.txt"), b"keep").unwrap();
        fs::write(src.join("debug.log"), b"noise").unwrap();

        vault.import_path(owner, &src, "/").unwrap();
        assert!(vault.resolve(owner, "/repo/keep.txt").is_ok());
        assert!(vault.resolve(owner, "/repo/.gitignore").is_ok());
        assert!(vault.resolve(owner, "/repo/debug.log").is_err());
    }

    #[test]
    fn test_import_missing_path() {
        let (tmp, vault, owner) = vault();
        assert!(vault
            .import_path(owner, &tmp.path().join("absent"), "/")
            .is_err());
    }
}
