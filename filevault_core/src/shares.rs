//! Share grants: capability tokens over a single file.
//!
//! A token is 32 random bytes, hex-encoded. Grants may carry an Argon2
//! password hash and an expiry. Expired grants are kept and rejected at use.

use crate::error::{Error, Result};
use crate::namespace;
use crate::record_store::{RecordStore, Transaction, View, by_id};
use crate::records::{FileBinding, NamespaceNode, NodeKind, OwnerId, ShareGrant};
use crate::vault::Vault;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

const TOKEN_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

/// A file served through a share grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub grant: ShareGrant,
    pub binding: FileBinding,
    pub payload: Vec<u8>,
}

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut bytes)?;
    Ok(hex::encode(bytes))
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_BYTES];
    getrandom::getrandom(&mut salt)?;
    let salt = SaltString::encode_b64(&salt)?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

impl<S: RecordStore> Vault<S> {
    /// Share the file at `path`.
    ///
    /// An empty password is the same as none. `expires_in` is measured from
    /// now.
    pub fn create_grant(
        &self,
        owner: OwnerId,
        path: &str,
        password: Option<&str>,
        expires_in: Option<Duration>,
    ) -> Result<ShareGrant> {
        let password_hash = match password.filter(|p| !p.is_empty()) {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };
        let token = generate_token()?;
        let now = Utc::now();

        self.ensure_owner_root(owner)?;
        let grant = self.records.with_transaction(|tx| {
            let node = namespace::resolve(tx, owner, path)?;
            if node.kind != NodeKind::File {
                return Err(Error::not_a_file(path));
            }
            let binding = namespace::file_binding(tx, &node)?;

            tx.create(ShareGrant {
                id: 0,
                binding: binding.id,
                owner,
                token,
                password_hash,
                expires_at: expires_in.map(|d| now + d),
                downloads: 0,
                created_at: now,
            })
        })?;

        info!(
            owner,
            path,
            protected = grant.password_hash.is_some(),
            expires_at = ?grant.expires_at,
            "created share grant"
        );
        Ok(grant)
    }

    /// Serve the file behind `token`.
    pub fn lookup_grant(&self, token: &str, password: Option<&str>) -> Result<SharedFile> {
        self.lookup_grant_at(token, password, Utc::now())
    }

    /// Serve the file behind `token`, judging expiry at `now`.
    pub fn lookup_grant_at(
        &self,
        token: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SharedFile> {
        let grant: ShareGrant = self
            .records
            .read(|view| view.find_by_key(token))
            .ok_or(Error::ShareNotFound)?;

        if grant.is_expired_at(now) {
            debug!(grant = grant.id, "rejected expired share");
            return Err(Error::ShareExpired);
        }

        if let Some(stored) = &grant.password_hash {
            let password = password
                .filter(|p| !p.is_empty())
                .ok_or(Error::PasswordRequired)?;
            if !verify_password(password, stored)? {
                return Err(Error::InvalidPassword);
            }
        }

        let (binding, node) = self
            .records
            .read(|view| {
                let binding = view.get::<FileBinding>(grant.binding)?;
                let node = view.get::<NamespaceNode>(binding.node)?;
                Some((binding, node))
            })
            .ok_or(Error::ShareNotFound)?;

        let payload = self.fetch_payload(&binding, &node.path)?;

        let counted = self.records.with_deferred_transaction(|tx| {
            let current = tx.get::<ShareGrant>(grant.id);
            if let Some(mut current) = current {
                current.downloads += 1;
                tx.update(&current)?;
                return Ok(current);
            }
            Ok(grant.clone())
        });
        let grant = match counted {
            Ok(grant) => grant,
            Err(e) => {
                warn!(grant = grant.id, error = %e, "failed to count share download");
                grant
            }
        };

        Ok(SharedFile {
            grant,
            binding,
            payload,
        })
    }

    /// Every grant created by `owner`, oldest first.
    pub fn grants_for(&self, owner: OwnerId) -> Vec<ShareGrant> {
        self.records
            .read(|view| view.find_many(|g: &ShareGrant| g.owner == owner, by_id, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use tempfile::TempDir;

    fn vault_with_file() -> (TempDir, Vault, OwnerId) {
        let temp_dir = TempDir::new().unwrap();
        let vault = Vault::init(temp_dir.path(), VaultConfig::default()).unwrap();
        let owner = vault.create_account(None).unwrap().id;
        vault
            .upload(owner, "/docs", "plan.txt", b"the plan", "text/plain")
            .unwrap();
        (temp_dir, vault, owner)
    }

    #[test]
    fn test_token_shape() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_hash_verifies() {
        let stored = hash_password("hunter2").unwrap();
        assert!(stored.starts_with("$argon2"));
        assert!(verify_password("hunter2", &stored).unwrap());
        assert!(!verify_password("hunter3", &stored).unwrap());
    }

    #[test]
    fn test_open_share() {
        let (_tmp, vault, owner) = vault_with_file();
        let grant = vault.create_grant(owner, "/docs/plan.txt", None, None).unwrap();
        assert!(grant.password_hash.is_none());

        let shared = vault.lookup_grant(&grant.token, None).unwrap();
        assert_eq!(shared.payload, b"the plan");
        assert_eq!(shared.grant.downloads, 1);

        let again = vault.lookup_grant(&grant.token, Some("ignored")).unwrap();
        assert_eq!(again.grant.downloads, 2);
        assert_eq!(vault.grants_for(owner).len(), 1);
    }

    #[test]
    fn test_password_share() {
        let (_tmp, vault, owner) = vault_with_file();
        let grant = vault
            .create_grant(owner, "/docs/plan.txt", Some("s3cret"), None)
            .unwrap();

        assert!(matches!(
            vault.lookup_grant(&grant.token, None),
            Err(Error::PasswordRequired)
        ));
        assert!(matches!(
            vault.lookup_grant(&grant.token, Some("")),
            Err(Error::PasswordRequired)
        ));
        assert!(matches!(
            vault.lookup_grant(&grant.token, Some("wrong")),
            Err(Error::InvalidPassword)
        ));
        assert!(vault.lookup_grant(&grant.token, Some("s3cret")).is_ok());
    }

    #[test]
    fn test_expired_share() {
        let (_tmp, vault, owner) = vault_with_file();
        let grant = vault
            .create_grant(owner, "/docs/plan.txt", None, Some(Duration::hours(1)))
            .unwrap();
        let expires_at = grant.expires_at.unwrap();

        assert!(vault
            .lookup_grant_at(&grant.token, None, expires_at - Duration::seconds(1))
            .is_ok());
        assert!(matches!(
            vault.lookup_grant_at(&grant.token, None, expires_at),
            Err(Error::ShareExpired)
        ));

        // Still listed after expiry
        assert_eq!(vault.grants_for(owner).len(), 1);
    }

    #[test]
    fn test_share_errors() {
        let (_tmp, vault, owner) = vault_with_file();
        assert!(matches!(
            vault.lookup_grant("deadbeef", None),
            Err(Error::ShareNotFound)
        ));
        assert!(matches!(
            vault.create_grant(owner, "/docs", None, None),
            Err(Error::NotAFile { .. })
        ));
        assert!(matches!(
            vault.create_grant(owner, "/docs/missing", None, None),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_deleting_file_revokes_grants() {
        let (_tmp, vault, owner) = vault_with_file();
        let grant = vault.create_grant(owner, "/docs/plan.txt", None, None).unwrap();

        vault.delete_file(owner, "/docs/plan.txt").unwrap();
        assert!(matches!(
            vault.lookup_grant(&grant.token, None),
            Err(Error::ShareNotFound)
        ));
        assert!(vault.grants_for(owner).is_empty());
    }
}
