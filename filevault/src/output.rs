//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use chrono::{DateTime, Utc};
use filevault_core::{
    ConsistencyReport, ContentHash, DedupStats, FileBinding, ImportStats, ListEntry,
    NamespaceNode, OwnerAccount, RecordId, ShareGrant,
};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write raw file content to stdout, bypassing formatting.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut handle = self.stdout.lock();
        handle.write_all(bytes)?;
        handle.flush()?;
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub algorithm: String,
    pub default_quota: u64,
}

/// Account summary.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub owner: RecordId,
    pub quota_used: u64,
    pub quota_max: u64,
    pub quota_remaining: u64,
    pub storage_saved: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&OwnerAccount> for AccountInfo {
    fn from(account: &OwnerAccount) -> Self {
        Self {
            owner: account.id,
            quota_used: account.quota_used,
            quota_max: account.quota_max,
            quota_remaining: account.quota_remaining(),
            storage_saved: account.storage_saved,
            created_at: account.created_at,
        }
    }
}

impl AccountInfo {
    pub fn text_line(&self) -> String {
        format!(
            "owner {}: {} / {} bytes used, {} bytes saved\n",
            self.owner, self.quota_used, self.quota_max, self.storage_saved
        )
    }
}

/// Output for `account create`, `account show` and `account quota`.
#[derive(Debug, Serialize)]
pub struct AccountOutput {
    pub success: bool,
    pub result_code: u8,
    pub account: AccountInfo,
}

/// Output for `account list`.
#[derive(Debug, Serialize)]
pub struct AccountListOutput {
    pub success: bool,
    pub result_code: u8,
    pub accounts: Vec<AccountInfo>,
}

/// A namespace node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: RecordId,
    pub path: String,
    pub kind: String,
    pub public: bool,
}

impl From<&NamespaceNode> for NodeInfo {
    fn from(node: &NamespaceNode) -> Self {
        Self {
            id: node.id,
            path: node.path.clone(),
            kind: node.kind.as_str().to_string(),
            public: node.public,
        }
    }
}

/// Output for `mkdir` and `visibility`.
#[derive(Debug, Serialize)]
pub struct NodeOutput {
    pub success: bool,
    pub result_code: u8,
    pub node: NodeInfo,
}

/// A stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub node: RecordId,
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
    pub dedup: bool,
    pub declared_mime: String,
    pub sniffed_mime: String,
    pub downloads: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tags: String,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, binding: &FileBinding) -> Self {
        Self {
            node: binding.node,
            path: path.into(),
            hash: binding.hash,
            size: binding.size,
            dedup: binding.dedup,
            declared_mime: binding.declared_mime.clone(),
            sniffed_mime: binding.sniffed_mime.clone(),
            downloads: binding.downloads,
            tags: binding.tags.clone(),
        }
    }
}

/// Output for `upload`, `ln` (hard) and `tag`.
#[derive(Debug, Serialize)]
pub struct FileOutput {
    pub success: bool,
    pub result_code: u8,
    pub file: FileInfo,
}

/// Output for `import`.
#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub success: bool,
    pub result_code: u8,
    pub source: String,
    pub dest_dir: String,
    #[serde(flatten)]
    pub stats: ImportStats,
}

/// One entry of `ls`.
#[derive(Debug, Clone, Serialize)]
pub struct LsEntry {
    pub name: String,
    pub path: String,
    pub kind: String,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl From<&ListEntry> for LsEntry {
    fn from(entry: &ListEntry) -> Self {
        let node = entry.node();
        let (size, hash, target) = match entry {
            ListEntry::Directory(_) => (None, None, None),
            ListEntry::File { binding, .. } => (Some(binding.size), Some(binding.hash), None),
            ListEntry::Symlink { target, .. } => (None, None, Some(target.clone())),
        };
        Self {
            name: node.name.clone(),
            path: node.path.clone(),
            kind: node.kind.as_str().to_string(),
            public: node.public,
            size,
            hash,
            target,
        }
    }
}

/// Output for `ls`.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub entries: Vec<LsEntry>,
}

/// Output for `rm` and `rmdir`.
#[derive(Debug, Serialize)]
pub struct RemoveOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub kind: String,
}

/// Output for `ln -s` and `readlink`.
#[derive(Debug, Serialize)]
pub struct SymlinkOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub target: String,
}

/// A share grant.
#[derive(Debug, Clone, Serialize)]
pub struct ShareInfo {
    pub token: String,
    pub binding: RecordId,
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&ShareGrant> for ShareInfo {
    fn from(grant: &ShareGrant) -> Self {
        Self {
            token: grant.token.clone(),
            binding: grant.binding,
            protected: grant.password_hash.is_some(),
            expires_at: grant.expires_at,
            downloads: grant.downloads,
            created_at: grant.created_at,
        }
    }
}

impl ShareInfo {
    pub fn text_line(&self) -> String {
        let expiry = self
            .expires_at
            .map(|t| format!(" expires {}", t.to_rfc3339()))
            .unwrap_or_default();
        let lock = if self.protected { " (password)" } else { "" };
        format!(
            "{} binding {} downloads {}{}{}\n",
            self.token, self.binding, self.downloads, lock, expiry
        )
    }
}

/// Output for `share create`.
#[derive(Debug, Serialize)]
pub struct ShareOutput {
    pub success: bool,
    pub result_code: u8,
    pub share: ShareInfo,
}

/// Output for `share list`.
#[derive(Debug, Serialize)]
pub struct ShareListOutput {
    pub success: bool,
    pub result_code: u8,
    pub shares: Vec<ShareInfo>,
}

/// Output for `share get` and `download` when writing to a file.
#[derive(Debug, Serialize)]
pub struct SavedOutput {
    pub success: bool,
    pub result_code: u8,
    pub destination: String,
    pub size: u64,
    pub hash: ContentHash,
}

/// Output for `stats`.
#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub stats: DedupStats,
    pub efficiency: String,
}

/// Output for `gc` command.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub dry_run: bool,
    pub objects_deleted: usize,
    pub bytes_freed: u64,
}

/// Output for `fsck`.
#[derive(Debug, Serialize)]
pub struct FsckOutput {
    pub success: bool,
    pub result_code: u8,
    pub healthy: bool,
    #[serde(flatten)]
    pub report: ConsistencyReport,
}

/// Output for `search`.
#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub success: bool,
    pub result_code: u8,
    pub files: Vec<FileInfo>,
}
