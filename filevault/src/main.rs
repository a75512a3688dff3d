mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use filevault_core::{
    Algorithm, Error as VaultError, NodeKind, OwnerId, SearchQuery, Vault, VaultConfig,
};
use output::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// FileVault - A deduplicating, content-addressed file vault
#[derive(Parser)]
#[command(name = "filevault")]
#[command(about = "Deduplicating file vault with a per-owner namespace", long_about = None)]
#[command(version)]
struct Cli {
    /// Vault root directory
    #[arg(
        short,
        long,
        global = true,
        env = "FILEVAULT_ROOT",
        default_value = "./filevault-store"
    )]
    root: PathBuf,

    /// Owner (account id) to act as
    #[arg(short, long, global = true, env = "FILEVAULT_OWNER")]
    owner: Option<OwnerId>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new vault
    Init {
        /// Hash algorithm to use
        #[arg(long, default_value = "blake3-256")]
        algo: String,

        /// Quota in bytes for accounts created without one
        #[arg(long)]
        default_quota: Option<u64>,

        /// Payloads at least this large are zstd-compressed
        #[arg(long)]
        compression_threshold: Option<usize>,
    },

    /// Manage owner accounts
    #[command(subcommand)]
    Account(AccountCommands),

    /// Create a directory and any missing parents
    Mkdir {
        path: String,

        /// Make the directory public
        #[arg(long)]
        public: bool,
    },

    /// Upload a local file into a vault directory
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Destination directory
        #[arg(default_value = "/")]
        dir: String,

        /// File name in the vault (defaults to the local name)
        #[arg(long)]
        name: Option<String>,

        /// Declared MIME type (guessed from the name if omitted)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Import a local file or directory tree
    Import {
        /// Local path to import
        path: PathBuf,

        /// Destination directory
        #[arg(default_value = "/")]
        dir: String,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Show detailed information
        #[arg(short, long)]
        long: bool,
    },

    /// Output a file's content, following symlinks
    Cat {
        path: String,

        /// Write to this local file instead of stdout
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Fetch a file by node id (own or public files)
    Download {
        node: u64,

        /// Write to this local file instead of stdout
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Delete a file or symlink
    Rm { path: String },

    /// Delete an empty directory
    Rmdir { path: String },

    /// Create a hard link, or a symlink with -s
    Ln {
        /// Source path (symlink target with -s)
        source: String,

        /// Path of the new link
        dest: String,

        /// Create a symbolic link
        #[arg(short, long)]
        symbolic: bool,
    },

    /// Print a symlink's target
    Readlink { path: String },

    /// Replace a file's tags
    Tag { path: String, tags: String },

    /// Make a node public or private
    Visibility {
        path: String,

        #[arg(value_enum)]
        level: Visibility,
    },

    /// Search own and public files
    Search {
        /// Case-insensitive substring of the file name
        #[arg(long)]
        name: Option<String>,

        /// Prefix of the detected MIME type
        #[arg(long)]
        mime: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage share grants
    #[command(subcommand)]
    Share(ShareCommands),

    /// Show deduplication statistics
    Stats,

    /// Garbage collect orphan payload files
    Gc {
        /// Dry run - show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify reference counts and quota bookkeeping
    Fsck,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create an account
    Create {
        /// Quota in bytes (defaults to the vault's default quota)
        #[arg(long)]
        quota: Option<u64>,
    },

    /// List all accounts
    List,

    /// Show the current owner's account
    Show,

    /// Set the current owner's quota
    Quota { max: u64 },
}

#[derive(Subcommand)]
enum ShareCommands {
    /// Share a file
    Create {
        path: String,

        /// Require this password to download
        #[arg(long)]
        password: Option<String>,

        /// Expire after this many hours
        #[arg(long)]
        expires_hours: Option<i64>,
    },

    /// Download a shared file by token
    Get {
        token: String,

        #[arg(long)]
        password: Option<String>,

        /// Write to this local file instead of stdout
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// List the current owner's shares
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Visibility {
    Public,
    Private,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = result_code(&e);
            output.write_error(&e, code);
            ExitCode::from(code)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Map an error to the process exit code.
fn result_code(error: &anyhow::Error) -> u8 {
    let Some(error) = error.chain().find_map(|e| e.downcast_ref::<VaultError>()) else {
        return 1;
    };
    match error {
        VaultError::NotFound { .. }
        | VaultError::SourceNotFound { .. }
        | VaultError::ShareNotFound
        | VaultError::UnknownOwner { .. } => 2,
        VaultError::FileExists { .. }
        | VaultError::DestExists { .. }
        | VaultError::DirectoryNotEmpty { .. }
        | VaultError::VaultLocked { .. } => 3,
        VaultError::QuotaExceeded { .. } => 4,
        VaultError::AccessDenied { .. }
        | VaultError::ShareExpired
        | VaultError::PasswordRequired
        | VaultError::InvalidPassword => 5,
        VaultError::InvalidPath { .. }
        | VaultError::InvalidDestPath { .. }
        | VaultError::FileIsNotADirectory { .. }
        | VaultError::NotAFile { .. }
        | VaultError::NotADirectory { .. }
        | VaultError::NotASymlink { .. }
        | VaultError::SourceNotAFile { .. }
        | VaultError::SymlinkLoop { .. } => 6,
        e if e.is_consistency_violation() => 7,
        VaultError::CorruptedObject { .. } => 7,
        _ => 1,
    }
}

fn run(cli: Cli, out: &OutputWriter) -> Result<u8> {
    let root = cli.root.as_path();
    let owner = cli.owner;

    match cli.command {
        Commands::Init {
            algo,
            default_quota,
            compression_threshold,
        } => cmd_init(out, root, &algo, default_quota, compression_threshold)?,
        Commands::Account(command) => match command {
            AccountCommands::Create { quota } => cmd_account_create(out, root, quota)?,
            AccountCommands::List => cmd_account_list(out, root)?,
            AccountCommands::Show => cmd_account_show(out, root, require_owner(owner)?)?,
            AccountCommands::Quota { max } => {
                cmd_account_quota(out, root, require_owner(owner)?, max)?
            }
        },
        Commands::Mkdir { path, public } => {
            cmd_mkdir(out, root, require_owner(owner)?, &path, public)?
        }
        Commands::Upload {
            file,
            dir,
            name,
            mime,
        } => cmd_upload(out, root, require_owner(owner)?, &file, &dir, name, mime)?,
        Commands::Import { path, dir } => {
            cmd_import(out, root, require_owner(owner)?, &path, &dir)?
        }
        Commands::Ls { path, long } => cmd_ls(out, root, require_owner(owner)?, &path, long)?,
        Commands::Cat { path, output } => cmd_cat(out, root, require_owner(owner)?, &path, output)?,
        Commands::Download { node, output } => {
            cmd_download(out, root, require_owner(owner)?, node, output)?
        }
        Commands::Rm { path } => cmd_rm(out, root, require_owner(owner)?, &path)?,
        Commands::Rmdir { path } => cmd_rmdir(out, root, require_owner(owner)?, &path)?,
        Commands::Ln {
            source,
            dest,
            symbolic,
        } => cmd_ln(out, root, require_owner(owner)?, &source, &dest, symbolic)?,
        Commands::Readlink { path } => cmd_readlink(out, root, require_owner(owner)?, &path)?,
        Commands::Tag { path, tags } => cmd_tag(out, root, require_owner(owner)?, &path, &tags)?,
        Commands::Visibility { path, level } => {
            cmd_visibility(out, root, require_owner(owner)?, &path, level)?
        }
        Commands::Search { name, mime, limit } => {
            let query = SearchQuery {
                name,
                mime_prefix: mime,
                limit,
            };
            cmd_search(out, root, require_owner(owner)?, &query)?
        }
        Commands::Share(command) => match command {
            ShareCommands::Create {
                path,
                password,
                expires_hours,
            } => cmd_share_create(
                out,
                root,
                require_owner(owner)?,
                &path,
                password.as_deref(),
                expires_hours,
            )?,
            ShareCommands::Get {
                token,
                password,
                output,
            } => cmd_share_get(out, root, &token, password.as_deref(), output)?,
            ShareCommands::List => cmd_share_list(out, root, require_owner(owner)?)?,
        },
        Commands::Stats => cmd_stats(out, root)?,
        Commands::Gc { dry_run } => cmd_gc(out, root, dry_run)?,
        Commands::Fsck => return cmd_fsck(out, root),
    }

    Ok(0)
}

fn require_owner(owner: Option<OwnerId>) -> Result<OwnerId> {
    owner.context("No owner given (use --owner or set FILEVAULT_OWNER)")
}

fn open_vault(root: &Path) -> Result<Vault> {
    Vault::open(root).with_context(|| format!("Failed to open vault at {}", root.display()))
}

/// Write fetched content to `output`, or to stdout when none is given.
fn emit_content(
    out: &OutputWriter,
    bytes: &[u8],
    hash: filevault_core::ContentHash,
    output: Option<PathBuf>,
) -> Result<()> {
    let Some(dest) = output else {
        if out.is_json() {
            anyhow::bail!("File content cannot be printed as JSON (use --output)");
        }
        return out.write_bytes(bytes);
    };

    fs::write(&dest, bytes).with_context(|| format!("Failed to write {}", dest.display()))?;
    let data = SavedOutput {
        success: true,
        result_code: 0,
        destination: dest.display().to_string(),
        size: bytes.len() as u64,
        hash,
    };
    out.write(&data, || {
        format!("Wrote {} bytes to {}\n", data.size, data.destination)
    })
}

fn cmd_init(
    out: &OutputWriter,
    root: &Path,
    algo: &str,
    default_quota: Option<u64>,
    compression_threshold: Option<usize>,
) -> Result<()> {
    let mut config = VaultConfig {
        algorithm: Algorithm::parse(algo)?,
        ..VaultConfig::default()
    };
    if let Some(quota) = default_quota {
        config.default_quota = quota;
    }
    if let Some(threshold) = compression_threshold {
        config.compression_threshold = threshold;
    }

    let vault = Vault::init(root, config)
        .with_context(|| format!("Failed to initialize vault at {}", root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        algorithm: vault.config().algorithm.as_str().to_string(),
        default_quota: vault.config().default_quota,
    };
    out.write(&data, || {
        format!(
            "Initialized vault at {}\nAlgorithm: {}\nDefault quota: {} bytes\n",
            data.root, data.algorithm, data.default_quota
        )
    })
}

fn cmd_account_create(out: &OutputWriter, root: &Path, quota: Option<u64>) -> Result<()> {
    let vault = open_vault(root)?;
    let account = vault
        .create_account(quota)
        .with_context(|| "Failed to create account")?;

    let data = AccountOutput {
        success: true,
        result_code: 0,
        account: AccountInfo::from(&account),
    };
    out.write(&data, || {
        format!(
            "Created owner {} with quota {} bytes\n",
            data.account.owner, data.account.quota_max
        )
    })
}

fn cmd_account_list(out: &OutputWriter, root: &Path) -> Result<()> {
    let vault = open_vault(root)?;
    let accounts: Vec<AccountInfo> = vault.list_accounts().iter().map(AccountInfo::from).collect();

    let data = AccountListOutput {
        success: true,
        result_code: 0,
        accounts,
    };
    out.write(&data, || {
        if data.accounts.is_empty() {
            "No accounts (use 'filevault account create' to add one)\n".to_string()
        } else {
            data.accounts.iter().map(AccountInfo::text_line).collect()
        }
    })
}

fn cmd_account_show(out: &OutputWriter, root: &Path, owner: OwnerId) -> Result<()> {
    let vault = open_vault(root)?;
    let account = vault.account(owner)?;

    let data = AccountOutput {
        success: true,
        result_code: 0,
        account: AccountInfo::from(&account),
    };
    out.write(&data, || data.account.text_line())
}

fn cmd_account_quota(out: &OutputWriter, root: &Path, owner: OwnerId, max: u64) -> Result<()> {
    let vault = open_vault(root)?;
    let account = vault
        .set_quota(owner, max)
        .with_context(|| format!("Failed to set quota for owner {}", owner))?;

    let data = AccountOutput {
        success: true,
        result_code: 0,
        account: AccountInfo::from(&account),
    };
    out.write(&data, || data.account.text_line())
}

fn cmd_mkdir(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    path: &str,
    public: bool,
) -> Result<()> {
    let vault = open_vault(root)?;
    let node = vault
        .insert_directory(owner, path, public)
        .with_context(|| format!("Failed to create directory {}", path))?;

    let data = NodeOutput {
        success: true,
        result_code: 0,
        node: NodeInfo::from(&node),
    };
    out.write(&data, || format!("{}\n", data.node.path))
}

fn cmd_upload(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    file: &Path,
    dir: &str,
    name: Option<String>,
    mime: Option<String>,
) -> Result<()> {
    let vault = open_vault(root)?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a file name from {}", file.display()))?,
    };
    let payload = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let binding = vault
        .upload(owner, dir, &name, &payload, mime.as_deref().unwrap_or(""))
        .with_context(|| format!("Failed to upload {}", file.display()))?;
    let path = filevault_core::upload_path(dir, &name)?;

    let data = FileOutput {
        success: true,
        result_code: 0,
        file: FileInfo::new(path, &binding),
    };
    out.write(&data, || {
        let dedup = if data.file.dedup { " (dedup)" } else { "" };
        format!("{} {}{}\n", data.file.hash, data.file.path, dedup)
    })
}

fn cmd_import(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    path: &Path,
    dir: &str,
) -> Result<()> {
    let vault = open_vault(root)?;
    let stats = vault
        .import_path(owner, path, dir)
        .with_context(|| format!("Failed to import {}", path.display()))?;

    let data = ImportOutput {
        success: true,
        result_code: 0,
        source: path.display().to_string(),
        dest_dir: dir.to_string(),
        stats,
    };
    out.write(&data, || {
        format!(
            "Imported {} files and {} directories ({} bytes, {} dedup hits, {} skipped)\n",
            data.stats.files,
            data.stats.directories,
            data.stats.bytes,
            data.stats.dedup_hits,
            data.stats.skipped
        )
    })
}

fn cmd_ls(out: &OutputWriter, root: &Path, owner: OwnerId, path: &str, long: bool) -> Result<()> {
    let vault = open_vault(root)?;
    let entries: Vec<LsEntry> = vault
        .list_children(owner, path)
        .with_context(|| format!("Failed to list {}", path))?
        .iter()
        .map(LsEntry::from)
        .collect();

    let data = LsOutput {
        success: true,
        result_code: 0,
        path: path.to_string(),
        entries,
    };
    out.write(&data, || {
        let mut text = String::new();
        for entry in &data.entries {
            if long {
                let type_char = match entry.kind.as_str() {
                    "directory" => 'd',
                    "symlink" => 'l',
                    _ => 'f',
                };
                let visibility = if entry.public { "public " } else { "private" };
                let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
                text.push_str(&format!(
                    "{} {} {:>10} {}",
                    type_char, visibility, size, entry.name
                ));
                if let Some(target) = &entry.target {
                    text.push_str(&format!(" -> {}", target));
                }
                text.push('\n');
            } else {
                text.push_str(&entry.name);
                text.push('\n');
            }
        }
        text
    })
}

fn cmd_cat(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    path: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let vault = open_vault(root)?;
    let (binding, bytes) = vault
        .read_file(owner, path)
        .with_context(|| format!("Failed to read {}", path))?;
    emit_content(out, &bytes, binding.hash, output)
}

fn cmd_download(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    node: u64,
    output: Option<PathBuf>,
) -> Result<()> {
    let vault = open_vault(root)?;
    let (binding, bytes) = vault
        .download(owner, node)
        .with_context(|| format!("Failed to download node {}", node))?;
    emit_content(out, &bytes, binding.hash, output)
}

fn cmd_rm(out: &OutputWriter, root: &Path, owner: OwnerId, path: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let node = vault.resolve(owner, path)?;
    let removed = match node.kind {
        NodeKind::File => vault.delete_file(owner, path),
        NodeKind::Symlink => vault.delete_symlink(owner, path),
        NodeKind::Directory => {
            anyhow::bail!("{} is a directory (use 'filevault rmdir')", node.path)
        }
    };
    removed.with_context(|| format!("Failed to remove {}", path))?;

    let data = RemoveOutput {
        success: true,
        result_code: 0,
        path: node.path,
        kind: node.kind.as_str().to_string(),
    };
    out.write(&data, || format!("Removed {}\n", data.path))
}

fn cmd_rmdir(out: &OutputWriter, root: &Path, owner: OwnerId, path: &str) -> Result<()> {
    let vault = open_vault(root)?;
    vault
        .remove_directory(owner, path)
        .with_context(|| format!("Failed to remove directory {}", path))?;

    let data = RemoveOutput {
        success: true,
        result_code: 0,
        path: path.to_string(),
        kind: NodeKind::Directory.as_str().to_string(),
    };
    out.write(&data, || format!("Removed {}\n", data.path))
}

fn cmd_ln(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    source: &str,
    dest: &str,
    symbolic: bool,
) -> Result<()> {
    let vault = open_vault(root)?;

    if symbolic {
        let link = vault
            .soft_link(owner, source, dest)
            .with_context(|| format!("Failed to link {} -> {}", dest, source))?;
        let data = SymlinkOutput {
            success: true,
            result_code: 0,
            path: dest.to_string(),
            target: link.target,
        };
        return out.write(&data, || format!("{} -> {}\n", data.path, data.target));
    }

    let binding = vault
        .hard_link(owner, source, dest)
        .with_context(|| format!("Failed to link {} to {}", dest, source))?;
    let data = FileOutput {
        success: true,
        result_code: 0,
        file: FileInfo::new(dest, &binding),
    };
    out.write(&data, || format!("{} {}\n", data.file.hash, data.file.path))
}

fn cmd_readlink(out: &OutputWriter, root: &Path, owner: OwnerId, path: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let target = vault.read_link(owner, path)?;

    let data = SymlinkOutput {
        success: true,
        result_code: 0,
        path: path.to_string(),
        target,
    };
    out.write(&data, || format!("{}\n", data.target))
}

fn cmd_tag(out: &OutputWriter, root: &Path, owner: OwnerId, path: &str, tags: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let binding = vault
        .set_tags(owner, path, tags)
        .with_context(|| format!("Failed to tag {}", path))?;

    let data = FileOutput {
        success: true,
        result_code: 0,
        file: FileInfo::new(path, &binding),
    };
    out.write(&data, || format!("{}: {}\n", data.file.path, data.file.tags))
}

fn cmd_visibility(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    path: &str,
    level: Visibility,
) -> Result<()> {
    let vault = open_vault(root)?;
    let public = matches!(level, Visibility::Public);
    let node = vault
        .set_visibility(owner, path, public)
        .with_context(|| format!("Failed to change visibility of {}", path))?;

    let data = NodeOutput {
        success: true,
        result_code: 0,
        node: NodeInfo::from(&node),
    };
    out.write(&data, || {
        let level = if data.node.public { "public" } else { "private" };
        format!("{} is now {}\n", data.node.path, level)
    })
}

fn cmd_search(out: &OutputWriter, root: &Path, owner: OwnerId, query: &SearchQuery) -> Result<()> {
    let vault = open_vault(root)?;
    let files: Vec<FileInfo> = vault
        .search_files(owner, query)
        .iter()
        .map(|entry| FileInfo::new(entry.node.path.clone(), &entry.binding))
        .collect();

    let data = SearchOutput {
        success: true,
        result_code: 0,
        files,
    };
    out.write(&data, || {
        data.files
            .iter()
            .map(|f| format!("{} {} {} {}\n", f.node, f.size, f.sniffed_mime, f.path))
            .collect()
    })
}

fn cmd_share_create(
    out: &OutputWriter,
    root: &Path,
    owner: OwnerId,
    path: &str,
    password: Option<&str>,
    expires_hours: Option<i64>,
) -> Result<()> {
    let vault = open_vault(root)?;
    let grant = vault
        .create_grant(owner, path, password, expires_hours.map(chrono::Duration::hours))
        .with_context(|| format!("Failed to share {}", path))?;

    let data = ShareOutput {
        success: true,
        result_code: 0,
        share: ShareInfo::from(&grant),
    };
    out.write(&data, || format!("{}\n", data.share.token))
}

fn cmd_share_get(
    out: &OutputWriter,
    root: &Path,
    token: &str,
    password: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let vault = open_vault(root)?;
    let shared = vault
        .lookup_grant(token, password)
        .with_context(|| "Failed to open share")?;
    emit_content(out, &shared.payload, shared.binding.hash, output)
}

fn cmd_share_list(out: &OutputWriter, root: &Path, owner: OwnerId) -> Result<()> {
    let vault = open_vault(root)?;
    let shares: Vec<ShareInfo> = vault.grants_for(owner).iter().map(ShareInfo::from).collect();

    let data = ShareListOutput {
        success: true,
        result_code: 0,
        shares,
    };
    out.write(&data, || {
        if data.shares.is_empty() {
            "No shares\n".to_string()
        } else {
            data.shares.iter().map(ShareInfo::text_line).collect()
        }
    })
}

fn cmd_stats(out: &OutputWriter, root: &Path) -> Result<()> {
    let vault = open_vault(root)?;
    let stats = vault.compute_dedup_stats();
    let efficiency = stats.efficiency();

    let data = StatsOutput {
        success: true,
        result_code: 0,
        stats,
        efficiency,
    };
    out.write(&data, || {
        format!(
            "Files: {}\nUnique blocks: {}\nLogical size: {} bytes\nPhysical size: {} bytes\nSpace saved: {} bytes\nDedup efficiency: {}\n",
            data.stats.total_files,
            data.stats.unique_blocks,
            data.stats.logical_size,
            data.stats.physical_size,
            data.stats.space_saved,
            data.efficiency
        )
    })
}

fn cmd_gc(out: &OutputWriter, root: &Path, dry_run: bool) -> Result<()> {
    let vault = open_vault(root)?;
    let stats = vault
        .gc(dry_run)
        .with_context(|| "Failed to run garbage collection")?;

    let data = GcOutput {
        success: true,
        result_code: 0,
        dry_run,
        objects_deleted: stats.objects_deleted,
        bytes_freed: stats.bytes_freed,
    };
    out.write(&data, || {
        if dry_run {
            format!(
                "Dry run - no objects deleted\nWould delete {} objects\nWould free {} bytes\n",
                data.objects_deleted, data.bytes_freed
            )
        } else {
            format!(
                "Deleted {} objects\nFreed {} bytes\n",
                data.objects_deleted, data.bytes_freed
            )
        }
    })
}

/// Exit code 7 when problems are found.
fn cmd_fsck(out: &OutputWriter, root: &Path) -> Result<u8> {
    let vault = open_vault(root)?;
    let report = vault.check_consistency();
    let healthy = report.is_healthy();
    let code = if healthy { 0 } else { 7 };

    let data = FsckOutput {
        success: healthy,
        result_code: code,
        healthy,
        report,
    };
    out.write(&data, || {
        let mut text = format!(
            "Checked {} blocks, {} bindings, {} accounts\n",
            data.report.blocks_checked, data.report.bindings_checked, data.report.accounts_checked
        );
        if healthy {
            text.push_str("No problems found\n");
        } else {
            for problem in &data.report.problems {
                text.push_str(&format!("problem: {}\n", problem));
            }
        }
        text
    })?;
    Ok(code)
}
