//! Error types for filevault_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using filevault_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during vault operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Path is malformed or contains a reserved segment.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Namespace resolution failed.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// A node already exists at the terminal segment.
    #[error("File already exists: {path}")]
    FileExists { path: String },

    /// A hard or soft link destination is already taken.
    #[error("Destination already exists: {path}")]
    DestExists { path: String },

    /// An intermediate path segment is a file or symlink.
    #[error("Cannot descend into non-directory: {path}")]
    FileIsNotADirectory { path: String },

    /// Operation requires a file node.
    #[error("Not a file: {path}")]
    NotAFile { path: String },

    /// Operation requires a symlink node.
    #[error("Not a symbolic link: {path}")]
    NotASymlink { path: String },

    /// Operation requires a directory node.
    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    /// Directory still has children.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// Hard link source does not resolve.
    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    /// Hard link source is not a file.
    #[error("Source is not a file: {path}")]
    SourceNotAFile { path: String },

    /// Hard or soft link destination path is unusable.
    #[error("Invalid destination path {path:?}: {reason}")]
    InvalidDestPath { path: String, reason: String },

    /// Upload would push the owner past their quota.
    #[error("Quota exceeded for owner {owner}: {used} used + {requested} requested > {max}")]
    QuotaExceeded {
        owner: u64,
        used: u64,
        requested: u64,
        max: u64,
    },

    /// No account exists for the owner.
    #[error("Unknown owner: {owner}")]
    UnknownOwner { owner: u64 },

    /// Requester may not read another owner's private node.
    #[error("Access denied to node {node}")]
    AccessDenied { node: u64 },

    /// Too many symlink hops while resolving a path.
    #[error("Too many levels of symbolic links: {path}")]
    SymlinkLoop { path: String },

    /// No grant exists for the token.
    #[error("Share not found")]
    ShareNotFound,

    /// Grant expired before use.
    #[error("Share has expired")]
    ShareExpired,

    /// Grant is password protected and no password was given.
    #[error("Password required")]
    PasswordRequired,

    /// Grant password did not match.
    #[error("Invalid password")]
    InvalidPassword,

    /// An internal invariant would be broken.
    #[error("Consistency violation: {reason}")]
    ConsistencyViolation { reason: String },

    /// A unique key is already taken in the record store.
    #[error("Constraint violation on {table}: duplicate key {key}")]
    ConstraintViolation { table: &'static str, key: String },

    /// Payload object file is corrupted or invalid.
    #[error("Corrupted object at {path}: {reason}")]
    CorruptedObject { path: PathBuf, reason: String },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Payload object not found.
    #[error("Object not found: {hash}")]
    ObjectNotFound { hash: String },

    /// Another handle holds the vault's lock file.
    #[error("Vault is locked by another process: {path}")]
    VaultLocked { path: PathBuf },

    /// Vault is invalid or not initialized.
    #[error("Invalid vault at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Compression or decompression error.
    #[error("Compression error: {reason}")]
    CompressionError { reason: String },

    /// Record snapshot could not be read or written.
    #[error("Snapshot error: {source}")]
    Snapshot {
        #[from]
        source: serde_json::Error,
    },

    /// Password hashing failed.
    #[error("Password hash error: {reason}")]
    PasswordHash { reason: String },

    /// The OS random source failed.
    #[error("Random source error: {reason}")]
    Random { reason: String },
}

impl Error {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Create a FileExists error.
    pub fn file_exists(path: impl Into<String>) -> Self {
        Error::FileExists { path: path.into() }
    }

    /// Create a FileIsNotADirectory error.
    pub fn file_is_not_a_directory(path: impl Into<String>) -> Self {
        Error::FileIsNotADirectory { path: path.into() }
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Error::NotAFile { path: path.into() }
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Error::NotADirectory { path: path.into() }
    }

    /// Create a ConsistencyViolation error and log it.
    ///
    /// These indicate a defect in concurrency control or bookkeeping, so they
    /// are logged where they are raised rather than where they are reported.
    pub fn consistency(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!(%reason, "consistency violation");
        Error::ConsistencyViolation { reason }
    }

    /// Create a ConstraintViolation error.
    pub fn constraint(table: &'static str, key: impl Into<String>) -> Self {
        Error::ConstraintViolation {
            table,
            key: key.into(),
        }
    }

    /// Create a CorruptedObject error.
    pub fn corrupted_object(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(hash: impl Into<String>) -> Self {
        Error::ObjectNotFound { hash: hash.into() }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create a CompressionError.
    pub fn compression_error(reason: impl Into<String>) -> Self {
        Error::CompressionError {
            reason: reason.into(),
        }
    }

    /// Whether this error reports a broken internal invariant.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Error::ConsistencyViolation { .. })
    }

    /// Rewrite namespace insert failures for a link destination.
    pub(crate) fn into_dest_error(self) -> Self {
        match self {
            Error::InvalidPath { path, reason } => Error::InvalidDestPath { path, reason },
            Error::FileIsNotADirectory { path } => Error::InvalidDestPath {
                reason: "parent segment is not a directory".to_string(),
                path,
            },
            Error::FileExists { path } => Error::DestExists { path },
            other => other,
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Self {
        Error::PasswordHash {
            reason: err.to_string(),
        }
    }
}

impl From<getrandom::Error> for Error {
    fn from(err: getrandom::Error) -> Self {
        Error::Random {
            reason: err.to_string(),
        }
    }
}
