//! Error types for sqlvfs

use std::io;
use thiserror::Error;

/// Result type for sqlvfs operations
pub type Result<T> = std::result::Result<T, VfsError>;

/// Coarse classification of a [`VfsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    PermissionDenied,
    InvalidArgument,
    UnsupportedOperation,
    InvalidState,
    Backend,
    Io,
}

/// Virtual file system errors
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(io::Error),
}

impl VfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::IsADirectory(_) => ErrorKind::IsADirectory,
            VfsError::NotADirectory(_) => ErrorKind::NotADirectory,
            VfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VfsError::InvalidArgument(_) | VfsError::Config(_) => ErrorKind::InvalidArgument,
            VfsError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            VfsError::InvalidState(_) => ErrorKind::InvalidState,
            VfsError::Sqlite(_) => ErrorKind::Backend,
            VfsError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when the underlying SQLite failure is a constraint violation,
    /// i.e. an insert lost a race against a concurrent creator.
    pub(crate) fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            VfsError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    /// Recover a `VfsError` that travelled through a `std::io` trait method.
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<VfsError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(vfs) = inner.downcast::<VfsError>() {
                    return *vfs;
                }
            }
            return VfsError::InvalidState("unrecoverable I/O error".to_string());
        }
        VfsError::Io(err)
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        VfsError::from_io(err)
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::UnsupportedOperation => io::ErrorKind::Unsupported,
            ErrorKind::InvalidState | ErrorKind::Backend => io::ErrorKind::Other,
            ErrorKind::Io => match err {
                VfsError::Io(e) => return e,
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, err)
    }
}
