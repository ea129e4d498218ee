//! Database schema definitions for sqlvfs
//!
//! Two tables hold the whole tree: `inodes` keyed by normalized absolute
//! path, and `chunks` keyed by `(inode_id, chunk_index)`. There is no
//! directory-entry table; the hierarchy is derived from path prefixes.

/// `st_mode` encoding used by [`crate::Stat`]
pub mod mode {
    /// Mask selecting the file-type bits
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;

    /// `rw-r--r--`
    pub const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644;
    /// `rwxr-xr-x`
    pub const DEFAULT_DIR_MODE: u32 = S_IFDIR | 0o755;

    /// Mode reported for an inode; permissions are not stored.
    pub fn of(is_directory: bool) -> u32 {
        if is_directory { DEFAULT_DIR_MODE } else { DEFAULT_FILE_MODE }
    }

    pub fn is_dir(mode: u32) -> bool {
        mode & S_IFMT == S_IFDIR
    }
}

/// Reserved root path, created when the schema is initialized
pub const ROOT_PATH: &str = "/";

/// Default maximum size of one chunk row (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Buffer size used when streaming one file into another (1 MiB)
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// DDL executed on every writable open; idempotent.
///
/// `path` is UNIQUE, which gives the index used by lookups, prefix range
/// scans and `GLOB` matching.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    is_directory INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chunks (
    inode_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (inode_id, chunk_index),
    FOREIGN KEY (inode_id) REFERENCES inodes(id) ON DELETE CASCADE
);
"#;
