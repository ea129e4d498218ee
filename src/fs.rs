//! Path and tree operations
//!
//! [`VirtualFileSystem`] is a cheap-to-clone handle on one local store plus
//! its underlays. Reads resolve local first, then underlays by priority;
//! every mutation targets the local store only and runs in a single
//! transaction.

use crate::backend::{SqliteStore, timestamp};
use crate::config::StoreConfig;
use crate::error::{Result, VfsError};
use crate::file::{Buffering, VfsFile};
use crate::inode::{self, Inode};
use crate::layer::{LOCAL_LAYER, Underlay};
use crate::mode::OpenMode;
use crate::path::{self, is_descendant, join, normalize};
use crate::raw::RawFile;
use crate::schema::{COPY_BUFFER_SIZE, ROOT_PATH, mode};
use crate::walk::{ErrorHook, Walk};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Metadata for one path, as served by a particular layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub is_directory: bool,
    /// `S_IFDIR | 0o755` or `S_IFREG | 0o644`
    pub mode: u32,
    pub source_layer: String,
}

impl Stat {
    fn from_inode(node: &Inode, layer: &str) -> Result<Self> {
        let st_mode = mode::of(node.is_directory);
        Ok(Self {
            size: node.size,
            created_at: parse_timestamp(&node.created_at)?,
            modified_at: parse_timestamp(&node.modified_at)?,
            is_directory: mode::is_dir(st_mode),
            mode: st_mode,
            source_layer: layer.to_string(),
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VfsError::InvalidState(format!("corrupt timestamp {value:?}: {e}")))
}

pub(crate) struct Inner {
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) underlays: RwLock<Vec<Underlay>>,
}

/// Virtual file system backed by one SQLite database
///
/// Clones share the same store and underlay set.
#[derive(Clone)]
pub struct VirtualFileSystem {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for VirtualFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFileSystem")
            .field("location", &self.inner.store.config().location)
            .field("underlays", &self.inner.underlays.read().len())
            .finish()
    }
}

impl VirtualFileSystem {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let store = SqliteStore::open(config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store: Arc::new(store),
                underlays: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Private, non-persistent store
    pub fn memory() -> Result<Self> {
        Self::new(StoreConfig::memory())
    }

    /// Store in the SQLite file at `location` (created if missing)
    pub fn sqlite(location: impl Into<String>) -> Result<Self> {
        Self::new(StoreConfig::file(location))
    }

    pub fn config(&self) -> &StoreConfig {
        self.inner.store.config()
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.store.chunk_size()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.store.is_read_only()
    }

    pub(crate) fn ptr_eq(&self, other: &VirtualFileSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn local(&self, path: &str) -> Result<Option<Inode>> {
        self.inner.store.read(|conn| inode::get(conn, path))
    }

    pub(crate) fn exists_locally(&self, path: &str) -> Result<bool> {
        Ok(self.local(path)?.is_some())
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Open a file with default buffering.
    ///
    /// Read-only modes resolve through the layers and, when the file lives
    /// in an underlay, hand the whole open to that underlay. Every other mode
    /// opens on the local store, creating missing parent directories.
    pub fn open(&self, path: &str, mode: &str) -> Result<VfsFile> {
        self.open_with(path, mode, Buffering::Default)
    }

    pub fn open_with(&self, path: &str, mode_str: &str, buffering: Buffering) -> Result<VfsFile> {
        let mode = OpenMode::parse(mode_str)?;
        if buffering == Buffering::Unbuffered && !mode.binary {
            return Err(VfsError::InvalidArgument(
                "can't have unbuffered text I/O".to_string(),
            ));
        }
        let path = normalize(path)?;

        if mode.writable() {
            self.inner.store.ensure_writable(&path)?;
            if path == ROOT_PATH {
                return Err(VfsError::IsADirectory(path));
            }
            let store = self.inner.store.clone();
            let raw = self.inner.store.transaction(|conn| {
                create_ancestors(conn, &path, &timestamp())?;
                RawFile::open(store, &path, mode)
            })?;
            return Ok(VfsFile::new(raw, buffering));
        }

        match self.local(&path)? {
            Some(node) if node.is_directory => Err(VfsError::IsADirectory(path)),
            Some(_) => {
                let raw = RawFile::open(self.inner.store.clone(), &path, mode)?;
                Ok(VfsFile::new(raw, buffering))
            }
            None => {
                for underlay in self.underlays() {
                    if underlay.fs.exists(&path)? {
                        if underlay.fs.isdir(&path)? {
                            return Err(VfsError::IsADirectory(path));
                        }
                        return underlay.fs.open_with(&path, mode_str, buffering);
                    }
                }
                Err(VfsError::NotFound(path))
            }
        }
    }

    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.open(path, "rb")?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        file.close()?;
        Ok(bytes)
    }

    pub fn read_text(&self, path: &str) -> Result<String> {
        let mut file = self.open(path, "r")?;
        let text = file.read_text()?;
        file.close()?;
        Ok(text)
    }

    /// Replace the content of `path` atomically; returns bytes written.
    pub fn write_bytes(&self, path: &str, data: &[u8]) -> Result<usize> {
        self.atomic(|fs| {
            let mut file = fs.open(path, "wb")?;
            file.write_all(data)?;
            file.close()?;
            Ok(data.len())
        })
    }

    /// UTF-8 encode and write `text`; returns bytes written.
    pub fn write_text(&self, path: &str, text: &str) -> Result<usize> {
        self.atomic(|fs| {
            let mut file = fs.open(path, "w")?;
            file.write_all(text.as_bytes())?;
            file.close()?;
            Ok(text.len())
        })
    }

    // ------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------

    /// Create a directory.
    ///
    /// Without `parents` the immediate parent must already be a directory.
    /// `exist_ok` accepts an existing directory (never an existing file).
    pub fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> Result<()> {
        let path = normalize(path)?;
        if path == ROOT_PATH {
            return Err(VfsError::AlreadyExists(path));
        }
        self.inner.store.ensure_writable(&path)?;

        let created = self.inner.store.transaction(|conn| {
            match inode::get(conn, &path)? {
                Some(node) if node.is_directory && exist_ok => return Ok(false),
                Some(_) => return Err(VfsError::AlreadyExists(path.clone())),
                None => {}
            }

            let now = timestamp();
            if parents {
                create_ancestors(conn, &path, &now)?;
            } else {
                let parent = path::parent(&path);
                match inode::get(conn, parent)? {
                    Some(node) if node.is_directory => {}
                    Some(_) => return Err(VfsError::NotADirectory(parent.to_string())),
                    None => return Err(VfsError::NotFound(parent.to_string())),
                }
            }

            match inode::insert(conn, &path, true, &now) {
                Ok(_) => Ok(true),
                Err(e) if e.is_constraint_violation() => match inode::get(conn, &path)? {
                    Some(node) if node.is_directory && exist_ok => Ok(false),
                    _ => Err(VfsError::AlreadyExists(path.clone())),
                },
                Err(e) => Err(e),
            }
        })?;

        if created {
            debug!(path = %path, parents, "mkdir");
        }
        Ok(())
    }

    pub fn makedirs(&self, path: &str, exist_ok: bool) -> Result<()> {
        self.mkdir(path, true, exist_ok)
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        if path == ROOT_PATH {
            return Err(VfsError::PermissionDenied("cannot remove root directory".to_string()));
        }
        self.inner.store.ensure_writable(&path)?;

        self.inner.store.transaction(|conn| {
            let node = inode::get(conn, &path)?.ok_or_else(|| VfsError::NotFound(path.clone()))?;
            if !node.is_directory {
                return Err(VfsError::NotADirectory(path.clone()));
            }
            if inode::has_descendants(conn, &path)? {
                return Err(VfsError::PermissionDenied(format!("directory not empty: {path}")));
            }
            inode::delete(conn, node.id)
        })?;

        debug!(path = %path, "rmdir");
        Ok(())
    }

    /// Delete one file and its content.
    pub fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.inner.store.ensure_writable(&path)?;

        self.inner.store.transaction(|conn| {
            let node = inode::get(conn, &path)?.ok_or_else(|| VfsError::NotFound(path.clone()))?;
            if node.is_directory {
                return Err(VfsError::IsADirectory(path.clone()));
            }
            inode::delete(conn, node.id)
        })?;

        debug!(path = %path, "remove");
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.remove(path)
    }

    /// Delete `path` and everything below it in one transaction.
    pub fn rmtree(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        if path == ROOT_PATH {
            return Err(VfsError::PermissionDenied("cannot remove root directory".to_string()));
        }
        self.inner.store.ensure_writable(&path)?;

        let removed = self.inner.store.transaction(|conn| {
            if inode::get(conn, &path)?.is_none() {
                return Err(VfsError::NotFound(path.clone()));
            }
            inode::delete_subtree(conn, &path)
        })?;

        debug!(path = %path, removed, "rmtree");
        Ok(())
    }

    /// Move a file or a whole directory subtree.
    ///
    /// Missing parents of `dst` are created in the same transaction that
    /// rewrites the paths, so no intermediate state is ever visible.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src = normalize(src)?;
        let dst = normalize(dst)?;
        if src == ROOT_PATH {
            return Err(VfsError::PermissionDenied("cannot rename root directory".to_string()));
        }
        if is_descendant(&dst, &src) {
            return Err(VfsError::InvalidArgument(format!(
                "cannot move {src} into its own subtree {dst}"
            )));
        }
        self.inner.store.ensure_writable(&dst)?;

        let moved = self.inner.store.transaction(|conn| {
            if inode::get(conn, &src)?.is_none() {
                return Err(VfsError::NotFound(src.clone()));
            }
            if inode::get(conn, &dst)?.is_some() {
                return Err(VfsError::AlreadyExists(dst.clone()));
            }
            let now = timestamp();
            create_ancestors(conn, &dst, &now)?;
            inode::move_subtree(conn, &src, &dst, &now)
        })?;

        debug!(src = %src, dst = %dst, moved, "rename");
        Ok(())
    }

    /// Copy one file, streaming it in bounded pieces.
    ///
    /// The source may come from any layer; the destination is written
    /// locally, replacing an existing file.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let src = normalize(src)?;
        let dst = normalize(dst)?;
        if self.isdir(&src)? {
            return Err(VfsError::IsADirectory(src));
        }
        if src == dst {
            return Err(VfsError::InvalidArgument(format!("{src} and {dst} are the same file")));
        }
        self.inner.store.ensure_writable(&dst)?;

        let copied = self.atomic(|fs| {
            let mut reader = fs.open_with(&src, "rb", Buffering::Unbuffered)?;
            let mut writer = fs.open_with(&dst, "wb", Buffering::Unbuffered)?;
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            let mut copied = 0u64;
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n])?;
                copied += n as u64;
            }
            reader.close()?;
            writer.close()?;
            Ok(copied)
        })?;

        debug!(src = %src, dst = %dst, bytes = copied, "copy");
        Ok(())
    }

    /// Recreate the directory tree at `src` under the new path `dst`.
    pub fn copytree(&self, src: &str, dst: &str) -> Result<()> {
        let src = normalize(src)?;
        let dst = normalize(dst)?;

        if !self.exists(&src)? {
            return Err(VfsError::NotFound(src));
        }
        if !self.isdir(&src)? {
            return Err(VfsError::NotADirectory(src));
        }
        if self.exists(&dst)? {
            return Err(VfsError::AlreadyExists(dst));
        }
        if is_descendant(&dst, &src) {
            return Err(VfsError::InvalidArgument(format!(
                "cannot copy {src} into its own subtree {dst}"
            )));
        }
        self.inner.store.ensure_writable(&dst)?;

        self.atomic(|fs| {
            fs.makedirs(&dst, false)?;

            let mut failure = None;
            let tree: Vec<_> = fs
                .walk_with(&src, |err| {
                    failure.get_or_insert(err);
                })
                .collect();
            if let Some(err) = failure {
                return Err(err);
            }

            for (dir, dirs, files) in tree {
                let target = format!("{dst}{}", &dir[src.len()..]);
                for name in dirs {
                    fs.mkdir(&join(&target, &name), false, true)?;
                }
                for name in files {
                    fs.copy(&join(&dir, &name), &join(&target, &name))?;
                }
            }
            Ok(())
        })?;

        debug!(src = %src, dst = %dst, "copytree");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path)?;
        if self.local(&path)?.is_some() {
            return Ok(true);
        }
        for underlay in self.underlays() {
            if underlay.fs.exists(&path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn isfile(&self, path: &str) -> Result<bool> {
        let path = normalize(path)?;
        if let Some(node) = self.local(&path)? {
            return Ok(!node.is_directory);
        }
        for underlay in self.underlays() {
            if underlay.fs.exists(&path)? {
                return underlay.fs.isfile(&path);
            }
        }
        Ok(false)
    }

    /// True when the local store has a directory at `path`, or, if the
    /// local store has nothing there, when any underlay does.
    pub fn isdir(&self, path: &str) -> Result<bool> {
        let path = normalize(path)?;
        if let Some(node) = self.local(&path)? {
            return Ok(node.is_directory);
        }
        for underlay in self.underlays() {
            if underlay.fs.isdir(&path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sorted names of the direct children of `path`, merged over layers.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path)?;
        Ok(self.scan_dir(&path)?.into_keys().collect())
    }

    /// Merged children of `path` with their directory flag.
    ///
    /// A name present locally keeps its local type; otherwise it is a
    /// directory if any underlay has a directory there.
    pub(crate) fn scan_dir(&self, path: &str) -> Result<BTreeMap<String, bool>> {
        if !self.isdir(path)? {
            if self.exists(path)? {
                return Err(VfsError::NotADirectory(path.to_string()));
            }
            return Err(VfsError::NotFound(path.to_string()));
        }

        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        let local_dir = matches!(self.local(path)?, Some(node) if node.is_directory);
        if local_dir {
            entries.extend(self.inner.store.read(|conn| inode::children(conn, path))?);
        }
        let local_names: BTreeSet<String> = entries.keys().cloned().collect();

        for underlay in self.underlays() {
            if !underlay.fs.isdir(path)? {
                continue;
            }
            for (name, is_dir) in underlay.fs.scan_dir(path)? {
                if local_names.contains(&name) {
                    continue;
                }
                let merged = entries.entry(name).or_insert(false);
                *merged |= is_dir;
            }
        }
        Ok(entries)
    }

    /// Lazily walk the tree below `top`, top-down.
    ///
    /// A missing or non-directory `top` yields nothing.
    pub fn walk(&self, top: &str) -> Walk<'_> {
        Walk::new(self, top, None)
    }

    /// Like [`walk`](Self::walk), reporting directories that cannot be
    /// listed to `on_error` instead of skipping them silently.
    pub fn walk_with<'a>(&'a self, top: &str, on_error: impl FnMut(VfsError) + 'a) -> Walk<'a> {
        let hook: ErrorHook<'a> = Box::new(on_error);
        Walk::new(self, top, Some(hook))
    }

    /// Paths matching a SQLite `GLOB` pattern in any layer, sorted.
    ///
    /// `*` and `?` also match `/`; character classes use `[...]` and
    /// `[^...]`. Matching is case-sensitive and runs as one query per layer
    /// against the path index.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = normalize(pattern)?;
        let mut matches: BTreeSet<String> = self
            .inner
            .store
            .read(|conn| inode::glob(conn, &pattern))?
            .into_iter()
            .collect();
        for underlay in self.underlays() {
            matches.extend(underlay.fs.glob(&pattern)?);
        }
        Ok(matches.into_iter().collect())
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let path = normalize(path)?;
        if let Some(node) = self.local(&path)? {
            return Stat::from_inode(&node, LOCAL_LAYER);
        }
        for underlay in self.underlays() {
            if underlay.fs.exists(&path)? {
                let mut stat = underlay.fs.stat(&path)?;
                stat.source_layer = underlay.name.clone();
                return Ok(stat);
            }
        }
        Err(VfsError::NotFound(path))
    }

    pub fn getsize(&self, path: &str) -> Result<u64> {
        Ok(self.stat(path)?.size)
    }

    // ------------------------------------------------------------------
    // Durability
    // ------------------------------------------------------------------

    /// Wait for in-flight work on the local store; writes commit on return.
    pub fn flush(&self) {
        self.inner.store.flush();
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.store.sync()
    }

    /// Run `f` as one transaction on the local store: everything it writes
    /// commits together on `Ok` and is rolled back on `Err`.
    ///
    /// Other threads are kept out of the store until `f` returns.
    pub fn atomic<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.inner.store.transaction(|_| f(self))
    }
}

/// Create every missing ancestor of `path`, top-down.
///
/// Walks up iteratively to the nearest existing ancestor. An ancestor that
/// appears concurrently is fine as long as it is a directory.
fn create_ancestors(conn: &Connection, path: &str, now: &str) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = path::parent(path);
    while current != ROOT_PATH {
        match inode::get(conn, current)? {
            Some(node) if node.is_directory => break,
            Some(_) => return Err(VfsError::NotADirectory(current.to_string())),
            None => missing.push(current),
        }
        current = path::parent(current);
    }

    for dir in missing.into_iter().rev() {
        match inode::insert(conn, dir, true, now) {
            Ok(_) => debug!(path = %dir, "created parent directory"),
            Err(e) if e.is_constraint_violation() => match inode::get(conn, dir)? {
                Some(node) if node.is_directory => {}
                _ => return Err(VfsError::NotADirectory(dir.to_string())),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
