//! Inode table: one row per normalized path
//!
//! These are row-level primitives. Callers hold the store lock (and for
//! mutations, an open transaction) for the whole unit of work.

use crate::error::{Result, VfsError};
use crate::path::descendant_bounds;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Metadata record for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: i64,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub created_at: String,
    pub modified_at: String,
}

const COLUMNS: &str = "id, path, is_directory, size, created_at, modified_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Inode> {
    Ok(Inode {
        id: row.get(0)?,
        path: row.get(1)?,
        is_directory: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
    })
}

pub fn get(conn: &Connection, path: &str) -> Result<Option<Inode>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM inodes WHERE path = ?1"))?;
    Ok(stmt.query_row(params![path], from_row).optional()?)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Inode>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM inodes WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], from_row).optional()?)
}

/// Insert a new inode and return its id.
///
/// Fails with the raw constraint violation when `path` is taken; callers
/// that must tolerate a concurrent creator inspect it with
/// `VfsError::is_constraint_violation` instead of checking first.
pub fn insert(conn: &Connection, path: &str, is_directory: bool, now: &str) -> Result<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO inodes (path, is_directory, created_at, modified_at, size)
         VALUES (?1, ?2, ?3, ?3, 0)",
    )?;
    stmt.execute(params![path, is_directory, now])?;
    Ok(conn.last_insert_rowid())
}

pub fn set_size(conn: &Connection, id: i64, size: u64, now: &str) -> Result<()> {
    let size = i64::try_from(size)
        .map_err(|_| VfsError::InvalidArgument(format!("file size too large: {size}")))?;
    let mut stmt =
        conn.prepare_cached("UPDATE inodes SET size = ?1, modified_at = ?2 WHERE id = ?3")?;
    if stmt.execute(params![size, now, id])? == 0 {
        return Err(VfsError::NotFound(format!("inode {id}")));
    }
    Ok(())
}

/// Delete one inode; its chunks go with it through the foreign key cascade.
pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.prepare_cached("DELETE FROM inodes WHERE id = ?1")?
        .execute(params![id])?;
    Ok(())
}

pub fn has_descendants(conn: &Connection, path: &str) -> Result<bool> {
    let (low, high) = descendant_bounds(path);
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM inodes WHERE path > ?1 AND path < ?2 LIMIT 1")?;
    Ok(stmt.exists(params![low, high])?)
}

/// Delete `path` and every descendant; returns the number of inodes removed.
pub fn delete_subtree(conn: &Connection, path: &str) -> Result<usize> {
    let (low, high) = descendant_bounds(path);
    let removed = conn.execute(
        "DELETE FROM inodes WHERE path = ?1 OR (path > ?2 AND path < ?3)",
        params![path, low, high],
    )?;
    Ok(removed)
}

/// Rewrite `src` and every descendant path to live under `dst`.
///
/// Must run inside a transaction; `dst` and its would-be descendants must be
/// free.
pub fn move_subtree(conn: &Connection, src: &str, dst: &str, now: &str) -> Result<usize> {
    let (low, high) = descendant_bounds(src);
    // substr is 1-based: keep everything after the old prefix
    let tail_start = src.chars().count() as i64 + 1;
    let moved_children = conn.execute(
        "UPDATE inodes SET path = ?1 || substr(path, ?2), modified_at = ?3
         WHERE path > ?4 AND path < ?5",
        params![dst, tail_start, now, low, high],
    )?;
    let moved_self = conn.execute(
        "UPDATE inodes SET path = ?1, modified_at = ?2 WHERE path = ?3",
        params![dst, now, src],
    )?;
    if moved_self == 0 {
        return Err(VfsError::NotFound(src.to_string()));
    }
    Ok(moved_children + moved_self)
}

/// Direct children of `path` with their directory flag, sorted by name.
pub fn children(conn: &Connection, path: &str) -> Result<Vec<(String, bool)>> {
    let (low, high) = descendant_bounds(path);
    let name_start = low.chars().count() as i64 + 1;
    let mut stmt = conn.prepare_cached(
        "SELECT substr(path, ?3), is_directory FROM inodes
         WHERE path > ?1 AND path < ?2 AND instr(substr(path, ?3), '/') = 0
         ORDER BY path",
    )?;
    let entries = stmt
        .query_map(params![low, high, name_start], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<Vec<(String, bool)>, _>>()?;
    Ok(entries)
}

/// Paths matching a SQLite `GLOB` pattern, in path order.
pub fn glob(conn: &Connection, pattern: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT path FROM inodes WHERE path GLOB ?1 ORDER BY path")?;
    let paths = stmt
        .query_map(params![pattern], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA;

    fn conn_with(paths: &[(&str, bool)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        insert(&conn, "/", true, "t0").unwrap();
        for (path, is_dir) in paths {
            insert(&conn, path, *is_dir, "t0").unwrap();
        }
        conn
    }

    #[test]
    fn test_insert_conflict_is_constraint_violation() {
        let conn = conn_with(&[("/a", true)]);
        let err = insert(&conn, "/a", false, "t1").unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_children_direct_only() {
        let conn = conn_with(&[
            ("/a", true),
            ("/a/b", true),
            ("/a/b/c.txt", false),
            ("/a/d.txt", false),
            ("/ab", false),
        ]);
        let names: Vec<_> = children(&conn, "/a").unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "d.txt"]);

        let root = children(&conn, "/").unwrap();
        assert_eq!(root, vec![("a".to_string(), true), ("ab".to_string(), false)]);
    }

    #[test]
    fn test_move_subtree_rewrites_prefix() {
        let conn = conn_with(&[("/a", true), ("/a/b", true), ("/a/b/f", false), ("/ab", false)]);
        let moved = move_subtree(&conn, "/a", "/z", "t1").unwrap();
        assert_eq!(moved, 3);
        assert!(get(&conn, "/z/b/f").unwrap().is_some());
        assert!(get(&conn, "/a").unwrap().is_none());
        assert!(get(&conn, "/ab").unwrap().is_some());
    }

    #[test]
    fn test_delete_subtree_leaves_siblings() {
        let conn = conn_with(&[("/a", true), ("/a/f", false), ("/a-b", false), ("/ab", true)]);
        assert_eq!(delete_subtree(&conn, "/a").unwrap(), 2);
        assert!(get(&conn, "/a-b").unwrap().is_some());
        assert!(get(&conn, "/ab").unwrap().is_some());
        assert!(!has_descendants(&conn, "/ab").unwrap());
    }

    #[test]
    fn test_glob() {
        let conn = conn_with(&[("/x.txt", false), ("/y.txt", false), ("/z.bin", false)]);
        assert_eq!(glob(&conn, "/*.txt").unwrap(), vec!["/x.txt", "/y.txt"]);
        assert_eq!(glob(&conn, "/[xz].*").unwrap(), vec!["/x.txt", "/z.bin"]);
    }
}
