//! Chunk store: `(inode_id, chunk_index) -> data`
//!
//! A chunk holds at most `chunk_size` bytes. Chunks before the last one of a
//! file are either full or absent; an absent chunk inside the file size
//! reads as zeros.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};

pub fn get(conn: &Connection, inode_id: i64, index: u64) -> Result<Option<Vec<u8>>> {
    let mut stmt =
        conn.prepare_cached("SELECT data FROM chunks WHERE inode_id = ?1 AND chunk_index = ?2")?;
    Ok(stmt
        .query_row(params![inode_id, index as i64], |row| row.get(0))
        .optional()?)
}

pub fn put(conn: &Connection, inode_id: i64, index: u64, data: &[u8]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO chunks (inode_id, chunk_index, data) VALUES (?1, ?2, ?3)",
    )?;
    stmt.execute(params![inode_id, index as i64, data])?;
    Ok(())
}

/// Visit the stored chunks with `first <= index <= last` in index order,
/// one row at a time. Missing (sparse) indices are simply not visited.
pub fn for_each_in_range(
    conn: &Connection,
    inode_id: i64,
    first: u64,
    last: u64,
    mut visit: impl FnMut(u64, &[u8]),
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT chunk_index, data FROM chunks
         WHERE inode_id = ?1 AND chunk_index BETWEEN ?2 AND ?3
         ORDER BY chunk_index ASC",
    )?;
    let mut rows = stmt.query(params![inode_id, first as i64, last as i64])?;
    while let Some(row) = rows.next()? {
        let index: i64 = row.get(0)?;
        let data: Vec<u8> = row.get(1)?;
        visit(index as u64, &data);
    }
    Ok(())
}

/// Highest stored chunk index below `before`, if any.
pub fn last_index_before(conn: &Connection, inode_id: i64, before: u64) -> Result<Option<u64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT MAX(chunk_index) FROM chunks WHERE inode_id = ?1 AND chunk_index < ?2",
    )?;
    let index: Option<i64> = stmt.query_row(params![inode_id, before as i64], |row| row.get(0))?;
    Ok(index.map(|i| i as u64))
}

/// Delete every chunk with `index >= first`.
pub fn delete_from(conn: &Connection, inode_id: i64, first: u64) -> Result<usize> {
    let mut stmt =
        conn.prepare_cached("DELETE FROM chunks WHERE inode_id = ?1 AND chunk_index >= ?2")?;
    Ok(stmt.execute(params![inode_id, first as i64])?)
}

/// Cut chunk `index` down to `len` bytes if it is longer.
pub fn trim(conn: &Connection, inode_id: i64, index: u64, len: usize) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE chunks SET data = substr(data, 1, ?3)
         WHERE inode_id = ?1 AND chunk_index = ?2 AND length(data) > ?3",
    )?;
    stmt.execute(params![inode_id, index as i64, len as i64])?;
    Ok(())
}

/// All stored chunk indices of an inode, ascending.
#[cfg(test)]
pub fn indices(conn: &Connection, inode_id: i64) -> Result<Vec<u64>> {
    let mut stmt = conn
        .prepare_cached("SELECT chunk_index FROM chunks WHERE inode_id = ?1 ORDER BY chunk_index")?;
    let indices = stmt
        .query_map(params![inode_id], |row| row.get::<_, i64>(0).map(|i| i as u64))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(indices)
}
