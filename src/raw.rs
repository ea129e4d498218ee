//! Raw byte stream over one inode's chunks
//!
//! [`RawFile`] owns the chunk arithmetic: reads stream only the chunk rows
//! that intersect the requested range, writes splice partial chunks with
//! their existing content, and truncation drops or trims trailing chunks.
//! It implements [`Read`], [`Write`] and [`Seek`]; failures travel as
//! `io::Error` wrapping a [`VfsError`] (see [`VfsError::from_io`]).

use crate::backend::{SqliteStore, timestamp};
use crate::error::{Result, VfsError};
use crate::inode::Inode;
use crate::mode::OpenMode;
use crate::{chunk, inode};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, trace};

/// Unbuffered byte stream for one file
pub struct RawFile {
    store: Arc<SqliteStore>,
    path: String,
    mode: OpenMode,
    inode_id: i64,
    chunk_size: u64,
    pos: u64,
    size: u64,
    closed: bool,
}

impl std::fmt::Debug for RawFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("pos", &self.pos)
            .field("size", &self.size)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RawFile {
    /// Open `path` (already normalized) on `store`.
    ///
    /// A missing file is created for every mode except `r`/`r+`.
    pub(crate) fn open(store: Arc<SqliteStore>, path: &str, mode: OpenMode) -> Result<Self> {
        if mode.writable() {
            store.ensure_writable(path)?;
        }

        let node = {
            let _guard = store.lock();
            match store.read(|conn| inode::get(conn, path))? {
                Some(node) => {
                    if node.is_directory {
                        return Err(VfsError::IsADirectory(path.to_string()));
                    }
                    if mode.exclusive {
                        return Err(VfsError::AlreadyExists(path.to_string()));
                    }
                    node
                }
                None if mode.read => return Err(VfsError::NotFound(path.to_string())),
                None => Self::create(&store, path, mode)?,
            }
        };

        let mut file = Self {
            chunk_size: store.chunk_size() as u64,
            store,
            path: path.to_string(),
            mode,
            inode_id: node.id,
            pos: 0,
            size: node.size,
            closed: false,
        };

        if mode.truncates() && file.size > 0 {
            file.set_len(0)?;
        }
        if mode.append {
            file.pos = file.size;
        }
        Ok(file)
    }

    /// Insert the inode; the insert itself is the existence check, so a
    /// creator that loses a race sees the constraint violation and adopts
    /// (or, in exclusive mode, refuses) the winner's row.
    fn create(store: &SqliteStore, path: &str, mode: OpenMode) -> Result<Inode> {
        store.transaction(|conn| {
            let now = timestamp();
            let winner = match inode::insert(conn, path, false, &now) {
                Ok(id) => {
                    debug!(path = %path, "created file");
                    return inode::get_by_id(conn, id)?
                        .ok_or_else(|| VfsError::NotFound(path.to_string()));
                }
                Err(e) if e.is_constraint_violation() => inode::get(conn, path)?.ok_or(e)?,
                Err(e) => return Err(e),
            };
            if winner.is_directory {
                return Err(VfsError::IsADirectory(path.to_string()));
            }
            if mode.exclusive {
                return Err(VfsError::AlreadyExists(path.to_string()));
            }
            Ok(winner)
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn readable(&self) -> bool {
        self.mode.readable()
    }

    pub fn writable(&self) -> bool {
        self.mode.writable()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current position
    pub fn tell(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.pos)
    }

    /// File size as seen by this handle
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VfsError::InvalidState(format!(
                "I/O operation on closed file: {}",
                self.path
            )));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.readable() {
            return Err(VfsError::UnsupportedOperation(format!(
                "file not open for reading: {}",
                self.path
            )));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.writable() {
            return Err(VfsError::UnsupportedOperation(format!(
                "file not open for writing: {}",
                self.path
            )));
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// Returns 0 only at or past end-of-file.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_readable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let start = self.pos;
        let chunk_size = self.chunk_size;
        let inode_id = self.inode_id;
        let path = &self.path;

        let (size, len) = self.store.read(|conn| {
            let size = current_size(conn, inode_id, path)?;
            if start >= size {
                return Ok((size, 0));
            }
            let len = (buf.len() as u64).min(size - start) as usize;
            let end = start + len as u64;
            let out = &mut buf[..len];
            // Sparse chunks, and the tail of short chunks, read as zeros
            out.fill(0);

            chunk::for_each_in_range(
                conn,
                inode_id,
                start / chunk_size,
                (end - 1) / chunk_size,
                |index, data| {
                    let chunk_start = index * chunk_size;
                    let from = start.max(chunk_start);
                    let to = end.min(chunk_start + data.len() as u64);
                    if from < to {
                        let src = &data[(from - chunk_start) as usize..(to - chunk_start) as usize];
                        out[(from - start) as usize..(to - start) as usize].copy_from_slice(src);
                    }
                },
            )?;
            Ok((size, len))
        })?;

        if len > 0 {
            trace!(path = %self.path, offset = start, len, "read");
        }
        self.size = size;
        self.pos = start + len as u64;
        Ok(len)
    }

    /// Read at most `n` bytes; fewer only at end-of-file.
    pub fn read_at_most(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure_readable()?;
        let mut buf = Vec::new();
        (&mut *self).take(n as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Write all of `data` at the current position in one transaction.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(0);
        }

        let start = self.pos;
        let end = start
            .checked_add(data.len() as u64)
            .ok_or_else(|| VfsError::InvalidArgument("write past maximum file size".into()))?;
        let first = start / self.chunk_size;
        let last = (end - 1) / self.chunk_size;
        let chunk_size = self.chunk_size;

        let new_size = self.store.transaction(|conn| {
            let size = current_size(conn, self.inode_id, &self.path)?;
            let new_size = size.max(end);
            let final_index = (new_size - 1) / chunk_size;
            self.pad_tail_chunk(conn, first)?;

            for index in first..=last {
                let chunk_start = index * chunk_size;
                let rel_start = (start.max(chunk_start) - chunk_start) as usize;
                let rel_end = (end.min(chunk_start + chunk_size) - chunk_start) as usize;
                let piece = &data[(chunk_start + rel_start as u64 - start) as usize
                    ..(chunk_start + rel_end as u64 - start) as usize];

                if rel_start == 0 && rel_end as u64 == chunk_size {
                    chunk::put(conn, self.inode_id, index, piece)?;
                    continue;
                }

                // Partial chunk: keep the prefix and suffix around the new bytes
                let mut merged = chunk::get(conn, self.inode_id, index)?.unwrap_or_default();
                // only the file's last chunk may be short
                let len = if index < final_index { chunk_size as usize } else { rel_end };
                if merged.len() < len {
                    merged.resize(len, 0);
                }
                merged[rel_start..rel_end].copy_from_slice(piece);
                chunk::put(conn, self.inode_id, index, &merged)?;
            }

            inode::set_size(conn, self.inode_id, new_size, &timestamp())?;
            Ok(new_size)
        })?;

        trace!(path = %self.path, offset = start, len = data.len(), "write");
        self.size = new_size;
        self.pos = end;
        Ok(data.len())
    }

    /// The highest stored chunk below the first one a write touches stops
    /// being the last chunk, so it must be full length.
    fn pad_tail_chunk(&self, conn: &rusqlite::Connection, first_written: u64) -> Result<()> {
        let Some(tail) = chunk::last_index_before(conn, self.inode_id, first_written)? else {
            return Ok(());
        };
        if let Some(mut data) = chunk::get(conn, self.inode_id, tail)? {
            if data.len() < self.chunk_size as usize {
                data.resize(self.chunk_size as usize, 0);
                chunk::put(conn, self.inode_id, tail, &data)?;
            }
        }
        Ok(())
    }

    /// Move the position; the result is clamped at 0 and may lie past
    /// end-of-file.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        if let SeekFrom::End(_) = pos {
            self.size = self
                .store
                .read(|conn| current_size(conn, self.inode_id, &self.path))?;
        }
        let base: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
        };
        self.pos = base.clamp(0, u64::MAX as i128) as u64;
        Ok(self.pos)
    }

    /// Resize to `size`, or to the current position when `None`.
    ///
    /// The position is left where it was.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        let size = size.unwrap_or(self.pos);
        self.set_len(size)?;
        Ok(size)
    }

    /// Shrinking drops chunks wholly past `size` and trims the new last
    /// chunk; growing only records the size (the gap reads as zeros).
    pub fn set_len(&mut self, size: u64) -> Result<()> {
        self.ensure_writable()?;
        let chunk_size = self.chunk_size;

        self.store.transaction(|conn| {
            inode::set_size(conn, self.inode_id, size, &timestamp())?;
            if size == 0 {
                chunk::delete_from(conn, self.inode_id, 0)?;
                return Ok(());
            }
            let keep_last = (size - 1) / chunk_size;
            chunk::delete_from(conn, self.inode_id, keep_last + 1)?;
            let tail_len = size % chunk_size;
            if tail_len > 0 {
                chunk::trim(conn, self.inode_id, keep_last, tail_len as usize)?;
            }
            Ok(())
        })?;

        debug!(path = %self.path, from = self.size, to = size, "truncated");
        self.size = size;
        Ok(())
    }

    /// Every write is committed when it returns; this only checks the
    /// handle is usable and waits for other work on the store.
    pub fn flush_store(&self) -> Result<()> {
        self.ensure_open()?;
        self.store.flush();
        Ok(())
    }

    /// Close the handle. Later operations fail with `InvalidState`;
    /// closing twice is harmless.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.mode.writable() {
            self.store.flush();
        }
        self.closed = true;
        Ok(())
    }
}

/// Size recorded on the inode row; other handles may have changed it.
fn current_size(conn: &rusqlite::Connection, inode_id: i64, path: &str) -> Result<u64> {
    inode::get_by_id(conn, inode_id)?
        .map(|node| node.size)
        .ok_or_else(|| VfsError::NotFound(path.to_string()))
}

impl Read for RawFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl Write for RawFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_store()?)
    }
}

impl Seek for RawFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::ErrorKind;

    fn store(chunk_size: usize) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open(StoreConfig::memory().with_chunk_size(chunk_size)).unwrap())
    }

    fn open(store: &Arc<SqliteStore>, path: &str, mode: &str) -> Result<RawFile> {
        RawFile::open(store.clone(), path, OpenMode::parse(mode).unwrap())
    }

    fn chunks(store: &SqliteStore, file: &RawFile) -> Vec<(u64, Vec<u8>)> {
        store
            .read(|conn| {
                let mut out = Vec::new();
                chunk::for_each_in_range(conn, file.inode_id, 0, u64::MAX >> 1, |i, d| {
                    out.push((i, d.to_vec()))
                })?;
                Ok(out)
            })
            .unwrap()
    }

    fn read_all(file: &mut RawFile) -> Vec<u8> {
        file.seek_to(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_chunk_layout_and_truncate() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"0123456789").unwrap();
        assert_eq!(
            chunks(&store, &f),
            vec![
                (0, b"0123".to_vec()),
                (1, b"4567".to_vec()),
                (2, b"89".to_vec())
            ]
        );

        f.truncate(Some(5)).unwrap();
        assert_eq!(f.tell().unwrap(), 10);
        assert_eq!(read_all(&mut f), b"01234");
        assert_eq!(
            chunks(&store, &f),
            vec![(0, b"0123".to_vec()), (1, b"4".to_vec())]
        );
    }

    #[test]
    fn test_partial_overwrite_keeps_neighbours() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"abcdefghij").unwrap();
        f.seek_to(SeekFrom::Start(3)).unwrap();
        f.write_bytes(b"XYZ").unwrap();
        assert_eq!(read_all(&mut f), b"abcXYZghij");
        assert_eq!(f.len(), 10);
    }

    #[test]
    fn test_sparse_write_reads_zeros() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"ab").unwrap();
        f.seek_to(SeekFrom::Start(13)).unwrap();
        f.write_bytes(b"z").unwrap();

        let mut expected = b"ab".to_vec();
        expected.resize(13, 0);
        expected.push(b'z');
        assert_eq!(read_all(&mut f), expected);

        // Old tail chunk padded, gap chunks 1 and 2 never materialized
        let stored: Vec<u64> = chunks(&store, &f).into_iter().map(|(i, _)| i).collect();
        assert_eq!(stored, vec![0, 3]);
        assert_eq!(chunks(&store, &f)[0].1, vec![b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_truncate_grow_zero_fills() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"abc").unwrap();
        f.truncate(Some(9)).unwrap();
        assert_eq!(read_all(&mut f), b"abc\0\0\0\0\0\0");
        assert_eq!(chunks(&store, &f).len(), 1);
    }

    #[test]
    fn test_write_after_grow_pads_short_tail_chunk() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"abc").unwrap();
        f.truncate(Some(6)).unwrap();
        f.seek_to(SeekFrom::Start(9)).unwrap();
        f.write_bytes(b"z").unwrap();
        assert_eq!(
            chunks(&store, &f),
            vec![(0, b"abc\0".to_vec()), (2, b"\0z".to_vec())]
        );
        assert_eq!(read_all(&mut f), b"abc\0\0\0\0\0\0z");
    }

    #[test]
    fn test_write_into_hole_fills_whole_chunk() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.seek_to(SeekFrom::Start(8)).unwrap();
        f.write_bytes(b"tail").unwrap();
        f.seek_to(SeekFrom::Start(5)).unwrap();
        f.write_bytes(b"x").unwrap();
        assert_eq!(
            chunks(&store, &f),
            vec![(1, b"\0x\0\0".to_vec()), (2, b"tail".to_vec())]
        );
        assert_eq!(read_all(&mut f), b"\0\0\0\0\0x\0\0tail");
    }

    #[test]
    fn test_read_stops_at_eof() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"hello").unwrap();
        f.seek_to(SeekFrom::Start(3)).unwrap();
        assert_eq!(f.read_at_most(100).unwrap(), b"lo");
        assert_eq!(f.read_at_most(100).unwrap(), b"");
        f.seek_to(SeekFrom::Start(50)).unwrap();
        assert_eq!(f.read_at_most(10).unwrap(), b"");
    }

    #[test]
    fn test_seek_clamps_at_zero() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.write_bytes(b"hello").unwrap();
        assert_eq!(f.seek_to(SeekFrom::Current(-100)).unwrap(), 0);
        assert_eq!(f.seek_to(SeekFrom::End(-2)).unwrap(), 3);
        assert_eq!(f.seek_to(SeekFrom::End(10)).unwrap(), 15);
    }

    #[test]
    fn test_modes() {
        let store = store(4);
        assert_eq!(
            open(&store, "/missing", "r").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let mut w = open(&store, "/f", "w").unwrap();
        w.write_bytes(b"hello").unwrap();
        let err = w.read_into(&mut [0; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        w.close().unwrap();

        let mut r = open(&store, "/f", "r").unwrap();
        assert_eq!(
            r.write_bytes(b"x").unwrap_err().kind(),
            ErrorKind::UnsupportedOperation
        );

        let mut a = open(&store, "/f", "a").unwrap();
        assert_eq!(a.tell().unwrap(), 5);
        a.write_bytes(b"!").unwrap();

        let mut wp = open(&store, "/f", "w+").unwrap();
        assert_eq!(wp.len(), 6);
        assert_eq!(read_all(&mut wp), b"hello!");

        let w = open(&store, "/f", "w").unwrap();
        assert_eq!(w.len(), 0);

        assert_eq!(
            open(&store, "/f", "x").unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert!(open(&store, "/g", "x+").is_ok());
    }

    #[test]
    fn test_closed_handle_rejects_everything() {
        let store = store(4);
        let mut f = open(&store, "/f", "w+").unwrap();
        f.close().unwrap();
        f.close().unwrap();
        assert_eq!(f.write_bytes(b"x").unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(f.read_into(&mut [0; 1]).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(f.seek_to(SeekFrom::Start(0)).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(f.tell().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(f.truncate(Some(0)).unwrap_err().kind(), ErrorKind::InvalidState);

        let io_err = f.flush().unwrap_err();
        assert_eq!(VfsError::from_io(io_err).kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_exclusive_create_race_has_one_winner() {
        let store = store(4);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || open(&store, "/race", "x").map(|_| ()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(|r| r.err()) {
            assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        }
    }
}
