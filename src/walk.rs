//! Lazy top-down tree traversal

use crate::error::VfsError;
use crate::fs::VirtualFileSystem;
use crate::path::{join, normalize};

/// `(directory, subdirectory names, file names)`, names sorted
pub type WalkEntry = (String, Vec<String>, Vec<String>);

pub(crate) type ErrorHook<'a> = Box<dyn FnMut(VfsError) + 'a>;

/// Iterator returned by [`VirtualFileSystem::walk`]
///
/// Each directory is listed only when the iterator reaches it, so
/// directories created or removed mid-walk may or may not be seen. A
/// directory is yielded before any of its descendants.
pub struct Walk<'a> {
    fs: &'a VirtualFileSystem,
    pending: Vec<String>,
    on_error: Option<ErrorHook<'a>>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(fs: &'a VirtualFileSystem, top: &str, on_error: Option<ErrorHook<'a>>) -> Self {
        let mut walk = Self {
            fs,
            pending: Vec::new(),
            on_error,
        };
        match normalize(top) {
            Ok(top) => walk.pending.push(top),
            Err(err) => walk.report(err),
        }
        walk
    }

    fn report(&mut self, err: VfsError) {
        if let Some(hook) = self.on_error.as_mut() {
            hook(err);
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(dir) = self.pending.pop() {
            let entries = match self.fs.scan_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    self.report(err);
                    continue;
                }
            };

            let mut dirs = Vec::new();
            let mut files = Vec::new();
            for (name, is_dir) in entries {
                if is_dir {
                    dirs.push(name);
                } else {
                    files.push(name);
                }
            }
            // reversed so the first subdirectory is visited next
            self.pending
                .extend(dirs.iter().rev().map(|name| join(&dir, name)));
            return Some((dir, dirs, files));
        }
        None
    }
}

impl std::fmt::Debug for Walk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walk").field("pending", &self.pending).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_order_is_depth_first() {
        let fs = VirtualFileSystem::memory().unwrap();
        fs.makedirs("/a/b", false).unwrap();
        fs.makedirs("/c", false).unwrap();
        fs.write_bytes("/a/f.txt", b"1").unwrap();
        fs.write_bytes("/a/b/g.txt", b"2").unwrap();

        let dirs: Vec<String> = fs.walk("/").map(|(dir, _, _)| dir).collect();
        assert_eq!(dirs, vec!["/", "/a", "/a/b", "/c"]);

        let (_, subdirs, files) = fs.walk("/a").next().unwrap();
        assert_eq!(subdirs, vec!["b"]);
        assert_eq!(files, vec!["f.txt"]);
    }

    #[test]
    fn test_walk_missing_top_reports_error() {
        let fs = VirtualFileSystem::memory().unwrap();
        assert_eq!(fs.walk("/nope").count(), 0);

        let mut errors = Vec::new();
        let count = fs.walk_with("/nope", |e| errors.push(e.kind())).count();
        assert_eq!(count, 0);
        assert_eq!(errors, vec![crate::error::ErrorKind::NotFound]);
    }
}
