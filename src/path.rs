//! POSIX-style path helpers
//!
//! Every public entry point normalizes its path arguments through
//! [`normalize`] before touching the inode table. Relative paths are rooted
//! at `/`; there is no working directory.

use crate::error::{Result, VfsError};
use crate::schema::ROOT_PATH;

/// Absolute-ize `path` and collapse `.`, `..` and repeated separators.
///
/// `..` above the root stays at the root.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(VfsError::InvalidArgument("path must not be empty".to_string()));
    }
    if path.contains('\0') {
        return Err(VfsError::InvalidArgument(format!(
            "path contains a NUL byte: {path:?}"
        )));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        Ok(ROOT_PATH.to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Parent of a normalized path; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(idx) => &path[..idx],
    }
}

/// Join a normalized directory path and a single entry name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Exclusive `(low, high)` bounds such that every strict descendant `d` of
/// `path` satisfies `low < d < high` under byte-wise string ordering.
///
/// `'0'` is the byte immediately after `'/'`, so the range covers exactly
/// the paths that start with `path + "/"`. This lets subtree scans use the
/// path index without escaping `GLOB`/`LIKE` metacharacters in `path`.
pub fn descendant_bounds(path: &str) -> (String, String) {
    if path == ROOT_PATH {
        (ROOT_PATH.to_string(), "0".to_string())
    } else {
        (format!("{path}/"), format!("{path}0"))
    }
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH {
        return path != ROOT_PATH;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}
