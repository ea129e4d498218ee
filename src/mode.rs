//! Open-mode strings (`"r"`, `"wb"`, `"a+"`, `"x+b"`, ...)

use crate::error::{Result, VfsError};
use std::str::FromStr;

/// Parsed and validated open mode
///
/// Exactly one of `read`, `write`, `append`, `exclusive` is set. `plus`
/// adds the missing direction, `binary` selects byte semantics for the
/// whole-file helpers (`t` is accepted as an explicit text marker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub exclusive: bool,
    pub binary: bool,
    pub plus: bool,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || VfsError::InvalidArgument(format!("invalid mode: {mode:?}"));

        let mut parsed = OpenMode::default();
        let mut text = false;
        let mut primaries = 0;

        for c in mode.chars() {
            let flag = match c {
                'r' => &mut parsed.read,
                'w' => &mut parsed.write,
                'a' => &mut parsed.append,
                'x' => &mut parsed.exclusive,
                'b' => &mut parsed.binary,
                '+' => &mut parsed.plus,
                't' => &mut text,
                _ => return Err(invalid()),
            };
            if *flag {
                return Err(invalid());
            }
            *flag = true;
            if matches!(c, 'r' | 'w' | 'a' | 'x') {
                primaries += 1;
            }
        }

        if primaries != 1 || (text && parsed.binary) {
            return Err(invalid());
        }
        Ok(parsed)
    }

    pub fn readable(&self) -> bool {
        self.read || self.plus
    }

    pub fn writable(&self) -> bool {
        self.write || self.append || self.exclusive || self.plus
    }

    /// `w` without `+` empties the file as soon as it is opened.
    pub fn truncates(&self) -> bool {
        self.write && !self.plus
    }
}

impl FromStr for OpenMode {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self> {
        OpenMode::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_modes() {
        for mode in [
            "r", "w", "a", "x", "rb", "wb", "ab", "xb", "r+", "w+", "a+", "x+", "rb+", "r+b",
            "wb+", "x+b", "rt", "w+t",
        ] {
            assert!(OpenMode::parse(mode).is_ok(), "{mode}");
        }
    }

    #[test]
    fn test_parse_invalid_modes() {
        for mode in ["", "b", "+", "rw", "rr", "r++", "rbt", "q", "wx", "ra+"] {
            assert!(OpenMode::parse(mode).is_err(), "{mode}");
        }
    }

    #[test]
    fn test_directions() {
        let r = OpenMode::parse("r").unwrap();
        assert!(r.readable() && !r.writable());

        let w = OpenMode::parse("wb").unwrap();
        assert!(!w.readable() && w.writable() && w.binary && w.truncates());

        let wp = OpenMode::parse("w+").unwrap();
        assert!(wp.readable() && wp.writable() && !wp.truncates());

        let a = OpenMode::parse("a+").unwrap();
        assert!(a.readable() && a.writable() && a.append);
    }
}
