//! Store configuration

use crate::error::{Result, VfsError};
use crate::schema::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Location string that selects a private in-memory database
pub const MEMORY_LOCATION: &str = ":memory:";

/// Configuration for one backing store
///
/// ```
/// use sqlvfs::StoreConfig;
///
/// let cfg = StoreConfig::from_json(r#"{ "location": "save.db", "chunk_size": 4096 }"#).unwrap();
/// assert_eq!(cfg.chunk_size, 4096);
/// assert!(!cfg.read_only);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file path, or ":memory:" for in-memory
    pub location: String,
    /// Maximum size of one chunk row in bytes
    pub chunk_size: usize,
    /// Open the database read-only; every mutator fails
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: MEMORY_LOCATION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_only: false,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            location: path.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: StoreConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn is_memory(&self) -> bool {
        self.location == MEMORY_LOCATION
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(VfsError::InvalidArgument(
                "database location must not be empty".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(VfsError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let cfg = StoreConfig::default();
        assert!(cfg.is_memory());
        assert_eq!(cfg.chunk_size, 64 * 1024);
        assert!(!cfg.read_only);
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = StoreConfig::from_json(r#"{ "read_only": true }"#).unwrap();
        assert!(cfg.is_memory());
        assert!(cfg.read_only);
    }

    #[test]
    fn test_from_json_rejects_zero_chunk() {
        let err = StoreConfig::from_json(r#"{ "chunk_size": 0 }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = StoreConfig::from_json("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_empty_location_invalid() {
        let err = StoreConfig::file("  ").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
