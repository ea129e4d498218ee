//! # sqlvfs - a virtual file system in one SQLite database
//!
//! Files and directories live in an inode table keyed by normalized absolute
//! path; file content is split into fixed-size chunks in a second table.
//! Every mutation runs in a single SQLite transaction, so a failed operation
//! leaves nothing behind.
//!
//! A [`VirtualFileSystem`] can be stacked on top of other file systems
//! ("underlays"). Reads fall through to the underlays by priority when the
//! local store has nothing at a path; writes always land locally.
//!
//! ## Example
//!
//! ```rust
//! use std::io::{Read, Write};
//! use sqlvfs::VirtualFileSystem;
//!
//! fn main() -> sqlvfs::Result<()> {
//!     let base = VirtualFileSystem::memory()?;
//!     base.write_text("/config/defaults.toml", "level = 1\n")?;
//!
//!     let vfs = VirtualFileSystem::memory()?;
//!     vfs.add_underlay(&base, 10, Some("base"))?;
//!
//!     let mut file = vfs.open("/notes/today.txt", "w")?;
//!     file.write_all(b"hello")?;
//!     file.close()?;
//!
//!     let mut text = String::new();
//!     vfs.open("/config/defaults.toml", "r")?.read_to_string(&mut text)?;
//!     assert_eq!(text, "level = 1\n");
//!     assert_eq!(vfs.which_layer("/config/defaults.toml")?.as_deref(), Some("base"));
//!     assert_eq!(vfs.listdir("/")?, vec!["config", "notes"]);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod layer;
pub mod mode;
pub mod path;
pub mod raw;
pub mod schema;
pub mod walk;

mod chunk;
mod inode;

pub use backend::SqliteStore;
pub use config::StoreConfig;
pub use error::{ErrorKind, Result, VfsError};
pub use file::{Buffering, VfsFile};
pub use fs::{Stat, VirtualFileSystem};
pub use layer::{LayerInfo, LayerProbe, LayerResolution};
pub use mode::OpenMode;
pub use raw::RawFile;
pub use walk::{Walk, WalkEntry};
