//! Underlay resolution
//!
//! An underlay is another [`VirtualFileSystem`] consulted for reads when the
//! local store has nothing at a path. Underlays are probed in descending
//! priority; among equal priorities the one added first wins. They are never
//! written through this handle.

use crate::error::{Result, VfsError};
use crate::fs::VirtualFileSystem;
use crate::path::normalize;
use serde::Serialize;
use tracing::debug;

/// Name reported for the local store
pub const LOCAL_LAYER: &str = "local";

#[derive(Clone)]
pub(crate) struct Underlay {
    pub(crate) name: String,
    pub(crate) priority: i64,
    pub(crate) fs: VirtualFileSystem,
}

/// One entry of [`VirtualFileSystem::list_layers`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub name: String,
    /// `None` for the local store, which always resolves first
    pub priority: Option<i64>,
    pub location: String,
    pub writable: bool,
}

/// Whether one layer holds the probed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerProbe {
    pub name: String,
    pub has_path: bool,
}

/// Result of [`VirtualFileSystem::which_layer_detailed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerResolution {
    pub path: String,
    /// Layer that serves reads of `path`, if any
    pub resolved_from: Option<String>,
    /// Every layer in resolution order, local first
    pub layers: Vec<LayerProbe>,
}

impl VirtualFileSystem {
    /// Attach `underlay` for read fallback and return the name it was
    /// registered under.
    ///
    /// Without a name one is generated as `underlay_N`. Names are unique per
    /// file system and `local` is reserved. Attaching a file system to
    /// itself, directly or through its own underlays, is rejected.
    pub fn add_underlay(
        &self,
        underlay: &VirtualFileSystem,
        priority: i64,
        name: Option<&str>,
    ) -> Result<String> {
        if underlay.reaches(self) {
            return Err(VfsError::InvalidArgument(
                "underlay would make the file system its own layer".to_string(),
            ));
        }

        let mut underlays = self.inner.underlays.write();
        let name = match name {
            Some("") => {
                return Err(VfsError::InvalidArgument("empty underlay name".to_string()));
            }
            Some(name) => {
                if name == LOCAL_LAYER || underlays.iter().any(|u| u.name == name) {
                    return Err(VfsError::AlreadyExists(format!("underlay {name}")));
                }
                name.to_string()
            }
            None => {
                let mut n = underlays.len();
                loop {
                    let candidate = format!("underlay_{n}");
                    if !underlays.iter().any(|u| u.name == candidate) {
                        break candidate;
                    }
                    n += 1;
                }
            }
        };

        underlays.push(Underlay {
            name: name.clone(),
            priority,
            fs: underlay.clone(),
        });
        // stable: equal priorities keep insertion order
        underlays.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            name = %name,
            priority,
            location = %underlay.config().location,
            "added underlay"
        );
        Ok(name)
    }

    /// Detach the underlay called `name`; false if there is none.
    pub fn remove_underlay(&self, name: &str) -> bool {
        let mut underlays = self.inner.underlays.write();
        let before = underlays.len();
        underlays.retain(|u| u.name != name);
        let removed = underlays.len() != before;
        if removed {
            debug!(name = %name, "removed underlay");
        }
        removed
    }

    /// All layers in resolution order, local first.
    pub fn list_layers(&self) -> Vec<LayerInfo> {
        let mut layers = vec![LayerInfo {
            name: LOCAL_LAYER.to_string(),
            priority: None,
            location: self.config().location.clone(),
            writable: !self.is_read_only(),
        }];
        layers.extend(self.underlays().into_iter().map(|u| LayerInfo {
            location: u.fs.config().location.clone(),
            writable: !u.fs.is_read_only(),
            priority: Some(u.priority),
            name: u.name,
        }));
        layers
    }

    /// Name of the layer that serves reads of `path`.
    pub fn which_layer(&self, path: &str) -> Result<Option<String>> {
        let path = normalize(path)?;
        if self.exists_locally(&path)? {
            return Ok(Some(LOCAL_LAYER.to_string()));
        }
        for underlay in self.underlays() {
            if underlay.fs.exists(&path)? {
                return Ok(Some(underlay.name));
            }
        }
        Ok(None)
    }

    /// Probe every layer for `path`, not only the winning one.
    pub fn which_layer_detailed(&self, path: &str) -> Result<LayerResolution> {
        let path = normalize(path)?;
        let mut layers = vec![LayerProbe {
            name: LOCAL_LAYER.to_string(),
            has_path: self.exists_locally(&path)?,
        }];
        for underlay in self.underlays() {
            layers.push(LayerProbe {
                has_path: underlay.fs.exists(&path)?,
                name: underlay.name,
            });
        }
        let resolved_from = layers.iter().find(|l| l.has_path).map(|l| l.name.clone());
        Ok(LayerResolution {
            path,
            resolved_from,
            layers,
        })
    }

    /// Snapshot of the underlays in resolution order.
    pub(crate) fn underlays(&self) -> Vec<Underlay> {
        self.inner.underlays.read().clone()
    }

    /// True if `target` is this file system or any of its transitive
    /// underlays.
    fn reaches(&self, target: &VirtualFileSystem) -> bool {
        self.ptr_eq(target) || self.underlays().iter().any(|u| u.fs.reaches(target))
    }
}
