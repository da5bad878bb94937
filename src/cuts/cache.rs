//! Persistent cache of computed cut masks.
//!
//! Layout: `<root>/run<N>/<namespace>/<cut>.json`, each file holding the data
//! identity and the cut parameters the mask was computed with. A mismatch in
//! either makes the entry stale. Nothing here is fatal for the caller: every
//! error means "recompute".

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::model::DataIdentity;
use crate::error::CutError;
use crate::space::{Mask, Space, SpaceModel};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached mask")]
    Miss,

    #[error("stale entry: {0}")]
    Stale(String),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("cache I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("cached mask does not fit the run: {0}")]
    Shape(#[from] CutError),
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedMask {
    identity: DataIdentity,
    /// Parameters the generator ran with, as a readable string.
    params: String,
    space: Space,
    mask: Vec<bool>,
}

/// Cut masks of one registry of one run.
#[derive(Debug, Clone)]
pub struct CutCache {
    dir: PathBuf,
    identity: DataIdentity,
}

impl CutCache {
    pub fn new(root: &Path, namespace: &str, identity: DataIdentity) -> Self {
        Self {
            dir: root.join(format!("run{}", identity.run)).join(namespace),
            identity,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// The mask cached under `name`, provided it was computed from the same
    /// data with the same `params`.
    pub fn load(&self, name: &str, params: &str, model: &SpaceModel) -> Result<Mask, CacheError> {
        let text = match fs::read_to_string(self.path(name)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CacheError::Miss),
            Err(e) => return Err(e.into()),
        };
        let cached: CachedMask = serde_json::from_str(&text)?;
        if cached.identity != self.identity {
            return Err(CacheError::Stale(format!(
                "computed for {}, data is now {}",
                cached.identity, self.identity
            )));
        }
        if cached.params != params {
            return Err(CacheError::Stale(format!(
                "computed with '{}', now '{params}'",
                cached.params
            )));
        }
        Ok(model.tag(cached.space, cached.mask)?)
    }

    /// Write through a temporary file so readers never see a partial entry.
    pub fn save(&self, name: &str, params: &str, mask: &Mask) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let entry = CachedMask {
            identity: self.identity,
            params: params.to_string(),
            space: mask.space(),
            mask: mask.values().to_vec(),
        };
        let path = self.path(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path(name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
