//! Model artifact persistence.
//!
//! Artifacts are JSON documents addressed by name. The handler only ever
//! `load`s; `save` is used by the offline training routine.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;

/// Artifact name of the fitted scaler.
pub const SCALER_ARTIFACT: &str = "scaler";
/// Artifact name of the fitted outlier model.
pub const MODEL_ARTIFACT: &str = "model";

/// Named load/save of model state.
pub trait ModelStore {
    /// Read and decode the artifact called `name`.
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError>;

    /// Encode and write `state` under `name`, replacing any previous artifact.
    fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<(), StoreError>;
}

/// Stores each artifact as `<root>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileModelStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the artifact called `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }
}

impl ModelStore for FileModelStore {
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.path_for(name);
        let bytes = fs::read(&path).map_err(|source| {
            if source.kind() == IoErrorKind::NotFound {
                StoreError::Missing {
                    name: name.to_string(),
                    path: path.clone(),
                }
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        debug!(artifact = name, path = %path.display(), bytes = bytes.len(), "loading artifact");

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Codec {
            name: name.to_string(),
            source,
        })
    }

    fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let bytes = serde_json::to_vec(state).map_err(|source| StoreError::Codec {
            name: name.to_string(),
            source,
        })?;

        // Write to a sibling file first so a reader never sees a partial artifact.
        let path = self.path_for(name);
        let tmp = self.root.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, &bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        info!(artifact = name, path = %path.display(), bytes = bytes.len(), "saved artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scaler::StandardScaler;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileModelStore::new(dir.path().join("models"));
        let scaler = StandardScaler::from_parts(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();

        store.save(SCALER_ARTIFACT, &scaler).unwrap();
        assert!(store.path_for(SCALER_ARTIFACT).exists());

        let loaded: StandardScaler = store.load(SCALER_ARTIFACT).unwrap();
        assert_eq!(loaded, scaler);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempdir().unwrap();
        let store = FileModelStore::new(dir.path());
        let err = store.load::<StandardScaler>(MODEL_ARTIFACT).unwrap_err();
        assert!(matches!(err, StoreError::Missing { ref name, .. } if name == "model"));
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = tempdir().unwrap();
        let store = FileModelStore::new(dir.path());
        fs::write(store.path_for(SCALER_ARTIFACT), b"{not json").unwrap();
        let err = store.load::<StandardScaler>(SCALER_ARTIFACT).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }
}
