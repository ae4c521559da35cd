use log::debug;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use super::{ArtifactKind, ArtifactRef, ArtifactStore, valid_name};
use crate::error::StoreError;

/// Artifacts as plain files under `root/{contracts,pdfs,signed}/`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for kind in [ArtifactKind::Source, ArtifactKind::Base, ArtifactKind::Signed] {
            fs::create_dir_all(root.join(kind.dir()))?;
        }
        Ok(FsArtifactStore { root })
    }

    /// Absolute path of a stored artifact.
    pub fn path_of(&self, reference: &ArtifactRef) -> Result<PathBuf, StoreError> {
        let (dir, name) = reference.components()?;
        Ok(self.root.join(dir).join(name))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, kind: ArtifactKind, name: &str, bytes: &[u8]) -> Result<ArtifactRef, StoreError> {
        if !valid_name(name) {
            return Err(StoreError::InvalidReference(name.to_string()));
        }
        let reference = ArtifactRef::for_artifact(kind, name);
        let path = self.root.join(kind.dir()).join(name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Duplicate(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        debug!("Stored {} ({} bytes)", reference, bytes.len());
        Ok(reference)
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(reference)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(reference.to_string()),
            _ => StoreError::Io(e),
        })
    }
}
