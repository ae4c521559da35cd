//! Persistence seams for the signing engine.
//!
//! Contract rows live behind [`RecordStore`]; documents (uploaded sources,
//! converted bases, signed outputs) behind [`ArtifactStore`]. Both are injected
//! into the engine so tests can run fully in memory.

mod fs;
mod lmdb;
mod memory;

pub use fs::FsArtifactStore;
pub use lmdb::HeedRecordStore;
pub use memory::{MemoryArtifactStore, MemoryRecordStore};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::{ContractRecord, SigningOutcome, generate_access_token};
use crate::error::StoreError;

pub trait RecordStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<ContractRecord>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the id is taken.
    fn insert(&self, record: &ContractRecord) -> Result<(), StoreError>;

    /// Atomic conditional update: only a `Created` record may become `Signed`.
    /// Returns the updated record, [`StoreError::Conflict`] if it was already
    /// signed, [`StoreError::NotFound`] if it does not exist.
    fn mark_signed(&self, id: &str, outcome: &SigningOutcome) -> Result<ContractRecord, StoreError>;

    fn create_token(&self) -> String {
        generate_access_token()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Source,
    Base,
    Signed,
}

impl ArtifactKind {
    pub fn dir(self) -> &'static str {
        match self {
            ArtifactKind::Source => "contracts",
            ArtifactKind::Base => "pdfs",
            ArtifactKind::Signed => "signed",
        }
    }
}

/// Relative location of a stored artifact, e.g. `signed/CN-..._SIGNED_1a2b3c.pdf`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(path: impl Into<String>) -> Self {
        ArtifactRef(path.into())
    }

    pub fn for_artifact(kind: ArtifactKind, name: &str) -> Self {
        ArtifactRef(format!("{}/{}", kind.dir(), name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into `(dir, name)`, rejecting anything that could escape the store.
    pub fn components(&self) -> Result<(&str, &str), StoreError> {
        let (dir, name) = self
            .0
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidReference(self.0.clone()))?;
        let known = [ArtifactKind::Source, ArtifactKind::Base, ArtifactKind::Signed]
            .iter()
            .any(|k| k.dir() == dir);
        if !known || !valid_name(name) {
            return Err(StoreError::InvalidReference(self.0.clone()));
        }
        Ok((dir, name))
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-once blob storage.
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes` under `kind`/`name`; an existing artifact is never replaced.
    fn put(&self, kind: ArtifactKind, name: &str, bytes: &[u8]) -> Result<ArtifactRef, StoreError>;

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, StoreError>;
}

pub(crate) fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
}
