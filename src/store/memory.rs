use parking_lot::Mutex;
use std::collections::HashMap;

use super::{ArtifactKind, ArtifactRef, ArtifactStore, RecordStore, valid_name};
use crate::contract::{ContractRecord, SigningOutcome};
use crate::error::StoreError;

/// Process-local record store, mostly for tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, ContractRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &str) -> Result<Option<ContractRecord>, StoreError> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn insert(&self, record: &ContractRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn mark_signed(&self, id: &str, outcome: &SigningOutcome) -> Result<ContractRecord, StoreError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.apply_signing(outcome)?;
        Ok(record.clone())
    }
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<ArtifactRef, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// References currently held under `kind`, sorted.
    pub fn list(&self, kind: ArtifactKind) -> Vec<ArtifactRef> {
        let prefix = format!("{}/", kind.dir());
        let mut refs: Vec<_> = self
            .blobs
            .lock()
            .keys()
            .filter(|r| r.as_str().starts_with(&prefix))
            .cloned()
            .collect();
        refs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        refs
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, kind: ArtifactKind, name: &str, bytes: &[u8]) -> Result<ArtifactRef, StoreError> {
        if !valid_name(name) {
            return Err(StoreError::InvalidReference(name.to_string()));
        }
        let reference = ArtifactRef::for_artifact(kind, name);
        let mut blobs = self.blobs.lock();
        if blobs.contains_key(&reference) {
            return Err(StoreError::Duplicate(reference.to_string()));
        }
        blobs.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        reference.components()?;
        self.blobs
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))
    }
}
