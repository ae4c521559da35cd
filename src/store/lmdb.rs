use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use log::{debug, info};
use std::fs;
use std::path::Path;

use super::RecordStore;
use crate::contract::{ContractRecord, SigningOutcome};
use crate::error::StoreError;

const CONTRACTS_DB: &str = "contracts";
const MAP_SIZE: usize = 64 * 1024 * 1024;

/// Contract records in an LMDB environment, one JSON value per contract id.
///
/// Every mutation runs inside a single write transaction. LMDB allows one
/// writer at a time, which is what makes `mark_signed` a compare-and-set.
#[derive(Clone)]
pub struct HeedRecordStore {
    env: Env,
    contracts: Database<Str, Bytes>,
}

impl HeedRecordStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        // SAFETY: the environment directory is owned by this process and never
        // opened twice through heed.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(4)
                .open(dir)?
        };
        let mut wtxn = env.write_txn()?;
        let contracts: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(CONTRACTS_DB))?;
        wtxn.commit()?;
        info!("Opened contract store at {}", dir.display());
        Ok(HeedRecordStore { env, contracts })
    }
}

impl RecordStore for HeedRecordStore {
    fn get(&self, id: &str) -> Result<Option<ContractRecord>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let record = match self.contracts.get(&rtxn, id)? {
            Some(raw) => Some(serde_json::from_slice(raw)?),
            None => None,
        };
        Ok(record)
    }

    fn insert(&self, record: &ContractRecord) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        if self.contracts.get(&wtxn, &record.id)?.is_some() {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        let raw = serde_json::to_vec(record)?;
        self.contracts.put(&mut wtxn, &record.id, &raw)?;
        wtxn.commit()?;
        debug!("Inserted contract {}", record.id);
        Ok(())
    }

    fn mark_signed(&self, id: &str, outcome: &SigningOutcome) -> Result<ContractRecord, StoreError> {
        let mut wtxn = self.env.write_txn()?;
        let mut record: ContractRecord = match self.contracts.get(&wtxn, id)? {
            Some(raw) => serde_json::from_slice(raw)?,
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        // dropping the txn on error aborts it
        record.apply_signing(outcome)?;
        let raw = serde_json::to_vec(&record)?;
        self.contracts.put(&mut wtxn, id, &raw)?;
        wtxn.commit()?;
        debug!("Contract {id} marked signed");
        Ok(record)
    }
}
