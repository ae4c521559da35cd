use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::{self, JoinError};

use crate::config::Config;
use crate::contract::{
    ContractRecord, Placement, SigningOutcome, SigningStatus, StatusSnapshot, generate_contract_id,
    random_hex, sanitize_filename,
};
use crate::convert::{AutoConverter, Converter, SourceFile};
use crate::error::{PageIndexError, SignError, StoreError};
use crate::geometry::{SignatureSize, compute_placement};
use crate::merge::merge;
use crate::overlay::build_overlay;
use crate::pdf::PagedDocument;
use crate::render::{SignaturePayload, SignatureRenderer};
use crate::store::{
    ArtifactKind, ArtifactRef, ArtifactStore, FsArtifactStore, HeedRecordStore, RecordStore,
};

const DEFAULT_PAGE: i64 = 0;
const DEFAULT_X_PCT: f64 = 0.5;
const DEFAULT_Y_PCT: f64 = 0.85;
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ContractMetadata {
    pub client_email: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CreatedContract {
    pub contract_id: String,
    pub access_token: String,
    pub base_document_ref: ArtifactRef,
    pub page_count: usize,
    pub pdf_url: String,
    pub sign_link: String,
}

/// One signing attempt: what to draw and where.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRequest {
    pub payload: SignaturePayload,
    pub page_index: i64,
    pub x_pct: f64,
    pub y_pct: f64,
    /// `None` uses the configured default width ratio.
    pub size: Option<SignatureSize>,
}

impl SignatureRequest {
    pub fn new(payload: SignaturePayload) -> Self {
        SignatureRequest {
            payload,
            page_index: DEFAULT_PAGE,
            x_pct: DEFAULT_X_PCT,
            y_pct: DEFAULT_Y_PCT,
            size: None,
        }
    }

    pub fn at(mut self, page_index: i64, x_pct: f64, y_pct: f64) -> Self {
        self.page_index = page_index;
        self.x_pct = x_pct;
        self.y_pct = y_pct;
        self
    }

    /// Parses the JSON body posted by the signing page:
    /// `{"signature": ..., "page": 0, "x_pct": 0.5, "y_pct": 0.85}`.
    /// Placement fields are optional.
    pub fn from_json(body: &Value) -> Result<Self, SignError> {
        let map = body.as_object().ok_or_else(|| {
            SignError::InvalidSignatureFormat("request body must be a JSON object".to_string())
        })?;
        let signature = map.get("signature").ok_or_else(|| {
            SignError::InvalidSignatureFormat("missing signature".to_string())
        })?;
        let payload = SignaturePayload::from_json(signature)?;

        let page_index = match map.get("page") {
            None | Some(Value::Null) => DEFAULT_PAGE,
            Some(v) => whole_number(v).ok_or_else(|| {
                SignError::InvalidPageIndex(PageIndexError::NotAnInteger(v.to_string()))
            })?,
        };
        Ok(SignatureRequest {
            payload,
            page_index,
            x_pct: fraction(map.get("x_pct"), "x_pct", DEFAULT_X_PCT)?,
            y_pct: fraction(map.get("y_pct"), "y_pct", DEFAULT_Y_PCT)?,
            size: None,
        })
    }
}

/// `3`, `3.0`, `"3"` and `"3.0"` all read as page 3; `3.5` does not.
fn whole_number(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => return Some(i),
            None => n.as_f64()?,
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => return Some(i),
                Err(_) => s.parse::<f64>().ok()?,
            }
        }
        _ => return None,
    };
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    (float.is_finite() && float.fract() == 0.0 && in_range).then_some(float as i64)
}

fn fraction(value: Option<&Value>, name: &str, default: f64) -> Result<f64, SignError> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    };
    parsed.ok_or_else(|| SignError::InvalidCoordinate(format!("{name} must be a number")))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SignedDocument {
    pub reference: ArtifactRef,
    pub url: String,
}

/// The CPU-bound part of a signing request, run on the blocking pool:
/// render, place, overlay, merge and store the signed output.
struct Composition {
    artifacts: Arc<dyn ArtifactStore>,
    renderer: Arc<SignatureRenderer>,
    contract_id: String,
    base_document_ref: ArtifactRef,
    default_width_ratio: f64,
}

impl Composition {
    fn run(self, request: SignatureRequest) -> Result<SigningOutcome, SignError> {
        let base_bytes = self.artifacts.get(&self.base_document_ref)?;
        let base = PagedDocument::from_bytes(base_bytes)
            .map_err(|e| SignError::MergeFailure(format!("stored base document: {e}")))?;
        let page_index = usize::try_from(request.page_index)
            .ok()
            .filter(|&i| i < base.page_count())
            .ok_or(SignError::InvalidPageIndex(PageIndexError::OutOfRange {
                index: request.page_index,
                page_count: base.page_count(),
            }))?;
        let page = base.pages[page_index];

        let artifact = self.renderer.render(&request.payload)?;
        let size = request
            .size
            .unwrap_or(SignatureSize::Relative(self.default_width_ratio));
        let rect = compute_placement(
            page.width,
            page.height,
            request.x_pct,
            request.y_pct,
            artifact.aspect_ratio(),
            size,
        )?;

        let overlay = build_overlay(&artifact, page.width, page.height, &rect)?;
        let output = merge(&base.bytes, &overlay, page_index)?;
        let name = format!("{}_SIGNED_{}.pdf", self.contract_id, random_hex(6));
        let signed_document_ref = self.artifacts.put(ArtifactKind::Signed, &name, output.bytes())?;

        Ok(SigningOutcome {
            placement: Placement {
                page_index,
                x_pct: request.x_pct,
                y_pct: request.y_pct,
            },
            signed_document_ref,
            signed_at: Utc::now(),
        })
    }
}

fn joined<T>(result: Result<T, JoinError>) -> Result<T, SignError> {
    result.map_err(|e| SignError::MergeFailure(format!("signing task did not complete: {e}")))
}

/// Owns the contract lifecycle: upload, link validation, signing, download.
pub struct SigningEngine {
    config: Config,
    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ArtifactStore>,
    converter: Arc<dyn Converter>,
    renderer: Arc<SignatureRenderer>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SigningEngine {
    pub fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        artifacts: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let renderer = Arc::new(SignatureRenderer::from_config(&config.render));
        SigningEngine {
            config,
            records,
            artifacts,
            converter,
            renderer,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Engine over the on-disk stores under `config.data_dir`.
    pub fn open(config: Config) -> Result<Self, SignError> {
        let data_dir = config.data_dir.clone();
        let records = HeedRecordStore::open(&data_dir.join("db"))?;
        let artifacts = FsArtifactStore::open(&data_dir)?;
        let converter = AutoConverter::from_config(&config.converter);
        info!("Signing engine ready (data dir {})", data_dir.display());
        Ok(Self::new(
            config,
            Arc::new(records),
            Arc::new(artifacts),
            Arc::new(converter),
        ))
    }

    pub fn with_renderer(mut self, renderer: SignatureRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub async fn create_contract(
        &self,
        source: SourceFile,
        metadata: ContractMetadata,
    ) -> Result<CreatedContract, SignError> {
        let safe_name = sanitize_filename(&source.filename);
        if safe_name.is_empty() || source.bytes.is_empty() {
            warn!("Rejected upload {:?}: empty file or unusable name", source.filename);
            return Err(SignError::ConversionError(format!(
                "upload {:?} is empty or has no usable filename",
                source.filename
            )));
        }

        let converted = self
            .converter
            .convert(&SourceFile::new(safe_name.clone(), source.bytes.clone()))
            .await
            .inspect_err(|e| error!("Conversion of {} failed: {e}", safe_name))?;

        let prefix = random_hex(8);
        let stem = Path::new(&safe_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let source_ref =
            self.artifacts
                .put(ArtifactKind::Source, &format!("{prefix}_{safe_name}"), &source.bytes)?;
        let base_ref =
            self.artifacts
                .put(ArtifactKind::Base, &format!("{prefix}_{stem}.pdf"), &converted.bytes)?;

        let mut record = ContractRecord {
            id: String::new(),
            source_filename: safe_name,
            source_document_ref: source_ref,
            base_document_ref: base_ref,
            page_count: converted.page_count(),
            client_email: metadata.client_email.filter(|e| !e.trim().is_empty()),
            created_at: Utc::now(),
            access_token: self.records.create_token(),
            status: SigningStatus::Created,
            placement: None,
            signed_document_ref: None,
            signed_at: None,
        };
        self.insert_with_fresh_id(&mut record)?;

        info!(
            "Created contract {} from {} ({} pages)",
            record.id, record.source_filename, record.page_count
        );
        Ok(CreatedContract {
            sign_link: self.sign_link(&record.id, &record.access_token),
            pdf_url: self.artifact_url(&record.base_document_ref),
            contract_id: record.id,
            access_token: record.access_token,
            base_document_ref: record.base_document_ref,
            page_count: record.page_count,
        })
    }

    fn insert_with_fresh_id(&self, record: &mut ContractRecord) -> Result<(), SignError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            record.id = generate_contract_id(record.created_at);
            match self.records.insert(record) {
                Ok(()) => return Ok(()),
                Err(StoreError::Duplicate(id)) => warn!("Contract id {id} taken, regenerating"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Duplicate(record.id.clone()).into())
    }

    /// Gate for the signing page: the contract exists and the token is right.
    pub fn validate_link(&self, contract_id: &str, token: &str) -> Result<StatusSnapshot, SignError> {
        Ok(self.authorized(contract_id, token)?.snapshot())
    }

    pub fn contract_status(&self, contract_id: &str) -> Result<StatusSnapshot, SignError> {
        Ok(self.lookup(contract_id)?.snapshot())
    }

    /// Applies one signature. Succeeds at most once per contract; every later
    /// or concurrent attempt gets [`SignError::AlreadySigned`].
    pub async fn request_signature(
        &self,
        contract_id: &str,
        token: &str,
        request: SignatureRequest,
    ) -> Result<SignedDocument, SignError> {
        let lock = self.contract_lock(contract_id);
        let result = {
            let _guard = lock.lock().await;
            self.sign_locked(contract_id, token, request).await
        };
        self.release_lock(contract_id, &lock);

        match &result {
            Ok(signed) => info!("Contract {contract_id} signed -> {}", signed.reference),
            Err(e) if e.is_retryable() => error!("Signing {contract_id} failed: {e}"),
            Err(e) => warn!("Signing {contract_id} rejected: {e}"),
        }
        result
    }

    async fn sign_locked(
        &self,
        contract_id: &str,
        token: &str,
        request: SignatureRequest,
    ) -> Result<SignedDocument, SignError> {
        let record = self.authorized(contract_id, token)?;
        if record.is_signed() {
            return Err(SignError::AlreadySigned(contract_id.to_string()));
        }

        let composition = Composition {
            artifacts: Arc::clone(&self.artifacts),
            renderer: Arc::clone(&self.renderer),
            contract_id: contract_id.to_string(),
            base_document_ref: record.base_document_ref,
            default_width_ratio: self.config.placement.default_width_ratio,
        };
        let outcome = joined(task::spawn_blocking(move || composition.run(request)).await)??;

        let records = Arc::clone(&self.records);
        let id = contract_id.to_string();
        let signed_ref = outcome.signed_document_ref.clone();
        joined(task::spawn_blocking(move || records.mark_signed(&id, &outcome)).await)?.map_err(
            |e| match e {
                StoreError::Conflict(_) => SignError::AlreadySigned(contract_id.to_string()),
                StoreError::NotFound(_) => SignError::ContractNotFound(contract_id.to_string()),
                other => SignError::Storage(other),
            },
        )?;

        Ok(SignedDocument {
            url: self.artifact_url(&signed_ref),
            reference: signed_ref,
        })
    }

    /// Bytes of the signed output, for holders of the access token.
    pub fn signed_document(&self, contract_id: &str, token: &str) -> Result<Vec<u8>, SignError> {
        let record = self.authorized(contract_id, token)?;
        let reference = record
            .signed_document_ref
            .ok_or_else(|| SignError::ContractNotFound(format!("{contract_id} has no signed document yet")))?;
        Ok(self.artifacts.get(&reference)?)
    }

    pub fn sign_link(&self, contract_id: &str, token: &str) -> String {
        format!("{}/sign/{contract_id}/{token}", self.base_url())
    }

    pub fn artifact_url(&self, reference: &ArtifactRef) -> String {
        format!("{}/{reference}", self.base_url())
    }

    fn base_url(&self) -> &str {
        self.config.public_base_url.trim_end_matches('/')
    }

    fn lookup(&self, contract_id: &str) -> Result<ContractRecord, SignError> {
        self.records
            .get(contract_id)?
            .ok_or_else(|| SignError::ContractNotFound(contract_id.to_string()))
    }

    fn authorized(&self, contract_id: &str, token: &str) -> Result<ContractRecord, SignError> {
        let record = self.lookup(contract_id)?;
        if !record.token_matches(token) {
            return Err(SignError::Unauthorized(contract_id.to_string()));
        }
        Ok(record)
    }

    fn contract_lock(&self, contract_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(contract_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the map entry once no other request holds or waits on it.
    fn release_lock(&self, contract_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(contract_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) <= 2);
        if idle {
            locks.remove(contract_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }
}
