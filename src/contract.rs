use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::ArtifactRef;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SigningStatus {
    Created,
    Signed,
}

/// Where the signature was anchored: page index plus top-down fractions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page_index: usize,
    pub x_pct: f64,
    pub y_pct: f64,
}

/// Persisted contract row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContractRecord {
    pub id: String,
    pub source_filename: String,
    pub source_document_ref: ArtifactRef,
    pub base_document_ref: ArtifactRef,
    pub page_count: usize,
    pub client_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub access_token: String,
    pub status: SigningStatus,
    pub placement: Option<Placement>,
    pub signed_document_ref: Option<ArtifactRef>,
    pub signed_at: Option<DateTime<Utc>>,
}

/// Fields written by the single `Created -> Signed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningOutcome {
    pub placement: Placement,
    pub signed_document_ref: ArtifactRef,
    pub signed_at: DateTime<Utc>,
}

/// Read-only view handed to callers; never includes the access token.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub id: String,
    pub status: SigningStatus,
    pub source_filename: String,
    pub base_document_ref: ArtifactRef,
    pub page_count: usize,
    pub placement: Option<Placement>,
    pub signed_document_ref: Option<ArtifactRef>,
    pub created_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl ContractRecord {
    pub fn token_matches(&self, token: &str) -> bool {
        let (a, b) = (self.access_token.as_bytes(), token.as_bytes());
        // compare every byte so timing does not leak the matching prefix
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    pub fn is_signed(&self) -> bool {
        self.status == SigningStatus::Signed
    }

    /// Applies the transition; rejects a record that has already been signed.
    pub fn apply_signing(&mut self, outcome: &SigningOutcome) -> Result<(), StoreError> {
        if self.is_signed() {
            return Err(StoreError::Conflict(self.id.clone()));
        }
        self.status = SigningStatus::Signed;
        self.placement = Some(outcome.placement);
        self.signed_document_ref = Some(outcome.signed_document_ref.clone());
        self.signed_at = Some(outcome.signed_at);
        Ok(())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id.clone(),
            status: self.status,
            source_filename: self.source_filename.clone(),
            base_document_ref: self.base_document_ref.clone(),
            page_count: self.page_count,
            placement: self.placement,
            signed_document_ref: self.signed_document_ref.clone(),
            created_at: self.created_at,
            signed_at: self.signed_at,
        }
    }
}

/// `CN-YYYYMMDD-XXXXXX`: UTC date plus six upper-case hex characters.
pub fn generate_contract_id(now: DateTime<Utc>) -> String {
    format!(
        "CN-{}-{}",
        now.format("%Y%m%d"),
        random_hex(6).to_uppercase()
    )
}

pub fn generate_access_token() -> String {
    random_hex(32)
}

pub fn random_hex(len: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(len.min(32));
    hex
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; spaces become underscores and
/// leading dots are dropped so the result cannot name a hidden or parent path.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
