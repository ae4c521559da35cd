use thiserror::Error;

/// Failure of the record store or the artifact store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record {0} already exists")]
    Duplicate(String),
    #[error("conflicting update on {0}")]
    Conflict(String),
    #[error("invalid artifact reference: {0}")]
    InvalidReference(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),
    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PageIndexError {
    #[error("{index} is out of range for a {page_count}-page document")]
    OutOfRange { index: i64, page_count: usize },
    #[error("{0} is not a whole number")]
    NotAnInteger(String),
}

/// Everything the signing engine can report back to its caller.
#[derive(Error, Debug)]
pub enum SignError {
    #[error("contract not found: {0}")]
    ContractNotFound(String),
    #[error("invalid access token for contract {0}")]
    Unauthorized(String),
    #[error("invalid page index: {0}")]
    InvalidPageIndex(PageIndexError),
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),
    #[error("signature text is empty")]
    EmptySignature,
    #[error("document conversion failed: {0}")]
    ConversionError(String),
    #[error("contract {0} is already signed")]
    AlreadySigned(String),
    #[error("failed to compose signed document: {0}")]
    MergeFailure(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Coarse classification used by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidInput,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 403,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

impl SignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignError::ContractNotFound(_) => ErrorKind::NotFound,
            SignError::Unauthorized(_) => ErrorKind::Unauthorized,
            SignError::InvalidPageIndex(_)
            | SignError::InvalidCoordinate(_)
            | SignError::InvalidSignatureFormat(_)
            | SignError::EmptySignature => ErrorKind::InvalidInput,
            SignError::AlreadySigned(_) => ErrorKind::Conflict,
            SignError::ConversionError(_) | SignError::MergeFailure(_) | SignError::Storage(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// The signing link itself is unusable (unknown contract or wrong token).
    pub fn is_link_invalid(&self) -> bool {
        matches!(
            self,
            SignError::ContractNotFound(_) | SignError::Unauthorized(_)
        )
    }

    /// Environmental failures; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SignError::ConversionError(_) | SignError::MergeFailure(_) | SignError::Storage(_)
        )
    }
}
