//! Contract e-signing: convert an uploaded document to PDF, hand out a
//! tokenized signing link, and stamp exactly one signature onto one page.

pub mod config;
pub mod contract;
pub mod convert;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod merge;
pub mod overlay;
pub mod pdf;
pub mod render;
pub mod store;

pub use config::Config;
pub use contract::{ContractRecord, Placement, SigningStatus, StatusSnapshot};
pub use convert::{AutoConverter, Converter, LibreOfficeConverter, PdfPassthrough, SourceFile};
pub use engine::{ContractMetadata, CreatedContract, SignatureRequest, SignedDocument, SigningEngine};
pub use error::{ErrorKind, PageIndexError, SignError, StoreError};
pub use geometry::{Rect, SignatureSize, compute_placement};
pub use render::{ImageArtifact, SignaturePayload, SignatureRenderer};
