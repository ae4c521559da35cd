use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::ConverterConfig;
use crate::error::SignError;
use crate::pdf::PagedDocument;

/// An uploaded document as received from the client.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        SourceFile {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn is_pdf(&self) -> bool {
        self.extension().as_deref() == Some("pdf")
    }
}

/// Turns an uploaded document into a paginated PDF with known page sizes.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, source: &SourceFile) -> Result<PagedDocument, SignError>;
}

fn paged(bytes: Vec<u8>, filename: &str) -> Result<PagedDocument, SignError> {
    if bytes.is_empty() {
        return Err(SignError::ConversionError(format!("{filename} is empty")));
    }
    PagedDocument::from_bytes(bytes)
        .map_err(|e| SignError::ConversionError(format!("{filename}: {e}")))
}

/// Accepts documents that are already PDFs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPassthrough;

#[async_trait]
impl Converter for PdfPassthrough {
    async fn convert(&self, source: &SourceFile) -> Result<PagedDocument, SignError> {
        let doc = paged(source.bytes.clone(), &source.filename)?;
        debug!("{} accepted as PDF ({} pages)", source.filename, doc.page_count());
        Ok(doc)
    }
}

/// Runs `soffice --headless --convert-to pdf --outdir <dir> <file>` in a
/// scratch directory. The child is killed if it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        LibreOfficeConverter {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.binary.clone(), config.timeout())
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    async fn convert(&self, source: &SourceFile) -> Result<PagedDocument, SignError> {
        if source.bytes.is_empty() {
            return Err(SignError::ConversionError(format!("{} is empty", source.filename)));
        }
        let stem = Path::new(&source.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("document");
        let input_name = match source.extension() {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem.to_string(),
        };

        let scratch = tempfile::tempdir()
            .map_err(|e| SignError::ConversionError(format!("cannot create scratch dir: {e}")))?;
        let input = scratch.path().join(&input_name);
        let out_dir = scratch.path().join("out");
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| SignError::ConversionError(e.to_string()))?;
        tokio::fs::write(&input, &source.bytes)
            .await
            .map_err(|e| SignError::ConversionError(e.to_string()))?;

        info!("Converting {} with {}", source.filename, self.binary.display());
        let child = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Converter {} could not be started: {e}", self.binary.display());
                return Err(SignError::ConversionError(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                )));
            }
            Err(_) => {
                warn!(
                    "Converter timed out after {:?} on {}",
                    self.timeout, source.filename
                );
                return Err(SignError::ConversionError(format!(
                    "conversion of {} timed out after {}s",
                    source.filename,
                    self.timeout.as_secs_f64()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Converter exited with {}: {}", output.status, stderr.trim());
            return Err(SignError::ConversionError(format!(
                "converter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let produced = out_dir.join(format!("{stem}.pdf"));
        let bytes = tokio::fs::read(&produced).await.map_err(|e| {
            SignError::ConversionError(format!("converter produced no PDF for {}: {e}", source.filename))
        })?;
        let doc = paged(bytes, &source.filename)?;
        info!("Converted {} ({} pages)", source.filename, doc.page_count());
        Ok(doc)
    }
}

/// Passes PDFs through and sends everything else to LibreOffice.
#[derive(Debug, Clone)]
pub struct AutoConverter {
    office: LibreOfficeConverter,
}

impl AutoConverter {
    pub fn new(office: LibreOfficeConverter) -> Self {
        AutoConverter { office }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(LibreOfficeConverter::from_config(config))
    }
}

#[async_trait]
impl Converter for AutoConverter {
    async fn convert(&self, source: &SourceFile) -> Result<PagedDocument, SignError> {
        if source.is_pdf() {
            PdfPassthrough.convert(source).await
        } else {
            self.office.convert(source).await
        }
    }
}
