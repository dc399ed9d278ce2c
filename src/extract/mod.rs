// src/extract/mod.rs
// Document text extraction

mod pdftotext;

pub use pdftotext::PdfToTextExtractor;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document is not valid UTF-8: {}", .0.display())]
    Encoding(PathBuf),

    #[error("Extractor tool failed: {0}")]
    Tool(String),

    #[error("Unsupported document type: {0}")]
    Unsupported(String),
}

/// Turns a source document into one string of text; page breaks may appear as form feeds
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError>;

    fn name(&self) -> &str;
}

/// UTF-8 text files, pages optionally separated by `\x0c`
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| match source.kind() {
            ErrorKind::NotFound => ExtractionError::NotFound(path.to_path_buf()),
            _ => ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        String::from_utf8(bytes).map_err(|_| ExtractionError::Encoding(path.to_path_buf()))
    }

    fn name(&self) -> &str {
        "plain text"
    }
}

/// Pick an extractor from the document's extension
pub fn extractor_for(path: &Path) -> Result<Box<dyn TextExtractor>, ExtractionError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => Ok(Box::new(PdfToTextExtractor::from_env())),
        None | Some("txt") | Some("text") | Some("md") => Ok(Box::new(PlainTextExtractor)),
        Some(other) => Err(ExtractionError::Unsupported(other.to_string())),
    }
}
