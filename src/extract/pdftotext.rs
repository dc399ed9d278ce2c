// src/extract/pdftotext.rs
// PDF extraction through poppler's `pdftotext`

use super::{ExtractionError, TextExtractor};
use async_trait::async_trait;
use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::process::Command;

const DEFAULT_PDFTOTEXT_BIN: &str = "pdftotext";

pub struct PdfToTextExtractor {
    bin_path: PathBuf,
}

impl PdfToTextExtractor {
    pub fn from_env() -> Self {
        let bin_path = env::var("NARRATOR_PDFTOTEXT_BIN")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PDFTOTEXT_BIN));

        Self { bin_path }
    }

    pub fn with_binary(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfToTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::NotFound(path.to_path_buf()));
        }

        tracing::debug!("Extracting text from {} via {}", path.display(), self.bin_path.display());

        let output = Command::new(&self.bin_path)
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ExtractionError::Tool(format!(
                    "{} not found; install poppler-utils or set NARRATOR_PDFTOTEXT_BIN",
                    self.bin_path.display()
                )),
                _ => ExtractionError::Tool(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Tool(format!(
                "pdftotext failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|_| ExtractionError::Encoding(path.to_path_buf()))
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}
