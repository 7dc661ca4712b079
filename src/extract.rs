use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::anyhow;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::proc::{run_with_timeout, SubprocessError};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];
const MAX_PDF_PAGES: usize = 50;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("text extraction not supported for '.{0}' files")]
    UnsupportedExtension(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub trait TextExtractor: Send + Sync + 'static {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError>;
}

/// Shells out to `tesseract` (and `pdftoppm` for PDFs), trying a language
/// cascade and returning the first successful extraction. The temp dir is
/// removed on every exit path, timeouts included.
pub struct TesseractExtractor {
    languages: Vec<String>,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(languages: Vec<String>, timeout: Duration) -> Self {
        Self { languages, timeout }
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, ExtractError> {
        let mut last_err: Option<anyhow::Error> = None;
        for lang in &self.languages {
            let mut command = Command::new("tesseract");
            command
                .arg(image_path)
                .arg("stdout")
                .arg("-l")
                .arg(lang);

            match run_with_timeout(command, self.timeout) {
                Ok(output) if output.success() => {
                    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
                }
                Ok(output) => {
                    debug!(lang, "tesseract run failed, trying next language");
                    last_err = Some(anyhow!(
                        "tesseract failed (lang={lang}): {}",
                        String::from_utf8_lossy(&output.stderr)
                    ));
                }
                Err(SubprocessError::BinaryMissing(binary)) => {
                    return Err(anyhow!("{binary} not installed").into());
                }
                Err(err) => {
                    last_err = Some(anyhow!(err));
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow!("no OCR languages configured"))
            .into())
    }

    fn extract_pdf(&self, workdir: &TempDir, input: &Path) -> Result<String, ExtractError> {
        let base = workdir.path().join("page");
        let mut command = Command::new("pdftoppm");
        command
            .arg("-r")
            .arg("300")
            .arg("-png")
            .arg(input)
            .arg(&base);

        let output = run_with_timeout(command, self.timeout).map_err(|err| match err {
            SubprocessError::BinaryMissing(binary) => {
                ExtractError::Failed(anyhow!("{binary} not installed"))
            }
            other => ExtractError::Failed(anyhow!(other)),
        })?;
        if !output.success() {
            return Err(anyhow!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )
            .into());
        }

        let mut parts = Vec::new();
        for page in 1..=MAX_PDF_PAGES {
            let page_path = workdir.path().join(format!("page-{page}.png"));
            if !page_path.exists() {
                // pdftoppm pads page numbers once a document has 10+ pages
                let padded = workdir.path().join(format!("page-{page:02}.png"));
                if !padded.exists() {
                    break;
                }
                parts.push(self.run_tesseract(&padded)?);
                continue;
            }
            parts.push(self.run_tesseract(&page_path)?);
        }
        Ok(parts.join("\n\n"))
    }
}

impl TextExtractor for TesseractExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        let ext = file_extension(filename)
            .ok_or_else(|| ExtractError::UnsupportedExtension(String::new()))?;

        if !is_extractable_extension(&ext) {
            return Err(ExtractError::UnsupportedExtension(ext));
        }

        let workdir = TempDir::new().map_err(|err| anyhow!("failed to create temp dir: {err}"))?;
        let input_path = workdir.path().join(format!("input.{ext}"));
        std::fs::write(&input_path, bytes)
            .map_err(|err| anyhow!("failed to write temp file: {err}"))?;

        let result = if ext == "pdf" {
            self.extract_pdf(&workdir, &input_path)
        } else {
            self.run_tesseract(&input_path)
        };

        if let Err(err) = &result {
            warn!(filename, error = %err, "text extraction failed");
        }
        result
    }
}

pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

pub fn is_extractable_extension(ext: &str) -> bool {
    ext == "pdf" || IMAGE_EXTENSIONS.contains(&ext)
}

/// MIME type derived from the filename extension alone; unknown extensions
/// fall back to application/octet-stream.
pub fn mime_for_filename(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
