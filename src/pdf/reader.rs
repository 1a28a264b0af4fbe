//! Statement text extraction using PDFium

use crate::error::{Error, Result};
use pdfium_render::prelude::*;
use std::path::Path;

/// Turns a PDF statement into a plain-text transcript
pub trait TextExtractor: Send + Sync {
    /// Concatenate each page's text, in page order, each followed by a newline.
    /// Pages with no text contribute nothing; unreadable pages are skipped.
    /// Fails only when the document itself cannot be opened.
    fn extract_text(&self, path: &Path, password: Option<&str>) -> Result<String>;
}

/// Check the `%PDF` magic bytes
pub fn has_pdf_header(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"%PDF"
}

/// Join per-page texts into one transcript, dropping empty pages
pub fn join_pages<I, S>(pages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut transcript = String::new();
    for page in pages {
        let page = page.as_ref();
        if !page.is_empty() {
            transcript.push_str(page);
            transcript.push('\n');
        }
    }
    transcript
}

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    // Try to bind to system library or use static linking
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Map PDFium errors to our error type
fn map_pdfium_error(err: PdfiumError, password: Option<&str>) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if password.is_some() {
                Error::IncorrectPassword
            } else {
                Error::PasswordRequired
            }
        }
        _ => Error::Pdfium {
            reason: format!("{}", err),
        },
    }
}

/// PDFium-backed extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumExtractor;

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a transcript from in-memory PDF bytes
    pub fn extract_bytes(&self, data: &[u8], password: Option<&str>) -> Result<String> {
        if !has_pdf_header(data) {
            return Err(Error::InvalidPdf {
                reason: "Not a valid PDF file".to_string(),
            });
        }

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, password)
            .map_err(|e| map_pdfium_error(e, password))?;

        let pages = document.pages();
        let mut texts = Vec::with_capacity(pages.len() as usize);

        for (index, page) in pages.iter().enumerate() {
            match page.text() {
                Ok(text) => texts.push(text.all()),
                Err(e) => {
                    tracing::debug!(page = index + 1, error = %e, "skipping unreadable page");
                }
            }
        }

        tracing::debug!(pages = texts.len(), "extracted statement text");
        Ok(join_pages(texts))
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract_text(&self, path: &Path, password: Option<&str>) -> Result<String> {
        if !path.exists() {
            return Err(Error::PdfNotFound {
                path: path.display().to_string(),
            });
        }

        let data = std::fs::read(path)?;
        self.extract_bytes(&data, password)
    }
}
