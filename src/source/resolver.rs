//! Source resolution for statement PDFs

use crate::error::{Error, Result};
use crate::pdf::has_pdf_header;
use base64::Engine;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A statement ready for text extraction
#[derive(Debug)]
pub enum ResolvedPdf {
    /// Existing file on disk, read in place
    OnDisk { path: PathBuf, source_name: String },
    /// Upload staged to a temporary file, removed when dropped
    Staged {
        file: NamedTempFile,
        source_name: String,
    },
}

impl ResolvedPdf {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedPdf::OnDisk { path, .. } => path,
            ResolvedPdf::Staged { file, .. } => file.path(),
        }
    }

    pub fn source_name(&self) -> &str {
        match self {
            ResolvedPdf::OnDisk { source_name, .. } | ResolvedPdf::Staged { source_name, .. } => {
                source_name
            }
        }
    }
}

/// Resolve a file path to a statement on disk
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let mut header = [0u8; 4];
    let read = std::fs::File::open(path)?.read(&mut header)?;

    // Validate PDF header
    if !has_pdf_header(&header[..read]) {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }

    Ok(ResolvedPdf::OnDisk {
        path: path.to_path_buf(),
        source_name: path.display().to_string(),
    })
}

/// Decode an uploaded statement and stage it on disk
pub fn resolve_base64(base64_data: &str, max_upload_bytes: u64) -> Result<ResolvedPdf> {
    let engine = base64::engine::general_purpose::STANDARD;
    let data = engine.decode(base64_data.trim())?;

    if data.len() as u64 > max_upload_bytes {
        return Err(Error::UploadTooLarge {
            size: data.len() as u64,
            max_size: max_upload_bytes,
        });
    }

    // Validate PDF header
    if !has_pdf_header(&data) {
        return Err(Error::InvalidPdf {
            reason: "Decoded data is not a valid PDF file".to_string(),
        });
    }

    let file = stage_upload(&data)?;

    Ok(ResolvedPdf::Staged {
        file,
        source_name: "<base64>".to_string(),
    })
}

/// Write uploaded bytes to a temporary `.pdf` file
pub fn stage_upload(data: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("statement-")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;
    tracing::debug!(path = %file.path().display(), bytes = data.len(), "staged upload");
    Ok(file)
}
