//! Error types for the call records server

use thiserror::Error;

/// Result type alias for the call records server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the call records server
#[derive(Error, Debug)]
pub enum Error {
    /// Statement file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// No loaded table under this session key
    #[error("Session not found: {key}")]
    SessionNotFound { key: String },

    /// Loaded table is larger than the whole session budget
    #[error("Call table too large: {records} records (max: {max_records})")]
    SessionCapacity { records: usize, max_records: usize },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// Uploaded statement exceeds the configured size limit
    #[error("Upload too large: {size} bytes (max: {max_size} bytes)")]
    UploadTooLarge { size: u64, max_size: u64 },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV export or import error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::IncorrectPassword => "Incorrect password".to_string(),
            Error::Pdfium { .. } => "PDF processing error".to_string(),
            Error::SessionNotFound { key } => format!("Session not found: {}", key),
            Error::SessionCapacity { max_records, .. } => {
                format!("Call table exceeds session capacity of {} records", max_records)
            }
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::UploadTooLarge { max_size, .. } => {
                format!("Upload exceeds maximum size of {} bytes", max_size)
            }
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Csv(_) => "CSV error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
        }
    }
}
