//! PDF processing layer
//!
//! This module turns statements into plain text using PDFium.

mod reader;

pub use reader::{has_pdf_header, join_pages, PdfiumExtractor, TextExtractor};
