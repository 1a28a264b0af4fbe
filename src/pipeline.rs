//! Extraction pipeline: statement -> transcript -> records -> table

use crate::error::Result;
use crate::pdf::{PdfiumExtractor, TextExtractor};
use crate::records::{CallTable, ParsedText, RecordParser, SkipPolicy};
use crate::source::ResolvedPdf;
use std::path::Path;
use std::sync::Arc;

/// Records from a whole batch, concatenated in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub table: CallTable,
    /// Summed skip count across files; `None` under [`SkipPolicy::Silent`]
    pub skipped: Option<usize>,
    /// Summed count of unreadable Used Usage values; `None` under [`SkipPolicy::Silent`]
    pub null_usage: Option<usize>,
}

/// Runs text extraction and record parsing over statements
#[derive(Clone)]
pub struct Pipeline {
    extractor: Arc<dyn TextExtractor>,
    parser: RecordParser,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn TextExtractor>, policy: SkipPolicy) -> Self {
        Self {
            extractor,
            parser: RecordParser::new(policy),
        }
    }

    /// Pipeline backed by PDFium
    pub fn with_pdfium(policy: SkipPolicy) -> Self {
        Self::new(Arc::new(PdfiumExtractor::new()), policy)
    }

    pub fn parser(&self) -> &RecordParser {
        &self.parser
    }

    /// Extract and parse a single statement
    pub fn process_file(&self, path: &Path, password: Option<&str>) -> Result<ParsedText> {
        let text = self.extractor.extract_text(path, password)?;
        let parsed = self.parser.parse(&text);
        tracing::info!(
            source = %path.display(),
            records = parsed.records.len(),
            "extracted call records"
        );
        Ok(parsed)
    }

    /// Extract and parse a resolved source; staged uploads are cleaned up by the caller's drop
    pub fn process_resolved(&self, resolved: &ResolvedPdf, password: Option<&str>) -> Result<ParsedText> {
        self.process_file(resolved.path(), password)
    }

    /// Process statements in order into one table, failing on the first unreadable file
    pub fn process_paths<P: AsRef<Path>>(
        &self,
        paths: &[P],
        password: Option<&str>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for path in paths {
            let parsed = self.process_file(path.as_ref(), password)?;
            outcome.table.extend(parsed.records);
            outcome.skipped = merge_counts(outcome.skipped, parsed.skipped);
            outcome.null_usage = merge_counts(outcome.null_usage, parsed.null_usage);
        }

        Ok(outcome)
    }
}

/// Add two optional counts, staying `None` only if both are
pub fn merge_counts(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}
