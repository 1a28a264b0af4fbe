//! Call-detail records: the record type, the statement-line parser and the table

mod parser;
mod record;
mod table;

pub use parser::{extract_records, ParsedText, RecordParser, SkipPolicy};
pub use record::{coerce_numeric, CallRecord, HEADERS, TIMESTAMP_FORMAT};
pub use table::CallTable;
