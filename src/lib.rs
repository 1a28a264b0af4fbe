//! Call Records Server Library
//!
//! Extracts call-detail records from telecom PDF statements and summarizes them:
//! - `pdf`: statement text extraction
//! - `records`: the fixed call-line parser, record type and CSV table
//! - `analytics`: top contacts, usage totals, per-day series, per-number summaries
//! - `chart`: chart-ready datasets for those views
//! - `server`: the MCP tool surface

pub mod analytics;
pub mod chart;
pub mod error;
pub mod pdf;
pub mod pipeline;
pub mod records;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use pipeline::{BatchOutcome, Pipeline};
pub use records::{CallRecord, CallTable, RecordParser, SkipPolicy};
pub use server::{
    run_server, run_server_with_config, CallRecordsServer, LoadStatementsParams,
    LoadStatementsResult, ServerConfig, StatementSource,
};
