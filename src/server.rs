//! MCP Server implementation using rmcp

use crate::analytics::{self, NumberSummary};
use crate::chart::{self, Chart};
use crate::error::Error;
use crate::pdf::{PdfiumExtractor, TextExtractor};
use crate::pipeline::{merge_counts, Pipeline};
use crate::records::{CallTable, ParsedText, SkipPolicy};
use crate::source::{resolve_base64, resolve_path, ResolvedPdf, SessionStore};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a statement PDF comes from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum StatementSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the statement PDF
        path: String,
    },
    /// Uploaded statement, base64 encoded
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
}

impl<'de> serde::Deserialize<'de> for StatementSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        if let Some(obj) = value.as_object() {
            if let Some(v) = obj.get("path") {
                return match v.as_str() {
                    Some(s) => Ok(StatementSource::Path {
                        path: s.to_string(),
                    }),
                    None => Err(serde::de::Error::custom("\"path\" must be a string")),
                };
            }
            if let Some(v) = obj.get("base64") {
                return match v.as_str() {
                    Some(s) => Ok(StatementSource::Base64 {
                        base64: s.to_string(),
                    }),
                    None => Err(serde::de::Error::custom("\"base64\" must be a string")),
                };
            }
            let keys: Vec<&String> = obj.keys().collect();
            Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with \"path\" or \"base64\", but got keys: {:?}",
                keys
            )))
        } else {
            Err(serde::de::Error::custom(
                "Invalid source: expected an object with \"path\" or \"base64\"",
            ))
        }
    }
}

/// Runtime configuration for the call records server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories that input and output paths must stay within (empty: no restriction)
    pub resource_dirs: Vec<String>,
    /// Whether rows that fail the statement layout are counted and reported
    pub skip_policy: SkipPolicy,
    /// Top-N used when a request does not give one (default: 10)
    pub default_top_n: usize,
    /// Upper bound for top-N requests (default: 50)
    pub max_top_n: usize,
    /// Maximum decoded size of a base64 upload (default: 100MB)
    pub max_upload_bytes: u64,
    /// Maximum number of live sessions (default: 32)
    pub session_max_entries: usize,
    /// Maximum records held across all sessions (default: 2,000,000)
    pub session_max_records: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            skip_policy: SkipPolicy::Silent,
            default_top_n: 10,
            max_top_n: 50,
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
            session_max_entries: 32,
            session_max_records: 2_000_000,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CALL_RECORDS_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (useful for testing)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dirs) = lookup("CALL_RECORDS_RESOURCE_DIRS") {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().to_string())
                .collect();
        }
        if let Some(flag) = lookup("CALL_RECORDS_REPORT_SKIPPED") {
            if matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on") {
                config.skip_policy = SkipPolicy::Report;
            }
        }
        if let Some(bytes) = lookup("CALL_RECORDS_MAX_UPLOAD_BYTES") {
            match bytes.trim().parse() {
                Ok(n) => config.max_upload_bytes = n,
                Err(_) => tracing::warn!(value = %bytes, "ignoring invalid CALL_RECORDS_MAX_UPLOAD_BYTES"),
            }
        }
        if let Some(entries) = lookup("CALL_RECORDS_SESSION_MAX_ENTRIES") {
            match entries.trim().parse() {
                Ok(n) => config.session_max_entries = n,
                Err(_) => tracing::warn!(value = %entries, "ignoring invalid CALL_RECORDS_SESSION_MAX_ENTRIES"),
            }
        }

        config
    }
}

/// Call records MCP Server
#[derive(Clone)]
pub struct CallRecordsServer {
    sessions: Arc<SessionStore>,
    pipeline: Pipeline,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for load_statements
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoadStatementsParams {
    /// Statement PDFs to process, in order
    pub sources: Vec<StatementSource>,
    /// Password for encrypted statements
    #[serde(default)]
    pub password: Option<String>,
    /// Existing session to append records to (default: start a new session)
    #[serde(default)]
    pub session_key: Option<String>,
    /// Write the combined table as CSV to this path
    #[serde(default)]
    pub export_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct StatementResult {
    pub source: String,
    /// Records extracted from this statement
    pub records: usize,
    /// Rows that looked like call lines but did not match (only when reporting is enabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    /// Records whose Used Usage was not a number (only when reporting is enabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_usage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LoadStatementsResult {
    /// Key to pass to the analysis tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Records in the session after loading
    pub total_records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_usage: Option<usize>,
    pub statements: Vec<StatementResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
    /// Set when the records were loaded but the CSV export failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for the analysis tools
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionParams {
    /// Session key returned by load_statements
    pub session_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TopNParams {
    /// Session key returned by load_statements
    pub session_key: String,
    /// How many numbers to return (default: 10, max: 50)
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NumberSummaryParams {
    /// Session key returned by load_statements
    pub session_key: String,
    /// Phone number to summarize, matched exactly
    pub number: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportCsvParams {
    /// Session key returned by load_statements
    pub session_key: String,
    /// Output file path; when omitted the CSV is returned inline
    #[serde(default)]
    pub output_path: Option<String>,
}

/// Result of an analysis view: the data plus a chart-ready dataset
#[derive(Debug, Serialize)]
pub struct ViewResult<T> {
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<Chart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ExportCsvResult {
    pub session_key: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Inline CSV when no output path was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CloseSessionResult {
    pub session_key: String,
    pub closed: bool,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl CallRecordsServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server with full configuration, extracting text with PDFium
    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_extractor(config, Arc::new(PdfiumExtractor::new()))
    }

    /// Create a new server with a custom text extractor
    pub fn with_extractor(config: ServerConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        let sessions = SessionStore::new(config.session_max_entries, config.session_max_records);
        Self {
            sessions: Arc::new(sessions),
            pipeline: Pipeline::new(extractor, config.skip_policy),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Extract call records from statement PDFs into a session
    #[tool(
        description = "Extract call-detail records from telecom statement PDFs into an analysis session.

Each statement is matched line by line against the fixed call layout (No., Date, Time, Number, Used/Billed/Free/Chargeable Usage, Amount). Lines that do not match are skipped. Records from all statements are concatenated in order.

Returns a session_key for the analysis tools, per-statement record counts, and (if export_path is given) writes the combined table as CSV.

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"} or {\"base64\": \"...\"}"
    )]
    async fn load_statements(
        &self,
        Parameters(params): Parameters<LoadStatementsParams>,
    ) -> String {
        let result = self.process_load_statements(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "load_statements failed");
            LoadStatementsResult {
                session_key: params.session_key.clone(),
                total_records: 0,
                skipped: None,
                null_usage: None,
                statements: vec![],
                export_path: None,
                export_error: None,
                error: Some(e.client_message()),
            }
        });

        to_json(&result)
    }

    /// Most frequently called numbers
    #[tool(description = "Top N most contacted numbers in a session, by call count, with a bar chart dataset.")]
    async fn top_contacts(&self, Parameters(params): Parameters<TopNParams>) -> String {
        let top_n = self.clamp_top_n(params.top_n);
        self.view(&params.session_key, "top_contacts", |table| {
            let top = analytics::top_contacts(table, top_n);
            let chart = chart::top_contacts_chart(&top, top_n);
            (top, Some(chart))
        })
    }

    /// Numbers with the most used seconds
    #[tool(description = "Top N numbers in a session by total Used Usage (seconds), with a bar chart dataset.")]
    async fn top_usage(&self, Parameters(params): Parameters<TopNParams>) -> String {
        let top_n = self.clamp_top_n(params.top_n);
        self.view(&params.session_key, "top_usage", |table| {
            let top = analytics::top_usage(table, top_n);
            let chart = chart::top_usage_chart(&top, top_n);
            (top, Some(chart))
        })
    }

    #[tool(description = "Totals of Billed, Free and Chargeable Usage across a session, with a donut chart dataset.")]
    async fn usage_distribution(&self, Parameters(params): Parameters<SessionParams>) -> String {
        self.view(&params.session_key, "usage_distribution", |table| {
            let distribution = analytics::usage_distribution(table);
            let chart = chart::usage_distribution_chart(&distribution);
            (distribution, Some(chart))
        })
    }

    #[tool(description = "Number of calls per day in a session, with a line chart dataset.")]
    async fn calls_over_time(&self, Parameters(params): Parameters<SessionParams>) -> String {
        self.view(&params.session_key, "calls_over_time", |table| {
            let points = analytics::calls_over_time(table);
            let chart = chart::calls_over_time_chart(&points);
            (points, Some(chart))
        })
    }

    #[tool(description = "Total call duration in minutes per day in a session, with a bar chart dataset.")]
    async fn call_time_over_time(&self, Parameters(params): Parameters<SessionParams>) -> String {
        self.view(&params.session_key, "call_time_over_time", |table| {
            let points = analytics::call_time_over_time(table);
            let chart = chart::call_time_over_time_chart(&points);
            (points, Some(chart))
        })
    }

    /// Summary for one number
    #[tool(
        description = "Summarize calls to or from one number (exact match): total calls, total and average duration in minutes, and a per-day dual-axis chart dataset. A number with no calls returns zeros and no chart."
    )]
    async fn number_summary(&self, Parameters(params): Parameters<NumberSummaryParams>) -> String {
        let number = params.number.clone();
        self.view(&params.session_key, "number_summary", move |table| {
            let summary: NumberSummary = analytics::number_summary(table, &number);
            let chart = chart::number_summary_chart(&summary);
            (summary, chart)
        })
    }

    #[tool(
        description = "Export a session's call table as UTF-8 CSV with the header No., Date, Time, Number, Used Usage, Billed Usage, Free Usage, Chargeable Usage, Amount. Writes to output_path if given, otherwise returns the CSV inline."
    )]
    async fn export_csv(&self, Parameters(params): Parameters<ExportCsvParams>) -> String {
        let result = self.process_export_csv(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "export_csv failed");
            ExportCsvResult {
                session_key: params.session_key.clone(),
                rows: 0,
                output_path: None,
                csv: None,
                error: Some(e.client_message()),
            }
        });

        to_json(&result)
    }

    #[tool(description = "Discard a session and its call table.")]
    async fn close_session(&self, Parameters(params): Parameters<SessionParams>) -> String {
        let closed = self.sessions.remove(&params.session_key).is_some();
        tracing::info!(session = %params.session_key, closed, "close_session");
        to_json(&CloseSessionResult {
            session_key: params.session_key,
            closed,
        })
    }
}

impl CallRecordsServer {
    fn source_name(source: &StatementSource) -> String {
        match source {
            StatementSource::Path { path } => path.clone(),
            StatementSource::Base64 { .. } => "<base64>".to_string(),
        }
    }

    fn clamp_top_n(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_top_n)
            .clamp(1, self.config.max_top_n.max(1))
    }

    fn session(&self, key: &str) -> crate::error::Result<Arc<CallTable>> {
        self.sessions
            .get(key)
            .ok_or_else(|| Error::SessionNotFound {
                key: key.to_string(),
            })
    }

    /// Run an analysis over a session's table and serialize the result
    fn view<T, F>(&self, session_key: &str, op: &str, compute: F) -> String
    where
        T: Serialize,
        F: FnOnce(&CallTable) -> (T, Option<Chart>),
    {
        let result = match self.session(session_key) {
            Ok(table) => {
                let (data, chart) = compute(&table);
                tracing::debug!(session = %session_key, op, rows = table.len(), "computed view");
                ViewResult {
                    session_key: session_key.to_string(),
                    data: Some(data),
                    chart,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, op, "view failed");
                ViewResult {
                    session_key: session_key.to_string(),
                    data: None,
                    chart: None,
                    error: Some(e.client_message()),
                }
            }
        };

        to_json(&result)
    }

    fn resolve_source(&self, source: &StatementSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            StatementSource::Path { path } => {
                let path = self.validate_path_access(path)?;
                resolve_path(path)
            }
            StatementSource::Base64 { base64 } => {
                resolve_base64(base64, self.config.max_upload_bytes)
            }
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        let canonical_target =
            canonical_parent.join(path_obj.file_name().unwrap_or(std::ffi::OsStr::new("")));

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical_target.starts_with(&canonical_dir) {
                    return Ok(canonical_target);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Resolve one source and run the pipeline on it off the async runtime.
    /// A staged upload is dropped (and deleted) inside the blocking task on every path.
    async fn process_source(
        &self,
        source: &StatementSource,
        password: Option<String>,
    ) -> crate::error::Result<ParsedText> {
        let resolved = self.resolve_source(source)?;
        let pipeline = self.pipeline.clone();

        tokio::task::spawn_blocking(move || {
            let parsed = pipeline.process_resolved(&resolved, password.as_deref());
            drop(resolved);
            parsed
        })
        .await
        .map_err(|e| Error::Pdfium {
            reason: format!("Task join error: {}", e),
        })?
    }

    /// Load statements into a new session, or append them to `params.session_key`.
    /// The append is applied to the stored table after extraction, so concurrent
    /// loads into one session all land.
    pub async fn process_load_statements(
        &self,
        params: &LoadStatementsParams,
    ) -> crate::error::Result<LoadStatementsResult> {
        if let Some(key) = &params.session_key {
            self.session(key)?;
        }

        let mut records = Vec::new();
        let mut statements = Vec::with_capacity(params.sources.len());
        let mut skipped = None;
        let mut null_usage = None;

        for source in &params.sources {
            let source_name = Self::source_name(source);
            match self.process_source(source, params.password.clone()).await {
                Ok(parsed) => {
                    statements.push(StatementResult {
                        source: source_name,
                        records: parsed.records.len(),
                        skipped: parsed.skipped,
                        null_usage: parsed.null_usage,
                        error: None,
                    });
                    skipped = merge_counts(skipped, parsed.skipped);
                    null_usage = merge_counts(null_usage, parsed.null_usage);
                    records.extend(parsed.records);
                }
                Err(e) => {
                    tracing::warn!(error = %e, source = %source_name, "statement failed");
                    statements.push(StatementResult {
                        source: source_name,
                        records: 0,
                        skipped: None,
                        null_usage: None,
                        error: Some(e.client_message()),
                    });
                }
            }
        }

        let (session_key, table) = match &params.session_key {
            Some(key) => (key.clone(), self.sessions.append(key, records)?),
            None => {
                let key = self.sessions.generate_unique_key();
                let table = CallTable::from_records(records);
                let total = table.len();
                let table = self.sessions.put(key.clone(), table).ok_or(
                    Error::SessionCapacity {
                        records: total,
                        max_records: self.config.session_max_records,
                    },
                )?;
                (key, table)
            }
        };

        let mut export_path = None;
        let mut export_error = None;
        if let Some(path) = &params.export_path {
            match self
                .validate_output_path_access(path)
                .and_then(|target| table.save_csv(&target))
            {
                Ok(()) => export_path = Some(path.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, session = %session_key, "export failed");
                    export_error = Some(e.client_message());
                }
            }
        }

        tracing::info!(
            session = %session_key,
            records = table.len(),
            statements = statements.len(),
            "loaded statements"
        );

        Ok(LoadStatementsResult {
            session_key: Some(session_key),
            total_records: table.len(),
            skipped,
            null_usage,
            statements,
            export_path,
            export_error,
            error: None,
        })
    }

    pub fn process_export_csv(
        &self,
        params: &ExportCsvParams,
    ) -> crate::error::Result<ExportCsvResult> {
        let table = self.session(&params.session_key)?;

        let (output_path, csv) = match &params.output_path {
            Some(path) => {
                let target = self.validate_output_path_access(path)?;
                table.save_csv(&target)?;
                (Some(path.clone()), None)
            }
            None => (None, Some(table.to_csv_string()?)),
        };

        Ok(ExportCsvResult {
            session_key: params.session_key.clone(),
            rows: table.len(),
            output_path,
            csv,
            error: None,
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

impl Default for CallRecordsServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for CallRecordsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Call records server extracts call-detail records from telecom statement PDFs. \
                 Start with load_statements, then use the returned session_key with the \
                 top_contacts, top_usage, usage_distribution, calls_over_time, \
                 call_time_over_time, number_summary and export_csv tools."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = CallRecordsServer::with_config(config);

    tracing::info!("Call records server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    /// Reads a "%PDF" file and returns everything after its first line
    struct TranscriptExtractor;

    impl TextExtractor for TranscriptExtractor {
        fn extract_text(&self, path: &Path, _password: Option<&str>) -> crate::error::Result<String> {
            let raw = std::fs::read_to_string(path)?;
            Ok(raw.split_once('\n').map(|(_, rest)| rest.to_string()).unwrap_or_default())
        }
    }

    fn server(config: ServerConfig) -> CallRecordsServer {
        CallRecordsServer::with_extractor(config, Arc::new(TranscriptExtractor))
    }

    fn statement(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        write!(file, "%PDF-1.4\n{}", body).unwrap();
        file
    }

    fn path_source(file: &tempfile::NamedTempFile) -> StatementSource {
        StatementSource::Path {
            path: file.path().to_string_lossy().to_string(),
        }
    }

    #[test]
    fn test_source_name() {
        assert_eq!(
            CallRecordsServer::source_name(&StatementSource::Path {
                path: "/bill.pdf".to_string()
            }),
            "/bill.pdf"
        );
        assert_eq!(
            CallRecordsServer::source_name(&StatementSource::Base64 {
                base64: "...".to_string()
            }),
            "<base64>"
        );
    }

    #[test]
    fn test_statement_source_deserialization() {
        let source: StatementSource = serde_json::from_str(r#"{"path": "/bill.pdf"}"#).unwrap();
        assert!(matches!(source, StatementSource::Path { .. }));

        let source: StatementSource = serde_json::from_str(r#"{"base64": "JVBERi0xLjQ="}"#).unwrap();
        assert!(matches!(source, StatementSource::Base64 { .. }));

        let err = serde_json::from_str::<StatementSource>(r#"{"url": "https://x"}"#).unwrap_err();
        assert!(err.to_string().contains("\"path\" or \"base64\""));

        assert!(serde_json::from_str::<StatementSource>(r#"{"path": 1}"#).is_err());
    }

    #[test]
    fn test_params_deserialization() {
        let json = r#"{"sources": [{"path": "/bill.pdf"}]}"#;
        let params: LoadStatementsParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.sources.len(), 1);
        assert!(params.password.is_none());
        assert!(params.session_key.is_none());

        let params: TopNParams = serde_json::from_str(r#"{"session_key": "k"}"#).unwrap();
        assert!(params.top_n.is_none());
    }

    #[test]
    fn test_clamp_top_n() {
        let s = server(ServerConfig::default());
        assert_eq!(s.clamp_top_n(None), 10);
        assert_eq!(s.clamp_top_n(Some(0)), 1);
        assert_eq!(s.clamp_top_n(Some(7)), 7);
        assert_eq!(s.clamp_top_n(Some(500)), 50);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CALL_RECORDS_REPORT_SKIPPED", "true"),
            ("CALL_RECORDS_MAX_UPLOAD_BYTES", "2048"),
            ("CALL_RECORDS_SESSION_MAX_ENTRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.skip_policy, SkipPolicy::Report);
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(config.session_max_entries, 32);
        assert!(config.resource_dirs.is_empty());
    }

    #[tokio::test]
    async fn test_load_and_query_session() {
        let s = server(ServerConfig::default());
        let file = statement(
            "1 01-JAN-24 10:00:00 919800000001 120 120 0 120 1.20\n\
             2 02-JAN-24 11:00:00 919800000001 60 60 0 60 0.60\n\
             3 02-JAN-24 12:00:00 919800000002 30 30 0 30 0.30\n",
        );

        let params = LoadStatementsParams {
            sources: vec![path_source(&file)],
            password: None,
            session_key: None,
            export_path: None,
        };
        let result = s.process_load_statements(&params).await.unwrap();
        assert_eq!(result.total_records, 3);
        assert!(result.skipped.is_none());
        let key = result.session_key.unwrap();

        let json: serde_json::Value = serde_json::from_str(&s.view(&key, "top_contacts", |t| {
            (analytics::top_contacts(t, 1), None)
        }))
        .unwrap();
        assert_eq!(json["data"][0]["number"], "919800000001");
        assert_eq!(json["data"][0]["call_count"], 2);
    }

    #[tokio::test]
    async fn test_failed_source_keeps_other_records() {
        let s = server(ServerConfig::default());
        let good = statement("1 01-JAN-24 10:00:00 919800000001 120 120 0 120 1.20\n");

        let params = LoadStatementsParams {
            sources: vec![
                StatementSource::Path {
                    path: "/nonexistent/bill.pdf".to_string(),
                },
                path_source(&good),
            ],
            password: None,
            session_key: None,
            export_path: None,
        };
        let result = s.process_load_statements(&params).await.unwrap();
        assert_eq!(result.total_records, 1);
        assert_eq!(result.statements[0].error.as_deref(), Some("PDF not found"));
        assert!(result.statements[1].error.is_none());
    }

    #[tokio::test]
    async fn test_append_to_existing_session() {
        let s = server(ServerConfig::default());
        let a = statement("1 01-JAN-24 10:00:00 919800000001 120 120 0 120 1.20\n");
        let b = statement("1 03-JAN-24 10:00:00 919800000002 60 60 0 60 0.60\n");

        let first = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&a)],
                password: None,
                session_key: None,
                export_path: None,
            })
            .await
            .unwrap();
        let key = first.session_key.unwrap();

        let second = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&b)],
                password: None,
                session_key: Some(key.clone()),
                export_path: None,
            })
            .await
            .unwrap();
        assert_eq!(second.session_key.as_deref(), Some(key.as_str()));
        assert_eq!(second.total_records, 2);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let s = server(ServerConfig::default());
        let json: serde_json::Value = serde_json::from_str(&s.view("missing", "calls_over_time", |t| {
            (analytics::calls_over_time(t), None)
        }))
        .unwrap();
        assert_eq!(json["error"], "Session not found: missing");
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_export_csv_inline() {
        let s = server(ServerConfig::default());
        let file = statement("1 01-JAN-24 10:00:00 009198000000 120 120 0 120 1.20\n");
        let loaded = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&file)],
                password: None,
                session_key: None,
                export_path: None,
            })
            .await
            .unwrap();

        let export = s
            .process_export_csv(&ExportCsvParams {
                session_key: loaded.session_key.unwrap(),
                output_path: None,
            })
            .unwrap();
        assert_eq!(export.rows, 1);
        assert!(export.csv.unwrap().contains(",009198000000,"));
    }

    /// Transcript extractor that holds each call long enough for loads to overlap
    struct SlowExtractor(std::time::Duration);

    impl TextExtractor for SlowExtractor {
        fn extract_text(&self, path: &Path, password: Option<&str>) -> crate::error::Result<String> {
            std::thread::sleep(self.0);
            TranscriptExtractor.extract_text(path, password)
        }
    }

    /// Remembers the path it was given, then fails
    #[derive(Default)]
    struct FailingExtractor(parking_lot::Mutex<Option<PathBuf>>);

    impl TextExtractor for FailingExtractor {
        fn extract_text(&self, path: &Path, _password: Option<&str>) -> crate::error::Result<String> {
            *self.0.lock() = Some(path.to_path_buf());
            Err(Error::InvalidPdf {
                reason: "corrupt xref table".to_string(),
            })
        }
    }

    fn append_params(key: &str, file: &tempfile::NamedTempFile) -> LoadStatementsParams {
        LoadStatementsParams {
            sources: vec![path_source(file)],
            password: None,
            session_key: Some(key.to_string()),
            export_path: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_appends_keep_every_record() {
        let s = CallRecordsServer::with_extractor(
            ServerConfig::default(),
            Arc::new(SlowExtractor(std::time::Duration::from_millis(200))),
        );
        let seed = statement("1 01-JAN-24 10:00:00 919800000001 120 120 0 120 1.20\n");
        let a = statement("1 02-JAN-24 10:00:00 919800000002 60 60 0 60 0.60\n");
        let b = statement("1 03-JAN-24 10:00:00 919800000003 30 30 0 30 0.30\n");

        let key = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&seed)],
                password: None,
                session_key: None,
                export_path: None,
            })
            .await
            .unwrap()
            .session_key
            .unwrap();

        let params_a = append_params(&key, &a);
        let params_b = append_params(&key, &b);
        let (first, second) = tokio::join!(
            s.process_load_statements(&params_a),
            s.process_load_statements(&params_b)
        );
        first.unwrap();
        second.unwrap();

        let table = s.session(&key).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(s.sessions.total_records(), 3);
    }

    #[tokio::test]
    async fn test_failed_export_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let s = server(ServerConfig {
            resource_dirs: vec![dir.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });
        let mut inside = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile_in(dir.path())
            .unwrap();
        write!(
            inside,
            "%PDF-1.4\n1 01-JAN-24 10:00:00 919800000001 120 120 0 120 1.20\n"
        )
        .unwrap();

        let result = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&inside)],
                password: None,
                session_key: None,
                export_path: Some("/etc/calls.csv".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(result.total_records, 1);
        assert!(result.export_path.is_none());
        assert_eq!(result.export_error.as_deref(), Some("Access denied"));
        let key = result.session_key.unwrap();
        assert_eq!(s.session(&key).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_report_policy_surfaces_unreadable_usage() {
        let s = server(ServerConfig {
            skip_policy: SkipPolicy::Report,
            ..ServerConfig::default()
        });
        let file = statement(
            "1 01-JAN-24 10:00:00 919800000001 99999999999999999999999 60 0 60 0.60\n\
             2 01-JAN-24 11:00:00 919800000001 60 60 0 60 0.60\n",
        );

        let result = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![path_source(&file)],
                password: None,
                session_key: None,
                export_path: None,
            })
            .await
            .unwrap();

        assert_eq!(result.total_records, 2);
        assert_eq!(result.skipped, Some(0));
        assert_eq!(result.null_usage, Some(1));
        assert_eq!(result.statements[0].null_usage, Some(1));
    }

    #[tokio::test]
    async fn test_staged_upload_removed_when_extraction_fails() {
        use base64::Engine;

        let extractor = Arc::new(FailingExtractor::default());
        let s = CallRecordsServer::with_extractor(ServerConfig::default(), extractor.clone());
        let upload = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4\nbroken");

        let result = s
            .process_load_statements(&LoadStatementsParams {
                sources: vec![StatementSource::Base64 { base64: upload }],
                password: None,
                session_key: None,
                export_path: None,
            })
            .await
            .unwrap();

        assert_eq!(result.statements[0].error.as_deref(), Some("Invalid PDF file"));
        let staged = extractor.0.lock().clone().unwrap();
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_output_path_outside_resource_dirs_denied() {
        let dir = tempfile::tempdir().unwrap();
        let s = server(ServerConfig {
            resource_dirs: vec![dir.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });

        let err = s.validate_output_path_access("/tmp/../etc/calls.csv").unwrap_err();
        assert!(matches!(err, Error::PathAccessDenied { .. }));

        let inside = dir.path().join("calls.csv");
        assert!(s
            .validate_output_path_access(&inside.to_string_lossy())
            .is_ok());
    }
}
