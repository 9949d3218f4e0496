//! Records accumulated during a unit of work and the payload they are shipped in.
//!
//! Field names follow the ingestion API's wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Incoming request as captured for the payload (already redacted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Map<String, Value>,
    pub payload: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Response half of a captured exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status_code: Option<u16>,
    pub response: Option<Value>,
    /// Milliseconds, rounded
    pub duration: u64,
}

/// One log line emitted during the unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub context: Map<String, Value>,
    pub channel: String,
    pub timestamp: String,
    pub source_class: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// One executed database statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub normalized_sql: String,
    pub pattern_hash: String,
    /// Milliseconds, four decimals
    pub duration: f64,
    pub sequence: usize,
    pub is_duplicate: bool,
    pub duplicate_count: usize,
    pub is_n1: bool,
    pub n1_group_hash: Option<String>,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub occurred_at: String,
}

/// A group of structurally identical queries flagged as an N+1 pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct N1Group {
    pub pattern: String,
    pub count: usize,
    pub hash: String,
}

/// One HTTP call made by the monitored process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingCallRecord {
    pub method: String,
    #[serde(rename = "uri")]
    pub url: String,
    /// `None` when the call failed before a response arrived
    pub status_code: Option<u16>,
    /// Milliseconds, two decimals
    pub duration: f64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Structured, fingerprinted error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub hash: String,
    pub message: String,
    #[serde(rename = "class")]
    pub type_name: String,
    pub file_path: String,
    pub line_number: u32,
    pub code: i64,
    pub stack_trace: Vec<StackFrame>,
    pub timestamp: String,
    pub context: ExceptionEnvironment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub class: String,
    pub in_app: bool,
    pub code_context: Option<CodeContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    pub lines: Vec<ContextLine>,
    pub context_start: u32,
    pub context_end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLine {
    pub line_number: u32,
    pub code: String,
    pub is_error_line: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEnvironment {
    pub environment: String,
    pub collector_version: String,
    pub os: String,
}

/// Request object of the payload: request and response fields merged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSection {
    #[serde(flatten)]
    pub request: Option<CapturedRequest>,
    #[serde(flatten)]
    pub response: Option<CapturedResponse>,
}

/// Body posted to the ingestion endpoint. Empty sections are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<QueryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outgoing_requests: Vec<OutgoingCallRecord>,
}
