//! Shared types for cpascope
//!
//! This crate contains data structures used across multiple cpascope crates:
//! connection identity, usage statistics and log lines, plus the wire shapes
//! returned by the management API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Path prefix of the management API on the proxy
pub const MANAGEMENT_PREFIX: &str = "/v0/management";

// ============================================================================
// Connection Types
// ============================================================================

/// Identity of a backend connection: where the proxy lives and how we authenticate
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Connection {
    pub api_base: String,
    pub management_key: String,
}

impl Connection {
    /// Create a connection, normalizing the API base
    pub fn new(api_base: &str, management_key: &str) -> Self {
        Self {
            api_base: normalize_api_base(api_base),
            management_key: management_key.trim().to_string(),
        }
    }

    /// Opaque key partitioning cached data by connection
    pub fn scope_key(&self) -> String {
        format!("{}|{}", self.api_base, self.management_key)
    }

    /// Full URL for a management endpoint, e.g. `management_url("/usage")`
    pub fn management_url(&self, path: &str) -> String {
        format!("{}{}{}", self.api_base, MANAGEMENT_PREFIX, path)
    }

    /// Whether enough is set to talk to a backend
    pub fn is_configured(&self) -> bool {
        !self.api_base.is_empty()
    }
}

/// Normalize a user-entered API base.
///
/// Accepts `host:port`, full URLs, or URLs that already point at the
/// management prefix; always yields `scheme://host[:port][/path]` with no
/// trailing slash.
pub fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return base;
    }

    if !base.contains("://") {
        base = format!("http://{}", base);
    }

    loop {
        let before = base.len();
        while base.ends_with('/') {
            base.pop();
        }
        if let Some(stripped) = base.strip_suffix(MANAGEMENT_PREFIX) {
            base = stripped.to_string();
        }
        if base.len() == before {
            break;
        }
    }

    base
}

// ============================================================================
// Usage Types
// ============================================================================

/// Success/failure counters for one credential
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessFailure {
    pub success: u64,
    pub failure: u64,
}

impl SuccessFailure {
    pub fn new(success: u64, failure: u64) -> Self {
        Self { success, failure }
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// Success ratio in `0.0..=1.0`, `None` when nothing was recorded
    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success as f64 / total as f64),
        }
    }
}

/// Token counts attached to a usage record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

/// A single request recorded by the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Credential source (usually the auth file name or a masked API key)
    pub source: String,

    /// Normalized auth index, when the backend reports one
    pub auth_index: Option<String>,

    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,

    pub success: bool,

    /// Model name, when the record was found under `models.<name>`
    pub model: Option<String>,

    /// API name, when the record was found under `apis.<name>`
    pub api: Option<String>,

    pub tokens: Option<TokenCounts>,
}

/// Success/failure counts keyed by credential identifier
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    pub by_source: BTreeMap<String, SuccessFailure>,
    pub by_auth_index: BTreeMap<String, SuccessFailure>,
}

impl KeyStats {
    /// Aggregate counts from a list of usage records
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut stats = Self::default();
        for record in records {
            if !record.source.is_empty() {
                stats
                    .by_source
                    .entry(record.source.clone())
                    .or_default()
                    .record(record.success);
            }
            if let Some(index) = &record.auth_index {
                stats
                    .by_auth_index
                    .entry(index.clone())
                    .or_default()
                    .record(record.success);
            }
        }
        stats
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty() && self.by_auth_index.is_empty()
    }

    /// Counts summed across every source
    pub fn totals(&self) -> SuccessFailure {
        self.by_source
            .values()
            .fold(SuccessFailure::default(), |acc, sf| {
                SuccessFailure::new(acc.success + sf.success, acc.failure + sf.failure)
            })
    }
}

/// Everything the usage cache knows about one backend
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageSnapshot {
    /// Raw `usage` object as reported by the backend
    pub usage: Value,

    pub key_stats: KeyStats,

    /// Individual records, oldest first
    pub usage_details: Vec<UsageRecord>,

    /// When the data was last fetched successfully
    pub last_refreshed_at: Option<DateTime<Utc>>,

    /// Connection the data belongs to
    pub scope_key: Option<String>,
}

impl UsageSnapshot {
    /// Whether this snapshot has ever been filled
    pub fn is_empty(&self) -> bool {
        self.last_refreshed_at.is_none()
    }

    /// `total_requests` from the raw payload, falling back to the record count
    pub fn total_requests(&self) -> u64 {
        self.usage
            .get("total_requests")
            .and_then(Value::as_u64)
            .unwrap_or(self.usage_details.len() as u64)
    }

    /// `total_tokens` from the raw payload, falling back to summed record tokens
    pub fn total_tokens(&self) -> u64 {
        self.usage
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                self.usage_details
                    .iter()
                    .filter_map(|r| r.tokens.map(|t| t.total_tokens))
                    .sum()
            })
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    #[default]
    Unknown,
}

impl LogLevel {
    /// Parse log level from common spellings
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "trace" | "trc" => Self::Trace,
            "debug" | "dbg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warn,
            "error" | "err" => Self::Error,
            "fatal" | "panic" | "critical" | "crit" => Self::Fatal,
            _ => Self::Unknown,
        }
    }
}

/// HTTP status class used by the status facet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusGroup {
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirect,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
}

impl StatusGroup {
    pub const ALL: [StatusGroup; 4] = [
        Self::Success,
        Self::Redirect,
        Self::ClientError,
        Self::ServerError,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(Self::Success),
            300..=399 => Some(Self::Redirect),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Parse `"2xx"` style labels
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.label().eq_ignore_ascii_case(label.trim()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "2xx",
            Self::Redirect => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
        }
    }
}

/// A raw log line with whatever structure could be extracted from it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedLogLine {
    /// Original raw log line
    pub raw: String,

    /// Timestamp text as written by the backend
    pub timestamp: Option<String>,

    pub level: LogLevel,

    pub request_id: Option<String>,

    /// Emitting code location, e.g. `gin_logger.go:58`
    pub source: Option<String>,

    pub status_code: Option<u16>,

    /// Latency text as written, e.g. `1.234ms`
    pub latency: Option<String>,

    /// Latency converted to a duration, when the unit is recognized
    pub latency_duration: Option<Duration>,

    pub client_ip: Option<String>,

    pub method: Option<String>,

    pub path: Option<String>,

    /// Remaining free text (the whole line when nothing was recognized)
    pub message: String,
}

impl ParsedLogLine {
    /// A line nothing could be extracted from
    pub fn unparsed(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            message: raw.to_string(),
            ..Default::default()
        }
    }

    pub fn status_group(&self) -> Option<StatusGroup> {
        self.status_code.and_then(StatusGroup::from_code)
    }

    /// Path without its query string
    pub fn path_without_query(&self) -> Option<&str> {
        self.path
            .as_deref()
            .map(|p| p.split('?').next().unwrap_or(p))
    }

    pub fn is_http_request(&self) -> bool {
        self.method.is_some() && self.path.is_some()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `GET /usage`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UsageResponse {
    #[serde(default)]
    pub usage: Value,

    #[serde(default)]
    pub failed_requests: Option<u64>,
}

/// Body of `GET /logs`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub lines: Vec<String>,

    #[serde(default, rename = "line-count")]
    pub line_count: Option<u64>,

    /// Newest timestamp covered by this response; the lower bound for the next poll
    #[serde(default, rename = "latest-timestamp")]
    pub latest_timestamp: Option<i64>,
}

/// One entry of `GET /request-error-logs`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorLogFile {
    pub name: String,

    #[serde(default)]
    pub size: Option<u64>,

    /// Unix seconds
    #[serde(default)]
    pub modified: Option<i64>,
}

/// Body of `GET /request-error-logs`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorLogList {
    #[serde(default)]
    pub files: Vec<ErrorLogFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_api_base() {
        assert_eq!(normalize_api_base("localhost:8317"), "http://localhost:8317");
        assert_eq!(
            normalize_api_base(" https://proxy.example.com/ "),
            "https://proxy.example.com"
        );
        assert_eq!(
            normalize_api_base("http://127.0.0.1:8317/v0/management/"),
            "http://127.0.0.1:8317"
        );
        assert_eq!(normalize_api_base(""), "");
    }

    #[test]
    fn test_scope_key_changes_with_key() {
        let a = Connection::new("localhost:8317", "one");
        let b = Connection::new("http://localhost:8317/", "two");
        assert_eq!(a.api_base, b.api_base);
        assert_ne!(a.scope_key(), b.scope_key());
        assert_eq!(a.management_url("/usage"), "http://localhost:8317/v0/management/usage");
    }

    #[test]
    fn test_key_stats_from_records() {
        let record = |source: &str, index: Option<&str>, success: bool| UsageRecord {
            source: source.to_string(),
            auth_index: index.map(str::to_string),
            timestamp_ms: 0,
            success,
            model: None,
            api: None,
            tokens: None,
        };
        let stats = KeyStats::from_records(&[
            record("a.json", Some("1"), true),
            record("a.json", Some("1"), false),
            record("b.json", None, true),
        ]);
        assert_eq!(stats.by_source["a.json"], SuccessFailure::new(1, 1));
        assert_eq!(stats.by_source["b.json"], SuccessFailure::new(1, 0));
        assert_eq!(stats.by_auth_index["1"], SuccessFailure::new(1, 1));
        assert_eq!(stats.totals(), SuccessFailure::new(2, 1));
        assert_eq!(stats.by_source["a.json"].success_rate(), Some(0.5));
        assert_eq!(SuccessFailure::default().success_rate(), None);
    }

    #[test]
    fn test_status_group() {
        assert_eq!(StatusGroup::from_code(204), Some(StatusGroup::Success));
        assert_eq!(StatusGroup::from_code(503), Some(StatusGroup::ServerError));
        assert_eq!(StatusGroup::from_code(99), None);
        assert_eq!(StatusGroup::from_label("4XX"), Some(StatusGroup::ClientError));
        assert_eq!(StatusGroup::from_label("6xx"), None);
    }

    #[test]
    fn test_logs_response_wire_names() {
        let body = r#"{"lines":["a","b"],"line-count":2,"latest-timestamp":1700000000}"#;
        let parsed: LogsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.lines, vec!["a", "b"]);
        assert_eq!(parsed.latest_timestamp, Some(1_700_000_000));

        let empty: LogsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.lines.is_empty());
        assert_eq!(empty.latest_timestamp, None);
    }

    #[test]
    fn test_parsed_line_helpers() {
        let mut line = ParsedLogLine::unparsed("x");
        assert_eq!(line.message, "x");
        assert!(!line.is_http_request());
        line.path = Some("/v1/models?x=1".to_string());
        line.method = Some("GET".to_string());
        line.status_code = Some(404);
        assert_eq!(line.path_without_query(), Some("/v1/models"));
        assert_eq!(line.status_group(), Some(StatusGroup::ClientError));
        assert!(line.is_http_request());
    }
}
