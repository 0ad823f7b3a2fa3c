use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

use cpascope_types::{LogLevel, ParsedLogLine};

/// Turns a raw line into a [`ParsedLogLine`]
///
/// The filter pipeline only depends on this trait, so callers can plug in a
/// parser for another log format.
pub trait LineParser {
    fn parse_line(&self, raw: &str) -> ParsedLogLine;
}

impl<F> LineParser for F
where
    F: Fn(&str) -> ParsedLogLine,
{
    fn parse_line(&self, raw: &str) -> ParsedLogLine {
        self(raw)
    }
}

/// `[2025-01-15 10:30:00]` or `[2025-01-15T10:30:00.123Z]` at line start
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\]\s*")
        .expect("valid timestamp regex")
});

/// Leading bracketed tag such as `[info ]`, `[a1b2c3d4]`, `[gin_logger.go:58]`
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]*)\]\s*").expect("valid tag regex"));

static SOURCE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w./-]+\.\w+:\d+$").expect("valid source location regex")
});

static REQUEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z-]{6,64}$").expect("valid request id regex"));

/// Gin access line: `200 |   1.234ms |  127.0.0.1 | GET "/v1/models"`
static ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<status>\d{3})\s*\|\s*(?P<latency>[0-9][0-9.]*[a-zµ]+(?:[0-9.]+[a-zµ]+)*)\s*\|\s*(?P<ip>[^|]*?)\s*\|\s*(?P<method>[A-Z]+)\s+"?(?P<path>[^"\s]+)"?\s*(?P<rest>.*)$"#,
    )
    .expect("valid access regex")
});

/// `GET /path` anywhere in free text
static METHOD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\s+"?(/[^"\s]*)"?"#)
        .expect("valid method regex")
});

static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)(ns|µs|us|ms|s|m|h)").expect("valid duration regex"));

/// Log parser for the proxy's text log format
#[derive(Clone, Copy, Debug, Default)]
pub struct LogParser;

impl LineParser for LogParser {
    fn parse_line(&self, raw: &str) -> ParsedLogLine {
        Self::parse(raw)
    }
}

impl LogParser {
    /// Parse a raw log line; unrecognized parts end up in `message`
    pub fn parse(raw: &str) -> ParsedLogLine {
        let mut line = ParsedLogLine::unparsed(raw);
        let mut rest = raw.trim_end();

        if let Some(caps) = TIMESTAMP.captures(rest) {
            line.timestamp = Some(caps[1].to_string());
            rest = &rest[caps[0].len()..];
        }

        // Up to three bracketed tags: request id, level, source location
        for _ in 0..3 {
            let Some(caps) = TAG.captures(rest) else {
                break;
            };
            let tag = caps[1].trim();
            let level = LogLevel::from_label(tag);
            if level != LogLevel::Unknown && line.level == LogLevel::Unknown {
                line.level = level;
            } else if line.source.is_none() && SOURCE_LOCATION.is_match(tag) {
                line.source = Some(tag.to_string());
            } else if !tag.is_empty() && tag.chars().all(|c| c == '-') {
                // placeholder written when a line has no request id
            } else if line.request_id.is_none()
                && line.level == LogLevel::Unknown
                && REQUEST_ID.is_match(tag)
            {
                line.request_id = Some(tag.to_string());
            } else {
                break;
            }
            rest = &rest[caps[0].len()..];
        }

        let rest = rest.trim();

        if let Some(caps) = ACCESS.captures(rest) {
            line.status_code = caps["status"].parse().ok();
            let latency = caps["latency"].to_string();
            line.latency_duration = parse_latency(&latency);
            line.latency = Some(latency);
            line.client_ip = Some(caps["ip"].trim().to_string()).filter(|ip| !ip.is_empty());
            line.method = Some(caps["method"].to_string());
            line.path = Some(caps["path"].to_string());
            line.message = caps["rest"].trim().to_string();
        } else if let Some(fields) = Self::try_parse_json(rest) {
            Self::apply_json(&mut line, &fields);
        } else {
            if let Some(caps) = METHOD_PATH.captures(rest) {
                line.method = Some(caps[1].to_string());
                line.path = Some(caps[2].to_string());
            }
            line.message = rest.to_string();
        }

        if line.level == LogLevel::Unknown {
            line.level = Self::extract_level_from_text(rest);
        }

        line
    }

    /// Try to parse content as a JSON object
    fn try_parse_json(content: &str) -> Option<serde_json::Map<String, Value>> {
        if !content.starts_with('{') {
            return None;
        }
        match serde_json::from_str(content).ok()? {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    fn apply_json(line: &mut ParsedLogLine, fields: &serde_json::Map<String, Value>) {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| fields.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };

        if let Some(level) = text(&["level", "lvl", "severity"]) {
            line.level = LogLevel::from_label(&level);
        }
        line.timestamp = line.timestamp.take().or_else(|| text(&["time", "ts", "timestamp"]));
        line.method = text(&["method"]).map(|m| m.to_uppercase());
        line.path = text(&["path", "uri"]);
        line.request_id = line.request_id.take().or_else(|| text(&["request_id", "requestId"]));
        line.status_code = fields
            .get("status")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .and_then(|code| u16::try_from(code).ok());
        line.message = text(&["msg", "message"]).unwrap_or_else(|| line.raw.clone());
    }

    /// Extract log level from plain text patterns
    fn extract_level_from_text(content: &str) -> LogLevel {
        let upper = content.to_uppercase();

        let patterns = [
            ("FATAL", LogLevel::Fatal),
            ("PANIC", LogLevel::Fatal),
            ("ERROR", LogLevel::Error),
            ("WARNING", LogLevel::Warn),
            ("WARN", LogLevel::Warn),
            ("INFO", LogLevel::Info),
            ("DEBUG", LogLevel::Debug),
            ("TRACE", LogLevel::Trace),
        ];

        for (word, level) in patterns {
            if upper.contains(&format!("[{}]", word))
                || upper.contains(&format!("{}:", word))
                || upper.starts_with(word)
            {
                return level;
            }
        }

        LogLevel::Unknown
    }
}

/// Parse Go-style durations such as `1.234ms`, `850µs` or `1m2.5s`
fn parse_latency(text: &str) -> Option<Duration> {
    let mut nanos = 0f64;
    let mut consumed = 0;

    for caps in DURATION_PART.captures_iter(text) {
        let value: f64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "ns" => 1.0,
            "µs" | "us" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        nanos += value * unit;
        consumed += caps[0].len();
    }

    (consumed == text.len() && consumed > 0).then(|| Duration::from_nanos(nanos.round() as u64))
}
