use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use cpascope_types::{KeyStats, TokenCounts, UsageRecord, UsageSnapshot};

/// Build a full snapshot from a raw `usage` payload
pub fn build_snapshot(usage: Value, scope_key: &str) -> UsageSnapshot {
    let usage = match usage {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let usage_details = collect_usage_details(&usage);
    let key_stats = KeyStats::from_records(&usage_details);

    UsageSnapshot {
        usage,
        key_stats,
        usage_details,
        last_refreshed_at: Some(Utc::now()),
        scope_key: Some(scope_key.to_string()),
    }
}

/// Collect every usage record nested anywhere in the payload, oldest first.
///
/// The backend groups records as `apis.<api>.models.<model>.details[]`, but
/// any object carrying a string `source` and a readable `timestamp` counts,
/// wherever it sits.
pub fn collect_usage_details(usage: &Value) -> Vec<UsageRecord> {
    let mut records = Vec::new();
    walk(usage, Scope::default(), None, &mut records);
    records.sort_by_key(|r| r.timestamp_ms);
    records
}

/// Names inherited from enclosing `apis` / `models` maps
#[derive(Clone, Copy, Default)]
struct Scope<'a> {
    api: Option<&'a str>,
    model: Option<&'a str>,
}

fn walk<'a>(value: &'a Value, scope: Scope<'a>, parent_key: Option<&str>, out: &mut Vec<UsageRecord>) {
    match value {
        Value::Object(obj) => {
            if let Some(record) = record_from(obj, scope) {
                out.push(record);
                return;
            }
            for (key, child) in obj {
                let child_scope = match parent_key {
                    Some("apis") => Scope {
                        api: Some(key.as_str()),
                        ..scope
                    },
                    Some("models") => Scope {
                        model: Some(key.as_str()),
                        ..scope
                    },
                    _ => scope,
                };
                walk(child, child_scope, Some(key.as_str()), out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, scope, None, out);
            }
        }
        _ => {}
    }
}

fn record_from(obj: &Map<String, Value>, scope: Scope<'_>) -> Option<UsageRecord> {
    let source = obj.get("source")?.as_str()?;
    let timestamp_ms = match obj.get("timestamp").and_then(timestamp_ms) {
        Some(ts) => ts,
        None => {
            tracing::debug!(source, "skipping usage record without a readable timestamp");
            return None;
        }
    };

    // `failed` is what the backend writes; `success` is accepted too
    let success = match (
        obj.get("failed").and_then(Value::as_bool),
        obj.get("success").and_then(Value::as_bool),
    ) {
        (Some(failed), _) => !failed,
        (None, Some(success)) => success,
        (None, None) => true,
    };

    let auth_index = obj
        .get("auth_index")
        .or_else(|| obj.get("authIndex"))
        .and_then(normalize_auth_index);

    let tokens = obj
        .get("tokens")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<TokenCounts>(v.clone()).ok());

    Some(UsageRecord {
        source: source.trim().to_string(),
        auth_index,
        timestamp_ms,
        success,
        model: scope.model.map(str::to_string),
        api: scope.api.map(str::to_string),
        tokens,
    })
}

/// Auth indexes arrive as strings or integers; both map to a trimmed string
fn normalize_auth_index(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Numbers are taken as epoch milliseconds; strings may be RFC 3339 or numeric
fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .ok()
                .or_else(|| s.parse::<i64>().ok())
        }
        _ => None,
    }
}
