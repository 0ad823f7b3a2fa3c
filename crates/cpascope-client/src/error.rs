use thiserror::Error;

/// Errors talking to the management API
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no backend configured (set an API base first)")]
    NotConfigured,

    #[error("invalid API base: {0}")]
    InvalidBase(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the backend rejected the management key
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

/// Longest error body kept in a `Status` message
const MAX_ERROR_BODY: usize = 200;

/// Turn an error response body into a short message.
///
/// The backend answers `{"error": "..."}` for most failures; anything else is
/// kept as trimmed text.
pub(crate) fn status_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
