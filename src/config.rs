//! Settings file and CLI overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cpascope_logs::{BufferLimits, INITIAL_DISPLAY_LINES, LOAD_MORE_LINES, MAX_BUFFER_LINES};
use cpascope_types::Connection;
use cpascope_usage::DEFAULT_STALE_TIME;

/// Connection and behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Proxy address, e.g. `http://127.0.0.1:8317`
    #[serde(default)]
    pub api_base: String,

    #[serde(default)]
    pub management_key: String,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub usage: UsageSettings,

    #[serde(default)]
    pub logs: LogSettings,
}

fn default_timeout() -> u64 {
    10
}

/// Usage statistics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSettings {
    /// How long fetched statistics are served without refetching (seconds)
    #[serde(default = "default_stale_time")]
    pub stale_time_secs: u64,

    /// Refresh interval in watch mode (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_stale_time() -> u64 {
    DEFAULT_STALE_TIME.as_secs()
}

fn default_refresh_interval() -> u64 {
    30
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            stale_time_secs: default_stale_time(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

/// Log viewer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    #[serde(default = "default_initial_display_lines")]
    pub initial_display_lines: usize,

    #[serde(default = "default_load_more_lines")]
    pub load_more_lines: usize,

    /// Poll interval when following (seconds)
    #[serde(default = "default_log_poll_interval")]
    pub poll_interval_secs: u64,

    /// Hide the management API's own requests
    #[serde(default = "default_hide_management")]
    pub hide_management: bool,
}

fn default_max_lines() -> usize {
    MAX_BUFFER_LINES
}

fn default_initial_display_lines() -> usize {
    INITIAL_DISPLAY_LINES
}

fn default_load_more_lines() -> usize {
    LOAD_MORE_LINES
}

fn default_log_poll_interval() -> u64 {
    5
}

fn default_hide_management() -> bool {
    true
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            initial_display_lines: default_initial_display_lines(),
            load_more_lines: default_load_more_lines(),
            poll_interval_secs: default_log_poll_interval(),
            hide_management: default_hide_management(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            management_key: String::new(),
            timeout_secs: default_timeout(),
            usage: UsageSettings::default(),
            logs: LogSettings::default(),
        }
    }
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_base: Option<String>,
    pub management_key: Option<String>,
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load_file(p);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("cpascope/config.toml")),
            dirs::home_dir().map(|p| p.join(".cpascope.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn merge_cli(&mut self, cli: &CliOverrides) {
        if let Some(api_base) = &cli.api_base {
            self.api_base = api_base.clone();
        }
        if let Some(key) = &cli.management_key {
            self.management_key = key.clone();
        }
    }

    /// Clamp values that would make polling spin or the buffer useless
    pub fn validate(&mut self) {
        const MIN_INTERVAL_SECS: u64 = 1;

        self.timeout_secs = self.timeout_secs.max(1);
        self.usage.refresh_interval_secs = self.usage.refresh_interval_secs.max(MIN_INTERVAL_SECS);
        self.logs.poll_interval_secs = self.logs.poll_interval_secs.max(MIN_INTERVAL_SECS);
        self.logs.max_lines = self.logs.max_lines.max(1);
        self.logs.initial_display_lines = self.logs.initial_display_lines.max(1);
        self.logs.load_more_lines = self.logs.load_more_lines.max(1);
    }

    pub fn connection(&self) -> Connection {
        Connection::new(&self.api_base, &self.management_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.usage.stale_time_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.usage.refresh_interval_secs)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_secs(self.logs.poll_interval_secs)
    }

    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            max_lines: self.logs.max_lines,
            initial_display: self.logs.initial_display_lines,
            load_more: self.logs.load_more_lines,
        }
    }

    /// Path of the user config file, for messages
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cpascope/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.timeout_secs, 10);
        assert_eq!(settings.usage.stale_time_secs, 240);
        assert_eq!(settings.usage.refresh_interval_secs, 30);
        assert_eq!(settings.logs.max_lines, 10_000);
        assert_eq!(settings.logs.poll_interval_secs, 5);
        assert!(settings.logs.hide_management);
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
api_base = "localhost:8317/"
management_key = "secret"

[logs]
max_lines = 500
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();

        assert_eq!(settings.management_key, "secret");
        assert_eq!(settings.logs.max_lines, 500);
        assert_eq!(settings.logs.initial_display_lines, 100);
        assert_eq!(settings.usage.stale_time_secs, 240);
        assert_eq!(settings.connection().api_base, "http://localhost:8317");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "timeout_secs = \"soon\"").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut settings = Settings {
            api_base: "http://file:1".to_string(),
            management_key: "file-key".to_string(),
            ..Settings::default()
        };

        settings.merge_cli(&CliOverrides {
            api_base: Some("http://cli:2".to_string()),
            management_key: None,
        });

        assert_eq!(settings.api_base, "http://cli:2");
        assert_eq!(settings.management_key, "file-key");
    }

    #[test]
    fn test_validate_clamps_zero() {
        let mut settings = Settings::default();
        settings.logs.poll_interval_secs = 0;
        settings.logs.max_lines = 0;
        settings.validate();
        assert_eq!(settings.log_poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.buffer_limits().max_lines, 1);
    }
}
