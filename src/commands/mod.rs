//! Subcommand implementations

mod files;
mod logs;
mod usage;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use cpascope_client::{ConnectionHandle, ManagementClient};

use crate::config::Settings;

pub use files::{ErrorLogsCommand, run_error_logs, run_request_log};
pub use logs::{LogsArgs, run_clear_logs, run_logs};
pub use usage::{UsageArgs, run_usage};

/// Everything a command needs to talk to the backend
pub struct Context {
    pub settings: Settings,
    pub connection: ConnectionHandle,
    pub client: Arc<ManagementClient>,
}

impl Context {
    pub fn new(settings: Settings) -> Result<Self> {
        let connection = settings.connection();
        if !connection.is_configured() {
            let hint = Settings::default_path()
                .map(|p| format!(" or set api_base in {}", p.display()))
                .unwrap_or_default();
            anyhow::bail!("No API base configured; pass --api-base{}", hint);
        }

        let client = ManagementClient::with_timeout(settings.timeout())
            .context("Failed to create HTTP client")?;

        Ok(Self {
            connection: ConnectionHandle::new(connection),
            client: Arc::new(client),
            settings,
        })
    }
}
