use async_trait::async_trait;

use cpascope_types::{Connection, LogsResponse, UsageResponse};

use crate::ClientError;

/// Something that can produce the backend's usage payload
///
/// The connection is passed explicitly so a request stays bound to the scope
/// it was issued for, even if the live connection switches mid-flight.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(&self, connection: &Connection) -> Result<UsageResponse, ClientError>;
}

/// Something that can produce backend log lines
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch log lines; `after` limits the result to lines newer than that timestamp
    async fn fetch_logs(
        &self,
        connection: &Connection,
        after: Option<i64>,
    ) -> Result<LogsResponse, ClientError>;

    /// Delete the server-side log
    async fn clear_logs(&self, connection: &Connection) -> Result<(), ClientError>;
}
