//! HTTP client for the proxy management API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use cpascope_types::{Connection, ErrorLogFile, ErrorLogList, LogsResponse, UsageResponse};

use crate::error::status_message;
use crate::{ClientError, LogSource, UsageSource};

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Management API client
///
/// Stateless apart from the connection pool; every call names the connection
/// it targets.
#[derive(Clone, Debug)]
pub struct ManagementClient {
    http: reqwest::Client,
}

impl ManagementClient {
    /// Create a client with the default timeout
    pub fn new() -> Result<Self, ClientError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// List request error log files
    pub async fn list_error_logs(
        &self,
        connection: &Connection,
    ) -> Result<Vec<ErrorLogFile>, ClientError> {
        let url = endpoint(connection, &["request-error-logs"])?;
        let body = self.send(connection, Method::GET, url).await?;
        let list: ErrorLogList = decode(&body)?;
        Ok(list.files)
    }

    /// Download one request error log by file name
    pub async fn download_error_log(
        &self,
        connection: &Connection,
        name: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let url = endpoint(connection, &["request-error-logs", name])?;
        self.send(connection, Method::GET, url).await
    }

    /// Download the full request log recorded for a request id
    pub async fn download_request_log(
        &self,
        connection: &Connection,
        request_id: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let url = endpoint(connection, &["request-log-by-id", request_id])?;
        self.send(connection, Method::GET, url).await
    }

    async fn send(
        &self,
        connection: &Connection,
        method: Method,
        url: Url,
    ) -> Result<Vec<u8>, ClientError> {
        debug!(%method, %url, "management request");

        let mut request = self.http.request(method, url);
        if !connection.management_key.is_empty() {
            request = request.bearer_auth(&connection.management_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: status_message(&body),
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl UsageSource for ManagementClient {
    async fn fetch_usage(&self, connection: &Connection) -> Result<UsageResponse, ClientError> {
        let url = endpoint(connection, &["usage"])?;
        let body = self.send(connection, Method::GET, url).await?;
        let response: UsageResponse = decode(&body)?;
        if !response.usage.is_object() && !response.usage.is_null() {
            return Err(ClientError::Decode("`usage` is not an object".to_string()));
        }
        Ok(response)
    }
}

#[async_trait]
impl LogSource for ManagementClient {
    async fn fetch_logs(
        &self,
        connection: &Connection,
        after: Option<i64>,
    ) -> Result<LogsResponse, ClientError> {
        let mut url = endpoint(connection, &["logs"])?;
        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", &after.to_string());
        }
        let body = self.send(connection, Method::GET, url).await?;
        decode(&body)
    }

    async fn clear_logs(&self, connection: &Connection) -> Result<(), ClientError> {
        let url = endpoint(connection, &["logs"])?;
        self.send(connection, Method::DELETE, url).await?;
        Ok(())
    }
}

/// Build a management URL, percent-encoding each path segment
fn endpoint(connection: &Connection, segments: &[&str]) -> Result<Url, ClientError> {
    if !connection.is_configured() {
        return Err(ClientError::NotConfigured);
    }

    let mut url = Url::parse(&connection.management_url(""))
        .map_err(|e| ClientError::InvalidBase(format!("{}: {}", connection.api_base, e)))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidBase(connection.api_base.clone()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(body).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::DELETE, Method::GET, MockServer};
    use serde_json::json;

    fn connection(server: &MockServer) -> Connection {
        Connection::new(&server.base_url(), "secret")
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let conn = Connection::new("localhost:8317", "");
        let url = endpoint(&conn, &["request-error-logs", "error 1.log"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8317/v0/management/request-error-logs/error%201.log"
        );
    }

    #[test]
    fn test_endpoint_requires_base() {
        let conn = Connection::default();
        assert!(matches!(
            endpoint(&conn, &["usage"]),
            Err(ClientError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_fetch_usage_sends_bearer_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v0/management/usage")
                    .header("authorization", "Bearer secret");
                then.status(200).json_body(json!({
                    "usage": { "total_requests": 3 },
                    "failed_requests": 1
                }));
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let response = client.fetch_usage(&connection(&server)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.usage["total_requests"], 3);
        assert_eq!(response.failed_requests, Some(1));
    }

    #[tokio::test]
    async fn test_fetch_usage_maps_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v0/management/usage");
                then.status(401).json_body(json!({ "error": "invalid management key" }));
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let err = client.fetch_usage(&connection(&server)).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 401: invalid management key");
    }

    #[tokio::test]
    async fn test_fetch_usage_rejects_non_object_usage() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v0/management/usage");
                then.status(200).json_body(json!({ "usage": [1, 2] }));
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let err = client.fetch_usage(&connection(&server)).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_logs_passes_after() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v0/management/logs")
                    .query_param("after", "1700000000");
                then.status(200).json_body(json!({
                    "lines": ["one", "two"],
                    "line-count": 2,
                    "latest-timestamp": 1700000005
                }));
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let response = client
            .fetch_logs(&connection(&server), Some(1_700_000_000))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.lines, vec!["one", "two"]);
        assert_eq!(response.latest_timestamp, Some(1_700_000_005));
    }

    #[tokio::test]
    async fn test_clear_logs_uses_delete() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v0/management/logs");
                then.status(200).json_body(json!({ "success": true }));
            })
            .await;

        let client = ManagementClient::new().unwrap();
        client.clear_logs(&connection(&server)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_and_download_error_logs() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v0/management/request-error-logs");
                then.status(200).json_body(json!({
                    "files": [{ "name": "error-1.log", "size": 12, "modified": 1700000000 }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v0/management/request-error-logs/error-1.log");
                then.status(200).body("boom");
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let conn = connection(&server);
        let files = client.list_error_logs(&conn).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "error-1.log");

        let body = client.download_error_log(&conn, "error-1.log").await.unwrap();
        assert_eq!(body, b"boom");
    }

    #[tokio::test]
    async fn test_download_request_log_by_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v0/management/request-log-by-id/a1b2c3d4")
                    .header("authorization", "Bearer secret");
                then.status(200).body("request body...");
            })
            .await;

        let client = ManagementClient::new().unwrap();
        let body = client
            .download_request_log(&connection(&server), "a1b2c3d4")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(body, b"request body...");
    }
}
