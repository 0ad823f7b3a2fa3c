//! Management API client for cpascope
//!
//! This crate provides the HTTP client for the proxy's management API, the
//! live connection handle shared by the caches, and the source traits the
//! caches fetch through.

mod client;
mod connection;
mod error;
mod source;

pub use client::ManagementClient;
pub use connection::ConnectionHandle;
pub use error::ClientError;
pub use source::{LogSource, UsageSource};

// Re-export types that are used in our public API
pub use cpascope_types::{Connection, ErrorLogFile, LogsResponse, UsageResponse};
