use std::sync::Arc;

use parking_lot::RwLock;

use cpascope_types::Connection;

/// Live, switchable connection shared by every consumer
///
/// Caches read the current connection at the start of each load and compare
/// scope keys when results arrive, so switching here invalidates them lazily.
#[derive(Clone, Debug, Default)]
pub struct ConnectionHandle {
    inner: Arc<RwLock<Connection>>,
}

impl ConnectionHandle {
    pub fn new(connection: Connection) -> Self {
        Self {
            inner: Arc::new(RwLock::new(connection)),
        }
    }

    /// Snapshot of the active connection
    pub fn current(&self) -> Connection {
        self.inner.read().clone()
    }

    /// Scope key of the active connection
    pub fn scope_key(&self) -> String {
        self.inner.read().scope_key()
    }

    /// Switch to another backend (or another management key)
    pub fn set(&self, connection: Connection) {
        let mut current = self.inner.write();
        if *current != connection {
            tracing::debug!(api_base = %connection.api_base, "connection switched");
            *current = connection;
        }
    }
}
