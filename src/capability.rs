//! Capability interfaces for external dependencies.
//!
//! Each dependency kind is reached through a small trait implemented by a
//! concrete adapter. The orchestration layer only ever sees these traits.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{BackendError, ServiceResult};

/// Anything that can answer a cheap liveness check.
#[async_trait]
pub trait Pingable: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Opens connections for a pooled dependency.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, BackendError>;

    /// Liveness query on an open connection.
    async fn probe(&self, conn: &Self::Connection) -> Result<(), BackendError>;

    /// Optional capabilities available on this server (extensions, modules).
    async fn detect_features(&self, _conn: &Self::Connection) -> Result<HashSet<String>, BackendError> {
        Ok(HashSet::new())
    }

    /// Release a connection that leaves the pool for good.
    async fn close(&self, _conn: Self::Connection) {}
}

/// Remote blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, returning where it landed.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BackendError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

/// A service the orchestrator can bring up, probe, and tear down.
#[async_trait]
pub trait ManagedService: Send + Sync {
    fn name(&self) -> &str;

    /// Connect and verify. Errors are recoverable unless tagged fatal.
    async fn initialize(&self) -> ServiceResult<()>;

    /// One cheap liveness probe against the live resource.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Whether the health monitor may run `initialize` again once the
    /// cooldown after a failed startup has passed. False for services that
    /// stay demoted until told otherwise.
    fn recovers_automatically(&self) -> bool {
        true
    }

    /// Release resources. In-flight work must have finished or timed out.
    async fn shutdown(&self) {}
}
