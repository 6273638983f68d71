//! Generic TCP endpoint.
//!
//! Stands in for any dependency reached over a plain socket. Connection
//! strings are either URLs (`postgres://user@db:5432/app`) or `host:port`.

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::capability::{Connector, Pingable};
use crate::config::ServiceKind;
use crate::error::{BackendError, ServiceError, ServiceResult};

/// Well-known port for a dependency kind, used when a URL omits it.
pub fn default_port(kind: ServiceKind) -> Option<u16> {
    match kind {
        ServiceKind::Database => Some(5432),
        ServiceKind::Cache => Some(6379),
        ServiceKind::MessageQueue => Some(5672),
        ServiceKind::Search => Some(9200),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    address: String,
}

impl TcpEndpoint {
    /// Parse a connection string into a dialable `host:port`.
    pub fn parse(service: &str, connection: &str, kind: ServiceKind) -> ServiceResult<Self> {
        let invalid = |reason: String| ServiceError::Configuration {
            service: service.to_string(),
            reason,
        };
        let connection = connection.trim();

        if connection.contains("://") {
            let url = Url::parse(connection).map_err(|e| invalid(format!("invalid connection URL: {e}")))?;
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| invalid("connection URL has no host".to_string()))?;
            let port = url
                .port_or_known_default()
                .or_else(|| default_port(kind))
                .ok_or_else(|| invalid(format!("no port in '{}' and no default for {kind}", url.scheme())))?;
            return Ok(Self {
                address: format!("{host}:{port}"),
            });
        }

        match connection.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(Self {
                address: connection.to_string(),
            }),
            _ => Err(invalid(format!("expected URL or host:port, got '{connection}'"))),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connector for TcpEndpoint {
    type Connection = TcpStream;

    async fn connect(&self) -> Result<TcpStream, BackendError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| BackendError::Connect(format!("{}: {e}", self.address)))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn probe(&self, conn: &TcpStream) -> Result<(), BackendError> {
        if let Some(e) = conn.take_error()? {
            return Err(BackendError::Probe(e.to_string()));
        }
        conn.peer_addr()
            .map_err(|e| BackendError::Probe(format!("{}: {e}", self.address)))?;
        Ok(())
    }
}

#[async_trait]
impl Pingable for TcpEndpoint {
    async fn ping(&self) -> Result<(), BackendError> {
        TcpStream::connect(&self.address)
            .await
            .map(drop)
            .map_err(|e| BackendError::Probe(format!("{}: {e}", self.address)))
    }
}
