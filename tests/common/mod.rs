//! Shared fakes for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use service_resilience::capability::{Connector, ObjectStore, Pingable};
use service_resilience::config::{ResilienceConfig, ServiceConfig, ServiceKind};
use service_resilience::BackendError;

/// Connector that refuses the first `failures` connects.
pub struct FlakyConnector {
    failures: u32,
    pub attempts: AtomicU32,
}

impl FlakyConnector {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    type Connection = u32;

    async fn connect(&self) -> Result<u32, BackendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(BackendError::Connect("connection refused".into()));
        }
        Ok(attempt)
    }

    async fn probe(&self, _conn: &u32) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Object store whose every call fails.
#[derive(Default)]
pub struct DownStore {
    pub calls: AtomicU32,
}

#[async_trait]
impl ObjectStore for DownStore {
    async fn put(&self, _key: &str, _bytes: &[u8]) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Operation("503 Service Unavailable".into()))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Operation("503 Service Unavailable".into()))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Probe("503 Service Unavailable".into()))
    }
}

/// Ping target that always answers.
#[derive(Default)]
pub struct Reachable {
    pub pings: AtomicU32,
}

#[async_trait]
impl Pingable for Reachable {
    async fn ping(&self) -> Result<(), BackendError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn declared(kind: ServiceKind, connection: Option<&str>, required: bool) -> ServiceConfig {
    ServiceConfig {
        kind,
        connection: connection.map(str::to_string),
        required,
        ..ServiceConfig::default()
    }
}

/// Fast retries, no background probes, local fallback under `local`.
pub fn test_config(local: &Path) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.retries.max_attempts = 3;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.health_check.enabled = false;
    config.storage.local_path = Some(local.display().to_string());
    config.storage.write_timeout_ms = 1_000;
    config
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// Reads each request in full before answering with the `(status, body)`
/// returned by `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        if read_request(&mut socket).await.is_none() {
                            return;
                        }
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Consume one request (headers plus `Content-Length` body).
async fn read_request(socket: &mut TcpStream) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - header_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_read += n;
    }
    Some(())
}
