//! Bounded connection pool.
//!
//! # Responsibilities
//! - Cap concurrently checked-out connections at `max_size`
//! - Reuse idle connections, open new ones lazily up to the cap
//! - Scoped checkout: the permit is released on every exit path
//!
//! # Design Decisions
//! - A checked-out connection is discarded on drop unless the caller
//!   recycles it, so errors and timeouts never return a suspect
//!   connection to the idle list
//! - Closing waits (bounded) for outstanding checkouts before draining

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;

use crate::capability::Connector;
use crate::config::PoolConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::resilience::timeouts::with_deadline;

/// Pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Connection pool for one service.
pub struct Pool<C: Connector> {
    service: String,
    connector: Arc<C>,
    idle: Mutex<Vec<C::Connection>>,
    permits: Semaphore,
    max_size: usize,
    acquire_timeout: Duration,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl<C: Connector> Pool<C> {
    /// Build a pool seeded with an already-open connection.
    ///
    /// Opens up to `min_size` connections eagerly; a failure here only
    /// leaves the pool smaller, it grows lazily later.
    pub async fn build(
        service: &str,
        connector: Arc<C>,
        first: C::Connection,
        config: &PoolConfig,
        connect_timeout: Duration,
    ) -> Self {
        let max_size = config.max_size.max(1);
        let mut idle = vec![first];
        while idle.len() < config.min_size.min(max_size) {
            match with_deadline(service, connect_timeout, connector.connect()).await {
                Ok(conn) => idle.push(conn),
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, opened = idle.len(), "Could not pre-open pool connection");
                    break;
                }
            }
        }

        Self {
            service: service.to_string(),
            connector,
            idle: Mutex::new(idle),
            permits: Semaphore::new(max_size),
            max_size,
            acquire_timeout: config.acquire_timeout(),
            connect_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn idle(&self) -> MutexGuard<'_, Vec<C::Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a connection, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> ServiceResult<PooledConnection<'_, C>> {
        let permit = timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| ServiceError::Timeout {
                service: self.service.clone(),
                timeout: self.acquire_timeout,
            })?
            .map_err(|_| ServiceError::Connection {
                service: self.service.clone(),
                attempts: 0,
                reason: "pool closed".to_string(),
            })?;

        let reused = self.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => with_deadline(&self.service, self.connect_timeout, self.connector.connect()).await?,
        };

        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            reusable: false,
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.max_size - self.permits.available_permits();
        PoolStats {
            max_size: self.max_size,
            idle: self.idle().len(),
            in_use,
        }
    }

    /// Wait up to `grace` for checkouts to return, then close every idle
    /// connection. Returns false if the grace period ran out.
    pub async fn close(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        let drained = match timeout(grace, self.permits.acquire_many(self.max_size as u32)).await {
            Ok(Ok(all)) => {
                all.forget();
                true
            }
            _ => false,
        };
        self.permits.close();

        let conns = std::mem::take(&mut *self.idle());
        let count = conns.len();
        for conn in conns {
            self.connector.close(conn).await;
        }
        tracing::info!(service = %self.service, closed = count, drained, "Connection pool closed");
        drained
    }
}

/// A checked-out connection. Returned to the pool on drop only after
/// [`recycle`](Self::recycle).
pub struct PooledConnection<'a, C: Connector> {
    pool: &'a Pool<C>,
    conn: Option<C::Connection>,
    reusable: bool,
    _permit: SemaphorePermit<'a>,
}

impl<C: Connector> PooledConnection<'_, C> {
    /// Mark the connection as healthy so drop returns it to the pool.
    pub fn recycle(&mut self) {
        self.reusable = true;
    }
}

impl<C: Connector> Deref for PooledConnection<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl<C: Connector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.reusable && !self.pool.closed.load(Ordering::SeqCst) {
                self.pool.idle().push(conn);
            } else {
                tracing::debug!(service = %self.pool.service, "Discarding pooled connection");
            }
        }
    }
}
