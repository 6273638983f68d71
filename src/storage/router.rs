//! Object storage with a sticky local fallback.
//!
//! # State Transitions
//! ```text
//! PrimaryRemote → LocalFallback: startup probe or a write fails
//! LocalFallback → PrimaryRemote: mark_healthy
//! MemoryOnly: neither primary nor local path configured (terminal)
//! ```
//!
//! A failed primary write is retried on the local path with the same
//! payload before the caller sees the result.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::capability::{ManagedService, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::observability::metrics;
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::resilience::CircuitBreaker;
use crate::storage::local::LocalStore;
use crate::storage::memory::MemoryStore;

/// Which path is serving writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageMode {
    PrimaryRemote,
    LocalFallback,
    MemoryOnly,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::PrimaryRemote => "primary_remote",
            StorageMode::LocalFallback => "local_fallback",
            StorageMode::MemoryOnly => "memory_only",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => StorageMode::PrimaryRemote,
            1 => StorageMode::LocalFallback,
            _ => StorageMode::MemoryOnly,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StorageMode::PrimaryRemote => 0,
            StorageMode::LocalFallback => 1,
            StorageMode::MemoryOnly => 2,
        }
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReceipt {
    pub key: String,
    pub mode: StorageMode,
    pub location: String,
    /// Primary failure that pushed this write, or the router, to the local
    /// path.
    pub secondary_error: Option<String>,
}

/// Routes blob writes to the primary store, local disk, or memory.
pub struct FallbackStorageRouter {
    breaker: CircuitBreaker,
    primary: Option<Arc<dyn ObjectStore>>,
    local: Option<LocalStore>,
    memory: MemoryStore,
    mode: AtomicU8,
    /// Why the primary was demoted; `None` while it is in use.
    demotion: RwLock<Option<String>>,
    write_timeout: Duration,
}

impl FallbackStorageRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        name: impl Into<String>,
        primary: Option<Arc<dyn ObjectStore>>,
        local_path: Option<PathBuf>,
    ) -> Self {
        let local = local_path.map(LocalStore::new);
        let mode = match (&primary, &local) {
            (Some(_), _) => StorageMode::PrimaryRemote,
            (None, Some(_)) => StorageMode::LocalFallback,
            (None, None) => StorageMode::MemoryOnly,
        };
        Self {
            breaker: CircuitBreaker::new(registry, name),
            primary,
            local,
            memory: MemoryStore::new(),
            mode: AtomicU8::new(mode.as_u8()),
            demotion: RwLock::new(None),
            write_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        registry: Arc<ServiceRegistry>,
        name: impl Into<String>,
        primary: Option<Arc<dyn ObjectStore>>,
        config: &StorageConfig,
    ) -> Self {
        let mut router = Self::new(registry, name, primary, config.local_path.as_ref().map(PathBuf::from));
        router.write_timeout = Duration::from_millis(config.write_timeout_ms);
        router
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.breaker.service()
    }

    /// Path that serves the next write.
    ///
    /// Stays `PrimaryRemote` when the primary is demoted but no local path
    /// exists; writes then fail with a storage error. Check
    /// [`is_demoted`](Self::is_demoted) for that case.
    pub fn mode(&self) -> StorageMode {
        StorageMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// The primary failed and is skipped until `mark_healthy`.
    pub fn is_demoted(&self) -> bool {
        self.demotion_reason().is_some()
    }

    pub fn demotion_reason(&self) -> Option<String> {
        self.demotion.read().ok().and_then(|reason| reason.clone())
    }

    fn set_demotion(&self, reason: Option<String>) {
        if let Ok(mut current) = self.demotion.write() {
            *current = reason;
        }
    }

    fn set_mode(&self, mode: StorageMode) {
        let previous = StorageMode::from_u8(self.mode.swap(mode.as_u8(), Ordering::SeqCst));
        if previous != mode {
            tracing::info!(service = %self.name(), from = previous.as_str(), to = mode.as_str(), "Storage mode changed");
        }
    }

    /// Stop using the primary until `mark_healthy`.
    fn demote(&self, reason: &str) {
        self.set_demotion(Some(reason.to_string()));
        if self.local.is_some() {
            self.set_mode(StorageMode::LocalFallback);
        }
        self.breaker
            .registry()
            .set_status(self.name(), ServiceStatus::Fallback);
        tracing::warn!(service = %self.name(), reason = %reason, "Primary storage demoted");
    }

    /// Restore the primary path after an operator or probe confirms it.
    pub fn mark_healthy(&self) {
        if self.primary.is_none() {
            return;
        }
        self.breaker.registry().mark_healthy(self.name());
        self.set_demotion(None);
        self.set_mode(StorageMode::PrimaryRemote);
    }

    /// Probe the primary once; demote on failure.
    pub async fn initialize(&self) -> ServiceResult<()> {
        if let Some(local) = &self.local {
            if let Err(e) = local.ensure_root().await {
                tracing::warn!(service = %self.name(), path = %local.root().display(), error = %e, "Local fallback directory unavailable");
            }
        }

        let Some(primary) = &self.primary else {
            tracing::info!(service = %self.name(), mode = self.mode().as_str(), "No primary storage configured");
            return Ok(());
        };

        self.breaker.registry().ensure_health(self.name());
        match self.breaker.try_call(|| primary.ping(), self.write_timeout).await {
            Ok(()) => {
                self.set_mode(StorageMode::PrimaryRemote);
                Ok(())
            }
            Err(e) => {
                self.demote(&e.to_string());
                Err(e)
            }
        }
    }

    /// Store `bytes` under `key` on the best available path.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> ServiceResult<StoreReceipt> {
        match self.mode() {
            StorageMode::PrimaryRemote => {
                let Some(primary) = &self.primary else {
                    return self.store_local(key, bytes, None).await;
                };
                if self.is_demoted() {
                    return self.store_local(key, bytes, self.demotion_reason()).await;
                }
                match self.breaker.try_call(|| primary.put(key, bytes), self.write_timeout).await {
                    Ok(location) => {
                        metrics::record_storage_write(self.name(), StorageMode::PrimaryRemote);
                        Ok(StoreReceipt {
                            key: key.to_string(),
                            mode: StorageMode::PrimaryRemote,
                            location,
                            secondary_error: None,
                        })
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.demote(&reason);
                        self.store_local(key, bytes, Some(reason)).await
                    }
                }
            }
            StorageMode::LocalFallback => self.store_local(key, bytes, self.demotion_reason()).await,
            StorageMode::MemoryOnly => {
                let location = self.memory.put(key, bytes);
                metrics::record_storage_write(self.name(), StorageMode::MemoryOnly);
                Ok(StoreReceipt {
                    key: key.to_string(),
                    mode: StorageMode::MemoryOnly,
                    location,
                    secondary_error: None,
                })
            }
        }
    }

    async fn store_local(&self, key: &str, bytes: &[u8], primary_error: Option<String>) -> ServiceResult<StoreReceipt> {
        let Some(local) = &self.local else {
            return Err(ServiceError::Storage {
                service: self.name().to_string(),
                reason: format!(
                    "primary failed ({}) and no local fallback is configured",
                    primary_error.as_deref().unwrap_or("demoted")
                ),
            });
        };

        match local.put(key, bytes).await {
            Ok(path) => {
                metrics::record_storage_write(self.name(), StorageMode::LocalFallback);
                tracing::debug!(service = %self.name(), key = %key, path = %path.display(), "Stored locally");
                Ok(StoreReceipt {
                    key: key.to_string(),
                    mode: StorageMode::LocalFallback,
                    location: path.display().to_string(),
                    secondary_error: primary_error,
                })
            }
            Err(e) => Err(ServiceError::Storage {
                service: self.name().to_string(),
                reason: match primary_error {
                    Some(primary) => format!("primary failed ({primary}); local write failed ({e})"),
                    None => format!("local write failed ({e})"),
                },
            }),
        }
    }

    /// Read `key`, checking the local path for objects written during an
    /// outage.
    pub async fn retrieve(&self, key: &str) -> ServiceResult<Option<Vec<u8>>> {
        if self.mode() == StorageMode::MemoryOnly {
            return Ok(self.memory.get(key));
        }

        if let (false, Some(primary)) = (self.is_demoted(), &self.primary) {
            match self.breaker.try_call(|| primary.get(key), self.write_timeout).await {
                Ok(Some(bytes)) => return Ok(Some(bytes)),
                Ok(None) => {}
                Err(e) => self.demote(&e.to_string()),
            }
        }

        match &self.local {
            Some(local) => local.get(key).await.map_err(|e| ServiceError::Storage {
                service: self.name().to_string(),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ManagedService for FallbackStorageRouter {
    fn name(&self) -> &str {
        self.breaker.service()
    }

    async fn initialize(&self) -> ServiceResult<()> {
        FallbackStorageRouter::initialize(self).await
    }

    async fn probe(&self) -> Result<(), BackendError> {
        match &self.primary {
            Some(primary) => primary.ping().await,
            None => Err(BackendError::Unsupported("primary storage".to_string())),
        }
    }

    // Sticky until `mark_healthy`.
    fn recovers_automatically(&self) -> bool {
        false
    }
}
