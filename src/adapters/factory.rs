//! Client construction from configuration.
//!
//! One client per declared service with a connection, chosen by kind:
//! object storage gets a [`FallbackStorageRouter`], pooled kinds get a
//! [`ConnectionManager`], everything else an [`EndpointService`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::{HttpObjectStore, TcpEndpoint};
use crate::capability::{ManagedService, ObjectStore};
use crate::config::{ResilienceConfig, ServiceConfig, ServiceKind};
use crate::connection::{ConnectionManager, EndpointService};
use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::registry::ServiceRegistry;
use crate::storage::FallbackStorageRouter;

/// Build a client for every configured service.
///
/// A malformed connection string is fatal only for a required service. An
/// optional one gets a client whose initialization reports the error, so
/// startup demotes it and records a recommendation.
pub fn build_clients(
    registry: &Arc<ServiceRegistry>,
    config: &ResilienceConfig,
) -> ServiceResult<Vec<Arc<dyn ManagedService>>> {
    let mut clients = Vec::new();

    for (name, service) in &config.services {
        let client = match build_client(registry, config, name, service) {
            Ok(Some(client)) => client,
            Ok(None) => continue,
            Err(e) if service.required => return Err(e),
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "Invalid connection string for optional service");
                Arc::new(Misconfigured {
                    name: name.clone(),
                    error: e.to_string(),
                })
            }
        };
        clients.push(client);
    }

    Ok(clients)
}

fn build_client(
    registry: &Arc<ServiceRegistry>,
    config: &ResilienceConfig,
    name: &str,
    service: &ServiceConfig,
) -> ServiceResult<Option<Arc<dyn ManagedService>>> {
    let connection = service
        .connection
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let client: Arc<dyn ManagedService> = match (service.kind, connection) {
        (ServiceKind::ObjectStorage, connection) => {
            let primary = match connection {
                Some(url) => {
                    let store = HttpObjectStore::new(name, url, config.timeouts.connect())?;
                    Some(Arc::new(store) as Arc<dyn ObjectStore>)
                }
                None => None,
            };
            Arc::new(FallbackStorageRouter::from_config(
                Arc::clone(registry),
                name,
                primary,
                &config.storage,
            ))
        }
        (_, None) => return Ok(None),
        (kind @ (ServiceKind::Database | ServiceKind::Cache | ServiceKind::MessageQueue), Some(connection)) => {
            let endpoint = TcpEndpoint::parse(name, connection, kind)?;
            Arc::new(ConnectionManager::new(Arc::clone(registry), name, endpoint).with_config(config))
        }
        (kind, Some(connection)) => {
            let endpoint = TcpEndpoint::parse(name, connection, kind)?;
            Arc::new(EndpointService::new(Arc::clone(registry), name, endpoint).with_config(config))
        }
    };
    Ok(Some(client))
}

/// Stand-in for an optional service whose connection string did not parse.
struct Misconfigured {
    name: String,
    error: String,
}

#[async_trait]
impl ManagedService for Misconfigured {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> ServiceResult<()> {
        Err(ServiceError::Configuration {
            service: self.name.clone(),
            reason: self.error.clone(),
        })
    }

    async fn probe(&self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported(format!("connection for '{}'", self.name)))
    }

    // Connection strings are fixed at load time.
    fn recovers_automatically(&self) -> bool {
        false
    }
}
