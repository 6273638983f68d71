//! Timeout enforcement.
//!
//! Every call into a dependency goes through [`with_deadline`]; an elapsed
//! deadline is reported as [`ServiceError::Timeout`], distinct from a failed
//! call.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{BackendError, ServiceError, ServiceResult};

/// Default deadline for an operation when the caller has no preference.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` under `deadline`, tagging errors with the service name.
pub async fn with_deadline<T, F>(service: &str, deadline: Duration, fut: F) -> ServiceResult<T>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ServiceError::Operation {
            service: service.to_string(),
            source,
        }),
        Err(_) => Err(ServiceError::Timeout {
            service: service.to_string(),
            timeout: deadline,
        }),
    }
}
