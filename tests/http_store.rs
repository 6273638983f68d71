//! HTTP object store against a live mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::start_programmable_backend;
use service_resilience::adapters::HttpObjectStore;
use service_resilience::capability::ObjectStore;
use service_resilience::config::ServiceKind;
use service_resilience::registry::ServiceDescriptor;
use service_resilience::storage::{FallbackStorageRouter, StorageMode};
use service_resilience::{ServiceRegistry, ServiceStatus};

fn store(addr: std::net::SocketAddr) -> HttpObjectStore {
    HttpObjectStore::new("object-store", &format!("http://{addr}/bucket"), Duration::from_secs(1)).unwrap()
}

#[tokio::test]
async fn test_put_returns_object_url() {
    let addr = start_programmable_backend(|| async { (200, String::new()) }).await;
    let store = store(addr);

    let location = store.put("attachments/cv.pdf", b"%PDF-1.7").await.unwrap();
    assert_eq!(location, format!("http://{addr}/bucket/attachments/cv.pdf"));
    store.ping().await.unwrap();
}

#[tokio::test]
async fn test_missing_object_is_none() {
    let addr = start_programmable_backend(|| async { (404, "NoSuchKey".to_string()) }).await;
    assert!(store(addr).get("nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_returns_body() {
    let addr = start_programmable_backend(|| async { (200, "hello".to_string()) }).await;
    assert_eq!(store(addr).get("greeting.txt").await.unwrap().unwrap(), b"hello");
}

#[tokio::test]
async fn test_server_error_fails_ping_and_put() {
    let addr = start_programmable_backend(|| async { (503, "SlowDown".to_string()) }).await;
    let store = store(addr);
    assert!(store.ping().await.is_err());
    assert!(store.put("cv.pdf", b"data").await.is_err());
}

#[tokio::test]
async fn test_router_falls_back_to_disk_on_server_error() {
    let addr = start_programmable_backend(|| async { (500, String::new()) }).await;
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(ServiceDescriptor::new("object-store", ServiceKind::ObjectStorage).with_connection(true))
        .unwrap();
    let router = FallbackStorageRouter::new(
        Arc::clone(&registry),
        "object-store",
        Some(Arc::new(store(addr)) as Arc<dyn ObjectStore>),
        Some(dir.path().to_path_buf()),
    );

    let receipt = router.store("cv.pdf", b"data").await.unwrap();
    assert_eq!(receipt.mode, StorageMode::LocalFallback);
    assert!(receipt.secondary_error.unwrap().contains("500"));
    assert_eq!(registry.status("object-store"), Some(ServiceStatus::Fallback));
    assert_eq!(std::fs::read(dir.path().join("cv.pdf")).unwrap(), b"data");
}
