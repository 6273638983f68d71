//! Blob storage with graceful degradation.
//!
//! # Data Flow
//! ```text
//! store(key, bytes):
//!     PrimaryRemote → ObjectStore::put (breaker + write timeout)
//!         error → demote (sticky) → local.rs (same payload)
//!     LocalFallback → local.rs (temp file + rename)
//!     MemoryOnly → memory.rs
//! ```

pub mod local;
pub mod memory;
pub mod router;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use router::{FallbackStorageRouter, StorageMode, StoreReceipt};
