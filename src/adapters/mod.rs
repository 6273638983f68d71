//! Capability adapters.
//!
//! Driver-agnostic implementations of the capability traits, enough to run
//! the layer against real endpoints. Product code plugs in its own.

pub mod factory;
pub mod http_store;
pub mod tcp;

pub use factory::build_clients;
pub use http_store::HttpObjectStore;
pub use tcp::{default_port, TcpEndpoint};
