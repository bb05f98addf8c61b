//! Worker node networking
//!
//! # Architecture
//!
//! parquad uses a coordinator-node architecture:
//!
//! - **Coordinator**: the `run` mode process; discovers nodes, partitions the
//!   domain and dispatches one task per partition
//! - **Node Service**: the `service` mode process; advertises a capacity and
//!   integrates the partitions it is sent on a local thread pool
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `node_service`: Node service implementation

pub mod node_service;
pub mod protocol;

// Re-export key types
pub use protocol::{Message, PROTOCOL_VERSION};

pub use node_service::NodeService;

/// Host identifier used in handshakes and logs
pub fn node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
