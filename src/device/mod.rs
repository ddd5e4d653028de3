//! Device adapter interface.
//!
//! Platform adapters (NETCONF templates per switch model) live outside this
//! crate and are consumed through [`DeviceAdapter`] and [`DeviceSession`].
//! [`SimulatedFabric`] implements the same interface in memory.

pub mod adapter;
pub mod operations;
pub mod simulated;

// Re-export commonly used types
pub use adapter::{Credentials, DeviceAdapter, DeviceSession};
pub use operations::{
    BgpNeighbor, ClusterBinding, ClusterState, DeviceOperation, DeviceResponse, ManagementClusterMember,
    ManagementClusterStatus, NonClosRouterBgp, Redistribute, RouterBgp,
};
pub use simulated::{SimulatedFabric, SimulatedSwitch, SwitchSeed};

/// Errors raised by adapters
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("login to {host} failed: {reason}")]
    Login { host: String, reason: String },
    #[error("{operation} failed: {reason}")]
    Rejected { operation: &'static str, reason: String },
    #[error("{operation} returned an unexpected response {response}")]
    UnexpectedResponse { operation: &'static str, response: String },
}
