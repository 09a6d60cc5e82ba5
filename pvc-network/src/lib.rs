//! Network Manager: brings up the VXLAN device, bridge, and nftables chains for each
//! declared network, and layers on primary-only gateway address and DHCP/DNS service
//! management driven by the store.

pub mod error;
pub mod managed_child;
pub mod network;
pub mod os_command;
pub mod snapshot_io;

pub use error::{NetworkError, NetworkResult};
pub use managed_child::ManagedChild;
pub use network::{init, NetworkObject, NetworkRuntimeConfig};
