//! Object Registries: tracks the cluster's declared Nodes, Networks, and
//! Domains as child-watch-driven collections of local objects, and the `Coordinator`
//! that owns all three so components reference it instead of each other.

pub mod coordinator;
pub mod registry;

pub use coordinator::Coordinator;
pub use registry::{Registry, RegistryMember};
