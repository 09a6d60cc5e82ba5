//! Keepalive & Fence Supervisor: peer liveness tracking, IPMI-based fencing,
//! migration/placement target selection, and per-node VM flush/unflush.
//!
//! Also home to the `NodeObject` `RegistryMember` — the `N` in `Coordinator<N, W, D>`
//! — since the flush/unflush worker it drives shares a single-outstanding-worker
//! slot with the fence task's own relocation path.

pub mod error;
pub mod fence;
pub mod ipmi;
pub mod node;
pub mod os_command;
pub mod relocate;
pub mod selector;
pub mod suicide;
pub mod supervisor;

pub use error::{FenceError, FenceResult};
pub use fence::FenceConfig;
pub use node::{NodeObject, NodeRuntimeConfig};
pub use suicide::{HardReboot, SuicideAction, SuicideWatch};
pub use supervisor::{FenceSupervisor, FenceSupervisorConfig};
