//! VM Manager: the per-domain libvirt state machine, action selection, migration, and
//! the RBD lock-flush prerequisite for force-starting a VM after its owner was fenced.

pub mod actions;
pub mod busy;
pub mod domain;
pub mod error;
pub mod libvirt_conn;
pub mod migration;
pub mod rbd;
pub mod snapshot_io;

pub use domain::{init, DomainObject, VmRuntimeConfig};
pub use error::{VmError, VmResult};

use std::sync::Arc;

use pvc_facts::AllocationSource;
use pvc_registry::Registry;

/// Sums the declared memory/vCPU allocation across every tracked domain, satisfying
/// `pvc_facts::AllocationSource` without `pvc-facts` needing to depend on `pvc-vm`.
impl AllocationSource for Registry<DomainObject> {
    fn allocation_totals(&self) -> (u64, u32) {
        self.values().iter().map(|d| d.declared_allocation()).fold(
            (0u64, 0u32),
            |(mem_acc, vcpu_acc), (mem, vcpu)| (mem_acc + mem, vcpu_acc + vcpu),
        )
    }
}

/// Convenience alias for the type most callers want: an `Arc<Registry<DomainObject>>`
/// that is also a `pvc_facts::AllocationSource`.
pub type DomainRegistry = Arc<Registry<DomainObject>>;
