use serde::{Deserialize, Serialize};

use crate::enums::{DaemonMode, DaemonState, NodeDomainState, RouterState};

/// Static, once-collected facts about a node's hardware (the `static_data` field).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticNodeData {
    pub cpu_count: u32,
    pub kernel: String,
    pub os: String,
    pub arch: String,
}

/// A snapshot of a `/nodes/<name>` entity as reconstructed from the store.
///
/// Fields default to conservative values when absent so that a freshly-constructed
/// `NodeObject` (before its watches have fired once) behaves like a node nobody should
/// route work to yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    pub daemon_mode: DaemonMode,
    pub daemon_state: DaemonState,
    pub router_state: RouterState,
    pub domain_state: NodeDomainState,
    pub memfree: u64,
    pub memused: u64,
    pub memalloc: u64,
    pub vcpualloc: u32,
    pub cpuload: f64,
    pub running_domains: Vec<String>,
    pub domains_count: u32,
    pub keepalive: u64,
    pub ipmi_hostname: Option<String>,
    pub ipmi_username: Option<String>,
    pub ipmi_password: Option<String>,
    pub static_data: Option<StaticNodeData>,
}

impl NodeSnapshot {
    /// A node that has never reported in: unreachable for scheduling, not alive.
    pub fn unknown(name: impl Into<String>) -> Self {
        NodeSnapshot {
            name: name.into(),
            daemon_mode: DaemonMode::Hypervisor,
            daemon_state: DaemonState::Stop,
            router_state: RouterState::Client,
            domain_state: NodeDomainState::Ready,
            memfree: 0,
            memused: 0,
            memalloc: 0,
            vcpualloc: 0,
            cpuload: 0.0,
            running_domains: Vec::new(),
            domains_count: 0,
            keepalive: 0,
            ipmi_hostname: None,
            ipmi_username: None,
            ipmi_password: None,
            static_data: None,
        }
    }

    /// Free-after-allocation, the tie-break quantity for the `mem` target selector:
    /// `(memused + memfree) - memalloc`.
    pub fn alloc_free(&self) -> i64 {
        (self.memused as i64 + self.memfree as i64) - self.memalloc as i64
    }

    /// Whether this node currently satisfies the primary-eligibility predicate
    /// (maintenance is evaluated by the caller, since it is cluster-wide rather than
    /// per-node state).
    pub fn coordinator_eligible(&self) -> bool {
        self.daemon_mode == DaemonMode::Coordinator && self.daemon_state == DaemonState::Run
    }

    /// Whether the node is a schedulable migration/start target: `daemon_state = run`
    /// and `domain_state = ready`.
    pub fn is_schedulable(&self) -> bool {
        self.daemon_state == DaemonState::Run && self.domain_state == NodeDomainState::Ready
    }
}

/// One libvirt domain observed during a facts tick, before it is matched up against
/// the corresponding `/domains/<uuid>` registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDomain {
    pub uuid: String,
    pub memory_mib: u64,
    pub vcpus: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_matches_spec_formula() {
        let mut n = NodeSnapshot::unknown("hv1");
        n.memused = 1000;
        n.memfree = 500;
        n.memalloc = 800;
        assert_eq!(n.alloc_free(), 700);
    }

    #[test]
    fn unknown_node_is_not_schedulable() {
        let n = NodeSnapshot::unknown("hv1");
        assert!(!n.is_schedulable());
        assert!(!n.coordinator_eligible());
    }
}
