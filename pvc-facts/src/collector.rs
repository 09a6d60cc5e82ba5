//! The periodic facts tick: gather host + libvirt state, write it and the
//! keepalive timestamp in one transaction.
//!
//! The tick needs to know the node's current memory/vCPU allocation, which is owned by
//! the VM registry rather than by this crate — `AllocationSource` is the seam so
//! `pvc-facts` never has to depend on `pvc-vm`/`pvc-registry`.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use pvc_store::{StoreClient, StoreError, TxnOp};
use pvc_types::keys::NodeKey;
use pvc_types::StaticNodeData;

use crate::error::FactsResult;
use crate::libvirt::LibvirtFacts;
use crate::static_facts;

/// Declared memory/vCPU allocation for domains this node owns and lists as running.
/// Implemented by whatever holds the Domain registry (`pvc-vm`/`pvc-registry`).
pub trait AllocationSource: Send + Sync {
    fn allocation_totals(&self) -> (u64, u32);
}

pub struct FactsCollector {
    node_name: String,
    static_data: StaticNodeData,
}

impl FactsCollector {
    pub fn new(node_name: impl Into<String>) -> FactsResult<Self> {
        let static_data = static_facts::collect()
            .map_err(|e| crate::error::FactsError::Query(e.to_string()))?;
        Ok(FactsCollector {
            node_name: node_name.into(),
            static_data,
        })
    }

    pub fn static_data(&self) -> &StaticNodeData {
        &self.static_data
    }

    /// Runs one tick: samples the host and libvirt, then commits everything plus
    /// `keepalive` in a single transaction. A version conflict is logged and the tick
    /// is simply skipped rather than retried out-of-band.
    pub fn tick(
        &self,
        store: &dyn StoreClient,
        alloc: &dyn AllocationSource,
    ) -> FactsResult<()> {
        let meminfo = proxmox_sys::linux::procfs::read_meminfo()
            .map_err(|e| crate::error::FactsError::Proc("meminfo", e.to_string()))?;
        let loadavg = proxmox_sys::linux::procfs::read_loadavg()
            .map_err(|e| crate::error::FactsError::Proc("loadavg", e.to_string()))?;

        let libvirt = LibvirtFacts::connect()?;
        let domains = libvirt.active_domains()?;
        let running_domains: Vec<String> = domains.iter().map(|d| d.uuid.clone()).collect();

        let (memalloc, vcpualloc) = alloc.allocation_totals();

        let memused_mib = meminfo.memused / 1024 / 1024;
        let memfree_mib = meminfo.memfree / 1024 / 1024;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let ops = vec![
            TxnOp::write(NodeKey::memused(&self.node_name), memused_mib.to_string()),
            TxnOp::write(NodeKey::memfree(&self.node_name), memfree_mib.to_string()),
            TxnOp::write(NodeKey::memalloc(&self.node_name), memalloc.to_string()),
            TxnOp::write(NodeKey::vcpualloc(&self.node_name), vcpualloc.to_string()),
            TxnOp::write(NodeKey::cpuload(&self.node_name), loadavg.one().to_string()),
            TxnOp::write(
                NodeKey::running_domains(&self.node_name),
                running_domains.join(" "),
            ),
            TxnOp::write(
                NodeKey::domains_count(&self.node_name),
                domains.len().to_string(),
            ),
            TxnOp::write(NodeKey::keepalive(&self.node_name), now.to_string()),
        ];

        match store.write_txn(ops) {
            Ok(()) => {
                debug!(
                    "facts tick for {}: {} domains, {} MiB free, load {:.2}",
                    self.node_name,
                    domains.len(),
                    memfree_mib,
                    loadavg.one()
                );
                Ok(())
            }
            Err(StoreError::Conflict(key)) => {
                warn!("facts tick skipped: version conflict on {}", key);
                Ok(())
            }
            Err(err) => Err(crate::error::FactsError::Query(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAllocation(u64, u32);

    impl AllocationSource for FixedAllocation {
        fn allocation_totals(&self) -> (u64, u32) {
            (self.0, self.1)
        }
    }

    #[test]
    fn allocation_source_returns_configured_totals() {
        let source = FixedAllocation(4096, 8);
        assert_eq!(source.allocation_totals(), (4096, 8));
    }
}
