//! Libvirt domain enumeration for the facts tick.
//!
//! Grounded on `node-daemon/pvcd/NodeInstance.py`'s `update_zookeeper`: open
//! `qemu:///system`, list active domains, and fold each one's declared memory/vCPUs
//! into the node's `memalloc`/`vcpualloc` totals.

use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys::{
    VIR_CONNECT_LIST_DOMAINS_ACTIVE, VIR_DOMAIN_BLOCKED, VIR_DOMAIN_PAUSED, VIR_DOMAIN_RUNNING,
};

use pvc_types::node::ObservedDomain;

use crate::error::{FactsError, FactsResult};

const LIBVIRT_URI: &str = "qemu:///system";

/// Opens (and closes on drop) a connection to the local libvirt daemon.
pub struct LibvirtFacts {
    conn: Connect,
}

impl LibvirtFacts {
    pub fn connect() -> FactsResult<Self> {
        let conn = Connect::open(LIBVIRT_URI).map_err(|e| FactsError::Connect(e.to_string()))?;
        Ok(LibvirtFacts { conn })
    }

    /// Domains currently in `RUNNING`, `BLOCKED`, or `PAUSED` state — the set the
    /// node counts itself as hosting.
    pub fn active_domains(&self) -> FactsResult<Vec<ObservedDomain>> {
        let domains = self
            .conn
            .list_all_domains(VIR_CONNECT_LIST_DOMAINS_ACTIVE)
            .map_err(|e| FactsError::Query(e.to_string()))?;

        let mut observed = Vec::with_capacity(domains.len());
        for domain in &domains {
            if let Some(entry) = describe(domain)? {
                observed.push(entry);
            }
        }
        Ok(observed)
    }
}

impl Drop for LibvirtFacts {
    fn drop(&mut self) {
        let _ = self.conn.close();
    }
}

fn describe(domain: &Domain) -> FactsResult<Option<ObservedDomain>> {
    let (state, _reason) = domain
        .get_state()
        .map_err(|e| FactsError::Query(e.to_string()))?;

    if !matches!(
        state,
        VIR_DOMAIN_RUNNING | VIR_DOMAIN_BLOCKED | VIR_DOMAIN_PAUSED
    ) {
        return Ok(None);
    }

    let uuid = domain
        .get_uuid_string()
        .map_err(|e| FactsError::Query(e.to_string()))?;
    // libvirt reports in KiB; the store's memalloc field is MiB, matching memused/memfree.
    let memory_mib = domain
        .get_max_memory()
        .map_err(|e| FactsError::Query(e.to_string()))?
        / 1024;
    let vcpus = domain
        .get_max_vcpus()
        .map_err(|e| FactsError::Query(e.to_string()))?;

    Ok(Some(ObservedDomain {
        uuid,
        memory_mib,
        vcpus,
    }))
}
