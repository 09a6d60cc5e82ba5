//! Prometheus text-exposition rendering for the (out-of-scope) API layer to serve.
//! §6 is explicit that "the exact metric names and label shapes are part of the API
//! surface"; this implements the trait and the rendering, not an HTTP listener.

use std::sync::Arc;

use pvc_network::NetworkObject;
use pvc_registry::Registry;
use pvc_vm::DomainObject;

/// Anything that can render itself as a block of Prometheus text-exposition lines.
pub trait MetricsSource: Send + Sync {
    fn render_prometheus(&self) -> String;
}

/// The metrics this node can answer for from state it already tracks: domain/network
/// counts and per-domain desired state. Cluster-wide node health and OSD state are out
/// of reach here (no Node registry member or storage engine in this crate's scope) and
/// are left to whatever aggregates across nodes at the API layer.
pub struct ClusterMetrics {
    node_name: String,
    networks: Arc<Registry<NetworkObject>>,
    domains: Arc<Registry<DomainObject>>,
}

impl ClusterMetrics {
    pub fn new(node_name: String, networks: Arc<Registry<NetworkObject>>, domains: Arc<Registry<DomainObject>>) -> Self {
        ClusterMetrics { node_name, networks, domains }
    }
}

impl MetricsSource for ClusterMetrics {
    fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP pvc_domain_count Number of VM domains tracked on this node.\n");
        out.push_str("# TYPE pvc_domain_count gauge\n");
        out.push_str(&format!("pvc_domain_count{{node=\"{}\"}} {}\n", self.node_name, self.domains.len()));

        out.push_str("# HELP pvc_network_count Number of networks tracked on this node.\n");
        out.push_str("# TYPE pvc_network_count gauge\n");
        out.push_str(&format!("pvc_network_count{{node=\"{}\"}} {}\n", self.node_name, self.networks.len()));

        out.push_str("# HELP pvc_domain_state Desired state of a tracked VM domain (always 1).\n");
        out.push_str("# TYPE pvc_domain_state gauge\n");
        for uuid in self.domains.identities() {
            if let Some(domain) = self.domains.get(&uuid) {
                let snapshot = domain.snapshot();
                out.push_str(&format!(
                    "pvc_domain_state{{node=\"{}\",uuid=\"{}\",name=\"{}\",state=\"{}\"}} 1\n",
                    self.node_name, snapshot.uuid, snapshot.name, snapshot.state
                ));
            }
        }

        out
    }
}
