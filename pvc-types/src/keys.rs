//! Key schema for the cluster's hierarchical store.
//! Centralizing key construction here means every crate builds the same paths instead
//! of repeating `format!("/domains/{}/state", uuid)` at each call site.

/// Builds the `/nodes/<name>` key family.
pub struct NodeKey;

impl NodeKey {
    pub fn base(name: &str) -> String {
        format!("/nodes/{name}")
    }
    pub fn daemon_mode(name: &str) -> String {
        format!("/nodes/{name}/daemon_mode")
    }
    pub fn daemon_state(name: &str) -> String {
        format!("/nodes/{name}/daemon_state")
    }
    pub fn router_state(name: &str) -> String {
        format!("/nodes/{name}/router_state")
    }
    pub fn domain_state(name: &str) -> String {
        format!("/nodes/{name}/domain_state")
    }
    pub fn memfree(name: &str) -> String {
        format!("/nodes/{name}/memfree")
    }
    pub fn memused(name: &str) -> String {
        format!("/nodes/{name}/memused")
    }
    pub fn memalloc(name: &str) -> String {
        format!("/nodes/{name}/memalloc")
    }
    pub fn vcpualloc(name: &str) -> String {
        format!("/nodes/{name}/vcpualloc")
    }
    pub fn cpuload(name: &str) -> String {
        format!("/nodes/{name}/cpuload")
    }
    pub fn running_domains(name: &str) -> String {
        format!("/nodes/{name}/running_domains")
    }
    pub fn domains_count(name: &str) -> String {
        format!("/nodes/{name}/domains_count")
    }
    pub fn keepalive(name: &str) -> String {
        format!("/nodes/{name}/keepalive")
    }
    pub fn ipmi_hostname(name: &str) -> String {
        format!("/nodes/{name}/ipmi_hostname")
    }
    pub fn ipmi_username(name: &str) -> String {
        format!("/nodes/{name}/ipmi_username")
    }
    pub fn ipmi_password(name: &str) -> String {
        format!("/nodes/{name}/ipmi_password")
    }
    pub fn static_data(name: &str) -> String {
        format!("/nodes/{name}/static_data")
    }
}

/// Builds the `/domains/<uuid>` key family.
pub struct DomainKey;

impl DomainKey {
    pub fn base(uuid: &str) -> String {
        format!("/domains/{uuid}")
    }
    pub fn xml(uuid: &str) -> String {
        format!("/domains/{uuid}/xml")
    }
    pub fn state(uuid: &str) -> String {
        format!("/domains/{uuid}/state")
    }
    pub fn node(uuid: &str) -> String {
        format!("/domains/{uuid}/node")
    }
    pub fn lastnode(uuid: &str) -> String {
        format!("/domains/{uuid}/lastnode")
    }
    pub fn failed_reason(uuid: &str) -> String {
        format!("/domains/{uuid}/failed_reason")
    }
    pub fn node_limit(uuid: &str) -> String {
        format!("/domains/{uuid}/node_limit")
    }
    pub fn node_selector(uuid: &str) -> String {
        format!("/domains/{uuid}/node_selector")
    }
    pub fn node_autostart(uuid: &str) -> String {
        format!("/domains/{uuid}/node_autostart")
    }
    pub fn migration_method(uuid: &str) -> String {
        format!("/domains/{uuid}/migration_method")
    }
    pub fn tags(uuid: &str) -> String {
        format!("/domains/{uuid}/tags")
    }
}

/// Builds the `/networks/<vni>` key family.
pub struct NetworkKey;

impl NetworkKey {
    pub fn base(vni: u32) -> String {
        format!("/networks/{vni}")
    }
    pub fn description(vni: u32) -> String {
        format!("/networks/{vni}/description")
    }
    pub fn net_type(vni: u32) -> String {
        format!("/networks/{vni}/type")
    }
    pub fn mtu(vni: u32) -> String {
        format!("/networks/{vni}/mtu")
    }
    pub fn domain(vni: u32) -> String {
        format!("/networks/{vni}/domain")
    }
    pub fn ip4_network(vni: u32) -> String {
        format!("/networks/{vni}/ip4_network")
    }
    pub fn ip4_gateway(vni: u32) -> String {
        format!("/networks/{vni}/ip4_gateway")
    }
    pub fn ip6_network(vni: u32) -> String {
        format!("/networks/{vni}/ip6_network")
    }
    pub fn ip6_gateway(vni: u32) -> String {
        format!("/networks/{vni}/ip6_gateway")
    }
    pub fn dhcp4_flag(vni: u32) -> String {
        format!("/networks/{vni}/dhcp4_flag")
    }
    pub fn dhcp4_start(vni: u32) -> String {
        format!("/networks/{vni}/dhcp4_start")
    }
    pub fn dhcp4_end(vni: u32) -> String {
        format!("/networks/{vni}/dhcp4_end")
    }
    pub fn name_servers(vni: u32) -> String {
        format!("/networks/{vni}/name_servers")
    }
    pub fn dhcp_reservations(vni: u32) -> String {
        format!("/networks/{vni}/dhcp_reservations")
    }
    pub fn dhcp_reservation(vni: u32, mac: &str) -> String {
        format!("/networks/{vni}/dhcp_reservations/{mac}")
    }
    pub fn dhcp_leases(vni: u32) -> String {
        format!("/networks/{vni}/dhcp_leases")
    }
    pub fn dhcp_lease(vni: u32, mac: &str) -> String {
        format!("/networks/{vni}/dhcp_leases/{mac}")
    }
    pub fn firewall_rules(vni: u32) -> String {
        format!("/networks/{vni}/firewall_rules")
    }
    pub fn firewall_rule(vni: u32, id: &str) -> String {
        format!("/networks/{vni}/firewall_rules/{id}")
    }
}

/// Cluster singleton keys, not scoped under any entity.
pub const PRIMARY_NODE: &str = "/primary_node";
pub const MAINTENANCE: &str = "/config/maintenance";
pub const UPSTREAM_IP: &str = "/config/upstream_ip";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_keys_match_schema() {
        assert_eq!(NodeKey::daemon_state("hv1"), "/nodes/hv1/daemon_state");
        assert_eq!(NodeKey::running_domains("hv1"), "/nodes/hv1/running_domains");
    }

    #[test]
    fn domain_keys_match_schema() {
        assert_eq!(DomainKey::state("abc"), "/domains/abc/state");
        assert_eq!(DomainKey::node_limit("abc"), "/domains/abc/node_limit");
    }

    #[test]
    fn network_keys_match_schema() {
        assert_eq!(NetworkKey::base(1001), "/networks/1001");
        assert_eq!(
            NetworkKey::dhcp_reservation(1001, "aa:bb:cc:dd:ee:ff"),
            "/networks/1001/dhcp_reservations/aa:bb:cc:dd:ee:ff"
        );
        assert_eq!(
            NetworkKey::dhcp_lease(1001, "aa:bb:cc:dd:ee:ff"),
            "/networks/1001/dhcp_leases/aa:bb:cc:dd:ee:ff"
        );
    }
}
