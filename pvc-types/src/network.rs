use crate::enums::NetworkType;

/// A snapshot of a `/networks/<vni>` entity as reconstructed from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnapshot {
    pub vni: u32,
    pub description: String,
    pub net_type: NetworkType,
    pub mtu: Option<u32>,
    pub domain: Option<String>,
    pub ip4_network: Option<String>,
    pub ip4_gateway: Option<String>,
    pub ip6_network: Option<String>,
    pub ip6_gateway: Option<String>,
    pub dhcp4_flag: bool,
    pub dhcp4_start: Option<String>,
    pub dhcp4_end: Option<String>,
    pub name_servers: Vec<String>,
}

impl NetworkSnapshot {
    pub fn vxlan_nic(&self) -> String {
        format!("vxlan{}", self.vni)
    }

    pub fn bridge_nic(&self) -> String {
        format!("br{}", self.vni)
    }

    pub fn is_managed(&self) -> bool {
        self.net_type == NetworkType::Managed
    }
}

/// A single DHCP reservation, `/networks/<vni>/dhcp_reservations/<mac>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpReservation {
    pub mac: String,
    pub ip4_address: String,
    pub hostname: Option<String>,
}

/// A single firewall rule, `/networks/<vni>/firewall_rules/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub id: String,
    pub rule: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_follow_vni() {
        let n = NetworkSnapshot {
            vni: 1001,
            description: String::new(),
            net_type: NetworkType::Managed,
            mtu: None,
            domain: None,
            ip4_network: None,
            ip4_gateway: None,
            ip6_network: None,
            ip6_gateway: None,
            dhcp4_flag: false,
            dhcp4_start: None,
            dhcp4_end: None,
            name_servers: Vec::new(),
        };
        assert_eq!(n.vxlan_nic(), "vxlan1001");
        assert_eq!(n.bridge_nic(), "br1001");
        assert!(n.is_managed());
    }
}
