//! Per-network VXLAN+bridge+nftables lifecycle, with primary-only gateway/DHCP
//! addenda. Grounded file-for-file on `node-daemon/pvcd/VXNetworkInstance.py`.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use log::{info, warn};

use pvc_registry::RegistryMember;
use pvc_store::StoreClient;
use pvc_types::NetworkSnapshot;

use crate::managed_child::ManagedChild;
use crate::os_command::{run, run_best_effort};
use crate::snapshot_io;

/// Renders the base nftables ruleset for one network: counter chains for ingress and
/// egress, a forward jump keyed on the network's subnet, and the narrow set of host
/// services (ICMP, DNS, DHCP) allowed in from the bridge before everything else is
/// dropped.
fn render_firewall_rules(vxlan_nic: &str, bridge_nic: &str, ip4_network: Option<&str>) -> String {
    let net = ip4_network.unwrap_or("0.0.0.0/32");
    format!(
        "# Rules for network {vxlan_nic}\n\
         add chain inet filter {vxlan_nic}-in\n\
         add chain inet filter {vxlan_nic}-out\n\
         add rule inet filter {vxlan_nic}-in counter\n\
         add rule inet filter {vxlan_nic}-out counter\n\
         add rule inet filter forward ip daddr {net} counter jump {vxlan_nic}-in\n\
         add rule inet filter forward ip saddr {net} counter jump {vxlan_nic}-out\n\
         add rule inet filter input ip protocol icmp meta iifname {bridge_nic} counter accept\n\
         add rule inet filter input tcp dport 53 meta iifname {bridge_nic} counter accept\n\
         add rule inet filter input udp dport 53 meta iifname {bridge_nic} counter accept\n\
         add rule inet filter input udp dport 67 meta iifname {bridge_nic} counter accept\n\
         add rule inet filter input meta iifname {bridge_nic} counter drop\n"
    )
}

/// Whether a snapshot change affects anything dnsmasq reads at startup, so a running
/// server needs a restart rather than just a reservation-file HUP.
fn dhcp_relevant_change(old: &NetworkSnapshot, new: &NetworkSnapshot) -> bool {
    old.dhcp4_flag != new.dhcp4_flag
        || old.dhcp4_start != new.dhcp4_start
        || old.dhcp4_end != new.dhcp4_end
        || old.domain != new.domain
}

/// Process-wide settings read from the daemon config at startup. Set once via
/// [`init`], read by every `NetworkObject`.
#[derive(Debug, Clone)]
pub struct NetworkRuntimeConfig {
    pub vni_dev: String,
    pub dnsmasq_dynamic_directory: PathBuf,
    pub dnsmasq_log_directory: PathBuf,
    pub nft_dynamic_directory: PathBuf,
}

static RUNTIME_CONFIG: OnceLock<NetworkRuntimeConfig> = OnceLock::new();

pub fn init(config: NetworkRuntimeConfig) {
    let _ = RUNTIME_CONFIG.set(config);
}

fn config() -> &'static NetworkRuntimeConfig {
    RUNTIME_CONFIG
        .get()
        .expect("pvc_network::init must run before any NetworkObject is constructed")
}

struct Inner {
    snapshot: NetworkSnapshot,
    is_primary: bool,
    dhcp_server: Option<ManagedChild>,
}

pub struct NetworkObject {
    vni: u32,
    store: Arc<dyn StoreClient>,
    inner: Arc<Mutex<Inner>>,
}

impl NetworkObject {
    fn nftables_netconf_path(&self) -> PathBuf {
        config()
            .nft_dynamic_directory
            .join("networks")
            .join(format!("{}.nft", self.vni))
    }

    fn hostsdir(&self) -> PathBuf {
        config().dnsmasq_dynamic_directory.join(self.vni.to_string())
    }

    fn user_rules_path(&self) -> PathBuf {
        config()
            .nft_dynamic_directory
            .join("networks")
            .join(format!("{}-user.nft", self.vni))
    }

    /// Step 1-2: VXLAN device + bridge.
    fn create_network(&self, snapshot: &NetworkSnapshot) {
        info!(
            "VNI {}: creating VXLAN device on {}",
            self.vni,
            config().vni_dev
        );
        let vxlan_nic = snapshot.vxlan_nic();
        let bridge_nic = snapshot.bridge_nic();
        let vni_str = self.vni.to_string();

        let _ = run(
            "create vxlan device",
            "ip",
            &[
                "link", "add", &vxlan_nic, "type", "vxlan", "id", &vni_str, "dstport", "4789",
                "dev", &config().vni_dev,
            ],
        )
        .map_err(|e| warn!("{}", e));
        let _ = run("create bridge", "brctl", &["addbr", &bridge_nic]).map_err(|e| warn!("{}", e));
        let _ = run(
            "attach vxlan to bridge",
            "brctl",
            &["addif", &bridge_nic, &vxlan_nic],
        )
        .map_err(|e| warn!("{}", e));
        let _ = run("bring up vxlan", "ip", &["link", "set", &vxlan_nic, "up"])
            .map_err(|e| warn!("{}", e));
        let _ = run("bring up bridge", "ip", &["link", "set", &bridge_nic, "up"])
            .map_err(|e| warn!("{}", e));
    }

    /// Step 3: nftables chains scoped to this VNI.
    fn create_firewall(&self, snapshot: &NetworkSnapshot) {
        let rules = render_firewall_rules(&snapshot.vxlan_nic(), &snapshot.bridge_nic(), snapshot.ip4_network.as_deref());

        if let Some(parent) = self.nftables_netconf_path().parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(self.nftables_netconf_path(), rules) {
            warn!("VNI {}: failed to write nftables rules: {}", self.vni, err);
            return;
        }
        let _ = run(
            "apply nftables rules",
            "nft",
            &["-f", &self.nftables_netconf_path().to_string_lossy()],
        )
        .map_err(|e| warn!("{}", e));
    }

    fn remove_network(&self, snapshot: &NetworkSnapshot) {
        let vxlan_nic = snapshot.vxlan_nic();
        let bridge_nic = snapshot.bridge_nic();
        run_best_effort("bring down bridge", "ip", &["link", "set", &bridge_nic, "down"]);
        run_best_effort("bring down vxlan", "ip", &["link", "set", &vxlan_nic, "down"]);
        run_best_effort("detach vxlan", "brctl", &["delif", &bridge_nic, &vxlan_nic]);
        run_best_effort("delete bridge", "brctl", &["delbr", &bridge_nic]);
        run_best_effort("delete vxlan", "ip", &["link", "delete", &vxlan_nic]);
    }

    fn remove_firewall(&self) {
        let _ = fs::remove_file(self.nftables_netconf_path());
    }

    /// Step 5: gateway address, primary-only.
    fn create_gateway_address(&self, snapshot: &NetworkSnapshot) {
        let Some(gateway) = snapshot.ip4_gateway.as_deref() else {
            return;
        };
        let cidr = snapshot
            .ip4_network
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .unwrap_or("32");
        let bridge_nic = snapshot.bridge_nic();
        let addr = format!("{}/{}", gateway, cidr);
        info!("VNI {}: assigning gateway {} on {}", self.vni, addr, bridge_nic);
        let _ = run("assign gateway address", "ip", &["address", "add", &addr, "dev", &bridge_nic])
            .map_err(|e| warn!("{}", e));
        run_best_effort(
            "gratuitous ARP",
            "arping",
            &["-A", "-c2", "-I", &bridge_nic, gateway],
        );
    }

    fn remove_gateway_address(&self, snapshot: &NetworkSnapshot) {
        let Some(gateway) = snapshot.ip4_gateway.as_deref() else {
            return;
        };
        let cidr = snapshot
            .ip4_network
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .unwrap_or("32");
        let bridge_nic = snapshot.bridge_nic();
        let addr = format!("{}/{}", gateway, cidr);
        run_best_effort("remove gateway address", "ip", &["address", "delete", &addr, "dev", &bridge_nic]);
    }

    /// Step 6: start dnsmasq bound to the gateway, primary-only.
    fn start_dhcp_server(&self, snapshot: &NetworkSnapshot, inner: &mut Inner) {
        if !snapshot.dhcp4_flag || inner.dhcp_server.is_some() {
            return;
        }
        let Some(gateway) = snapshot.ip4_gateway.clone() else {
            return;
        };
        let (Some(start), Some(end)) = (snapshot.dhcp4_start.clone(), snapshot.dhcp4_end.clone())
        else {
            return;
        };
        let domain = snapshot.domain.clone().unwrap_or_default();
        let hostsdir = self.hostsdir();
        let _ = fs::create_dir_all(&hostsdir);

        let args = vec![
            "--domain-needed".to_string(),
            "--bogus-priv".to_string(),
            "--no-hosts".to_string(),
            "--filterwin2k".to_string(),
            "--expand-hosts".to_string(),
            format!("--domain={}", domain),
            format!("--local=/{}/", domain),
            format!("--auth-zone={}", domain),
            format!("--auth-peer=127.0.0.1,{}", gateway),
            format!("--auth-sec-servers=127.0.0.1,[::1],{}", gateway),
            "--auth-soa=1,pvc@localhost,10,10".to_string(),
            format!("--listen-address={}", gateway),
            "--bind-interfaces".to_string(),
            "--leasefile-ro".to_string(),
            format!("--dhcp-range={},{},48h", start, end),
            format!("--dhcp-hostsdir={}", hostsdir.display()),
            "--dhcp-script=/usr/libexec/pvc/dnsmasq-leases-hook".to_string(),
            "--log-facility=-".to_string(),
            "--keep-in-foreground".to_string(),
        ];

        let log_path = config()
            .dnsmasq_log_directory
            .join(format!("dnsmasq-{}.log", self.vni));
        match ManagedChild::spawn(
            &format!("dnsmasq-{}", self.vni),
            "/usr/sbin/dnsmasq",
            &args,
            &log_path,
        ) {
            Ok(child) => {
                info!("VNI {}: started dnsmasq DHCP server", self.vni);
                inner.dhcp_server = Some(child);
            }
            Err(err) => warn!("VNI {}: failed to start dnsmasq: {}", self.vni, err),
        }
    }

    fn stop_dhcp_server(&self, inner: &mut Inner) {
        if let Some(child) = inner.dhcp_server.take() {
            info!("VNI {}: stopping dnsmasq DHCP server", self.vni);
            let _ = child.stop();
        }
    }

    /// Called by the Primary Role Controller on every router-state transition.
    pub fn set_primary(&self, is_primary: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_primary == is_primary {
            return;
        }
        let snapshot = inner.snapshot.clone();
        if is_primary {
            self.create_gateway_address(&snapshot);
            self.start_dhcp_server(&snapshot, &mut inner);
        } else {
            self.stop_dhcp_server(&mut inner);
            self.remove_gateway_address(&snapshot);
        }
        inner.is_primary = is_primary;
    }

    /// Applies an updated snapshot, doing the minimal teardown/bringup implied by
    /// which fields actually changed.
    pub fn reconfigure(&self, new_snapshot: NetworkSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        let old = inner.snapshot.clone();

        if old.ip4_gateway != new_snapshot.ip4_gateway && inner.is_primary {
            self.remove_gateway_address(&old);
            self.create_gateway_address(&new_snapshot);
        }

        if dhcp_relevant_change(&old, &new_snapshot) && inner.is_primary {
            self.stop_dhcp_server(&mut inner);
            self.start_dhcp_server(&new_snapshot, &mut inner);
        }

        inner.snapshot = new_snapshot;
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    /// Step 7: render `/dhcp_reservations` children into the dnsmasq hostsdir and HUP
    /// dnsmasq to pick them up. Subscribed once at construction; each delivery
    /// re-renders from the full current child list rather than diffing, since the
    /// reservation set is small and idempotent to rewrite wholesale.
    fn subscribe_dhcp_reservations(&self) {
        let vni = self.vni;
        let hostsdir = self.hostsdir();
        let store = Arc::clone(&self.store);
        let inner = Arc::clone(&self.inner);
        let _ = self.store.watch_children(
            &pvc_types::keys::NetworkKey::dhcp_reservations(vni),
            Box::new(move |event| {
                for mac in &event.children {
                    if let Ok(Some(ip)) =
                        store.read_string(&pvc_types::keys::NetworkKey::dhcp_reservation(vni, mac))
                    {
                        let path = hostsdir.join(mac.replace(':', "-"));
                        let _ = fs::write(path, format!("{},{}\n", mac, ip));
                    }
                }
                if let Some(dhcp) = &inner.lock().unwrap().dhcp_server {
                    let _ = dhcp.reload();
                }
            }),
        );
    }

    /// Step 4: render additional user-supplied `/firewall_rules` children into their
    /// own nft file and re-apply it. Kept separate from the base ruleset file so a
    /// malformed user rule can't take down the network's own forward/drop chain.
    fn subscribe_firewall_rules(&self) {
        let vni = self.vni;
        let user_rules_path = self.user_rules_path();
        let vxlan_nic = self.snapshot().vxlan_nic();
        let store = Arc::clone(&self.store);
        let _ = self.store.watch_children(
            &pvc_types::keys::NetworkKey::firewall_rules(vni),
            Box::new(move |event| {
                let mut rendered = format!("# User rules for network {vxlan_nic}\n");
                for id in &event.children {
                    if let Ok(Some(rule)) =
                        store.read_string(&pvc_types::keys::NetworkKey::firewall_rule(vni, id))
                    {
                        rendered.push_str(&rule);
                        rendered.push('\n');
                    }
                }
                if let Some(parent) = user_rules_path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if fs::write(&user_rules_path, rendered).is_ok() {
                    run_best_effort(
                        "apply user nftables rules",
                        "nft",
                        &["-f", &user_rules_path.to_string_lossy()],
                    );
                }
            }),
        );
    }
}

impl RegistryMember for NetworkObject {
    fn construct(identity: &str, store: Arc<dyn StoreClient>) -> Self {
        let vni: u32 = identity.parse().unwrap_or(0);
        let snapshot = match snapshot_io::load(store.as_ref(), vni) {
            Ok(s) => s,
            Err(err) => {
                warn!("VNI {}: failed to load snapshot, using defaults: {}", vni, err);
                NetworkSnapshot {
                    vni,
                    description: String::new(),
                    net_type: pvc_types::enums::NetworkType::Managed,
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
                }
            }
        };

        let object = NetworkObject {
            vni,
            store,
            inner: Arc::new(Mutex::new(Inner {
                snapshot: snapshot.clone(),
                is_primary: false,
                dhcp_server: None,
            })),
        };
        object.create_network(&snapshot);
        object.create_firewall(&snapshot);
        object.subscribe_dhcp_reservations();
        object.subscribe_firewall_rules();
        object
    }

    fn teardown(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_primary {
            self.stop_dhcp_server(&mut inner);
            self.remove_gateway_address(&inner.snapshot.clone());
        }
        self.remove_firewall();
        let _ = fs::remove_file(self.user_rules_path());
        self.remove_network(&inner.snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> NetworkSnapshot {
        NetworkSnapshot {
            vni: 1001,
            description: "test".to_string(),
            net_type: pvc_types::enums::NetworkType::Managed,
            mtu: None,
            domain: Some("test.local".to_string()),
            ip4_network: Some("10.0.1.0/24".to_string()),
            ip4_gateway: Some("10.0.1.1".to_string()),
            ip6_network: None,
            ip6_gateway: None,
            dhcp4_flag: true,
            dhcp4_start: Some("10.0.1.100".to_string()),
            dhcp4_end: Some("10.0.1.200".to_string()),
            name_servers: Vec::new(),
        }
    }

    #[test]
    fn render_firewall_rules_scopes_chains_to_the_vxlan_device() {
        let rules = render_firewall_rules("vxlan1001", "br1001", Some("10.0.1.0/24"));
        assert!(rules.contains("add chain inet filter vxlan1001-in"));
        assert!(rules.contains("add chain inet filter vxlan1001-out"));
        assert!(rules.contains("forward ip daddr 10.0.1.0/24 counter jump vxlan1001-in"));
        assert!(rules.contains("meta iifname br1001 counter drop"));
    }

    #[test]
    fn render_firewall_rules_falls_back_without_an_ip4_network() {
        let rules = render_firewall_rules("vxlan77", "br77", None);
        assert!(rules.contains("forward ip daddr 0.0.0.0/32 counter jump vxlan77-in"));
    }

    #[test]
    fn dhcp_relevant_change_ignores_unrelated_fields() {
        let old = sample_snapshot();
        let mut new = old.clone();
        new.description = "renamed".to_string();
        new.name_servers = vec!["1.1.1.1".to_string()];
        assert!(!dhcp_relevant_change(&old, &new));
    }

    #[test]
    fn dhcp_relevant_change_detects_range_change() {
        let old = sample_snapshot();
        let mut new = old.clone();
        new.dhcp4_end = Some("10.0.1.150".to_string());
        assert!(dhcp_relevant_change(&old, &new));
    }

    #[test]
    fn dhcp_relevant_change_detects_flag_flip() {
        let old = sample_snapshot();
        let mut new = old.clone();
        new.dhcp4_flag = false;
        assert!(dhcp_relevant_change(&old, &new));
    }
}
