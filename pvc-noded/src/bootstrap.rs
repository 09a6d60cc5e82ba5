//! One-time startup preparation, ported from `Daemon.py`'s phases 1d and 5: kernel
//! sysctls for VXLAN routing, and registering this node's `/nodes/<name>` entry in
//! the store if it has never checked in before.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use log::info;

use pvc_config::Config;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::{DaemonMode, DaemonState, NodeDomainState, RouterState};
use pvc_types::keys::{NodeKey, PRIMARY_NODE};
use pvc_types::StaticNodeData;

use crate::os_command;

/// IPv4/IPv6 forwarding and redirect/source-route acceptance for the VXLAN underlay,
/// plus disabling strict reverse-path filtering on the VNI device so asymmetric
/// VXLAN routing doesn't get dropped.
pub fn apply_sysctls(vni_dev: &str) -> Result<()> {
    info!("applying network sysctls for VXLAN routing");
    let settings = [
        "net.ipv4.ip_forward=1".to_string(),
        "net.ipv6.conf.all.forwarding=1".to_string(),
        "net.ipv4.conf.all.send_redirects=1".to_string(),
        "net.ipv4.conf.default.send_redirects=1".to_string(),
        "net.ipv6.conf.all.send_redirects=1".to_string(),
        "net.ipv6.conf.default.send_redirects=1".to_string(),
        "net.ipv4.conf.all.accept_source_route=1".to_string(),
        "net.ipv4.conf.default.accept_source_route=1".to_string(),
        "net.ipv6.conf.all.accept_source_route=1".to_string(),
        "net.ipv6.conf.default.accept_source_route=1".to_string(),
        format!("net.ipv4.conf.{vni_dev}.rp_filter=0"),
        format!("net.ipv6.conf.{vni_dev}.rp_filter=0"),
    ];
    for setting in &settings {
        os_command::run("sysctl", "sysctl", &["-w", setting])?;
    }
    Ok(())
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn gather_static_data() -> StaticNodeData {
    pvc_facts::static_facts::collect().unwrap_or(StaticNodeData {
        cpu_count: 0,
        kernel: String::new(),
        os: String::new(),
        arch: String::new(),
    })
}

/// Creates `/nodes/<name>` with its full field set if this is the node's first-ever
/// check-in, or just refreshes `daemon_state`/`static_data` if it already exists.
/// Mirrors `Daemon.py`'s phase 5 exactly, including the "coordinator vs hypervisor"
/// `daemon_mode` coming from config rather than being guessed at runtime.
pub fn ensure_node_registered(store: &dyn StoreClient, name: &str, config: &Config) -> Result<()> {
    let static_data = gather_static_data();
    let static_json = serde_json::to_string(&static_data)?;

    if store.read(&NodeKey::base(name))?.is_some() {
        info!("node {} already present in the store", name);
        store.write_txn(vec![
            TxnOp::write(NodeKey::daemon_state(name), DaemonState::Init.as_str()),
            TxnOp::write(NodeKey::static_data(name), static_json),
        ])?;
        return Ok(());
    }

    info!("node {} absent from the store; registering", name);
    let daemon_mode = if config.coordinator_list().contains(&name) {
        DaemonMode::Coordinator
    } else {
        DaemonMode::Hypervisor
    };

    store.write_txn(vec![
        TxnOp::create(NodeKey::base(name), daemon_mode.as_str()),
        TxnOp::create(NodeKey::daemon_mode(name), daemon_mode.as_str()),
        TxnOp::create(NodeKey::daemon_state(name), DaemonState::Init.as_str()),
        TxnOp::create(NodeKey::router_state(name), RouterState::Client.as_str()),
        TxnOp::create(NodeKey::domain_state(name), NodeDomainState::Flushed.as_str()),
        TxnOp::create(NodeKey::static_data(name), static_json),
        TxnOp::create(NodeKey::memfree(name), "0"),
        TxnOp::create(NodeKey::memused(name), "0"),
        TxnOp::create(NodeKey::memalloc(name), "0"),
        TxnOp::create(NodeKey::vcpualloc(name), "0"),
        TxnOp::create(NodeKey::cpuload(name), "0.0"),
        TxnOp::create(NodeKey::domains_count(name), "0"),
        TxnOp::create(NodeKey::running_domains(name), ""),
        TxnOp::create(NodeKey::keepalive(name), now_epoch().to_string()),
        TxnOp::create(NodeKey::ipmi_hostname(name), config.ipmi_hostname.clone()),
        TxnOp::create(NodeKey::ipmi_username(name), config.ipmi_username.clone()),
        TxnOp::create(NodeKey::ipmi_password(name), config.ipmi_password.clone()),
    ])?;
    Ok(())
}

/// Claims `/primary_node` for this node if the key is absent or `none`, per
/// `Daemon.py`'s phase 5 primary-key check. Does not contest an already-claimed key.
pub fn ensure_primary_claimed(store: &dyn StoreClient, name: &str) -> Result<()> {
    match store.read_string(PRIMARY_NODE)? {
        Some(current) if current != "none" && !current.is_empty() => {
            info!("current primary node is {}", current);
        }
        _ => {
            info!("no primary node claimed yet; claiming it as {}", name);
            store.write_txn(vec![TxnOp::write(PRIMARY_NODE, name)])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use pvc_store::{ChildWatchCallback, ConnectionState, StoreLock, WatchCallback};

    use super::*;

    struct FakeStore {
        entries: Mutex<HashMap<String, String>>,
    }

    impl FakeStore {
        fn new() -> Self {
            FakeStore { entries: Mutex::new(HashMap::new()) }
        }

        fn with(pairs: &[(&str, &str)]) -> Self {
            let store = Self::new();
            for (k, v) in pairs {
                store.entries.lock().unwrap().insert(k.to_string(), v.to_string());
            }
            store
        }

        fn get(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).cloned()
        }
    }

    impl StoreClient for FakeStore {
        fn read(&self, key: &str) -> pvc_store::StoreResult<Option<(Vec<u8>, i32)>> {
            Ok(self.get(key).map(|v| (v.into_bytes(), 0)))
        }
        fn children(&self, _key: &str) -> pvc_store::StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn write_txn(&self, ops: Vec<TxnOp>) -> pvc_store::StoreResult<()> {
            let mut entries = self.entries.lock().unwrap();
            for op in ops {
                match op {
                    TxnOp::Create { key, data } => {
                        entries.insert(key, String::from_utf8_lossy(&data).to_string());
                    }
                    TxnOp::Write { key, data, .. } => {
                        entries.insert(key, String::from_utf8_lossy(&data).to_string());
                    }
                    TxnOp::Delete { key } => {
                        entries.remove(&key);
                    }
                }
            }
            Ok(())
        }
        fn watch_data(&self, _key: &str, _cb: WatchCallback) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn watch_children(&self, _key: &str, _cb: ChildWatchCallback) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn lock(&self, _key: &str) -> pvc_store::StoreResult<Box<dyn StoreLock>> {
            unimplemented!()
        }
        fn ephemeral_create(&self, _key: &str, _data: &[u8]) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    fn minimal_config() -> Config {
        serde_yaml::from_str(
            r#"
coordinators: "hv1,hv2,hv3"
vni_dev: "bond0.100"
vni_floating_ip: "10.0.0.1/24"
upstream_dev: "bond0"
upstream_floating_ip: "192.168.1.10/24"
"#,
        )
        .unwrap()
    }

    #[test]
    fn registers_a_new_node_with_full_field_set() {
        let store = FakeStore::new();
        let config = minimal_config();
        ensure_node_registered(&store, "hv1", &config).unwrap();

        assert_eq!(store.get(&NodeKey::base("hv1")), Some("coordinator".to_string()));
        assert_eq!(store.get(&NodeKey::daemon_state("hv1")), Some("init".to_string()));
        assert_eq!(store.get(&NodeKey::domain_state("hv1")), Some("flushed".to_string()));
        assert_eq!(store.get(&NodeKey::running_domains("hv1")), Some(String::new()));
    }

    #[test]
    fn a_hypervisor_not_in_the_coordinator_list_registers_as_hypervisor() {
        let store = FakeStore::new();
        let config = minimal_config();
        ensure_node_registered(&store, "hv9", &config).unwrap();
        assert_eq!(store.get(&NodeKey::daemon_mode("hv9")), Some("hypervisor".to_string()));
    }

    #[test]
    fn an_existing_node_only_refreshes_daemon_state_and_static_data() {
        let store = FakeStore::with(&[
            (&NodeKey::base("hv1"), "coordinator"),
            (&NodeKey::daemon_state("hv1"), "dead"),
            (&NodeKey::memfree("hv1"), "4096"),
        ]);
        let config = minimal_config();
        ensure_node_registered(&store, "hv1", &config).unwrap();

        assert_eq!(store.get(&NodeKey::daemon_state("hv1")), Some("init".to_string()));
        assert_eq!(store.get(&NodeKey::memfree("hv1")), Some("4096".to_string()));
    }

    #[test]
    fn claims_primary_when_key_is_absent() {
        let store = FakeStore::new();
        ensure_primary_claimed(&store, "hv1").unwrap();
        assert_eq!(store.get(PRIMARY_NODE), Some("hv1".to_string()));
    }

    #[test]
    fn claims_primary_when_key_is_none() {
        let store = FakeStore::with(&[(PRIMARY_NODE, "none")]);
        ensure_primary_claimed(&store, "hv2").unwrap();
        assert_eq!(store.get(PRIMARY_NODE), Some("hv2".to_string()));
    }

    #[test]
    fn does_not_contest_an_already_claimed_primary() {
        let store = FakeStore::with(&[(PRIMARY_NODE, "hv3")]);
        ensure_primary_claimed(&store, "hv1").unwrap();
        assert_eq!(store.get(PRIMARY_NODE), Some("hv3".to_string()));
    }
}
