//! `PrimaryController`: the single-writer election for the primary coordinator role.
//! Ported from `NodeInstance.py`'s `watch_node_routerstate`/`become_primary`/
//! `become_secondary`, restructured onto a dedicated worker thread (the per-entity
//! channel convention from §5) instead of running the sequence on ZooKeeper's own
//! watch-delivery thread.
//!
//! Unlike `DomainObject`/`NetworkObject` this is not a `RegistryMember`: there is
//! exactly one of these per node, watching only that node's own `/nodes/<name>/
//! router_state`, so `pvc-noded` constructs it directly rather than through a
//! `Registry`.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{info, warn};

use pvc_network::NetworkObject;
use pvc_registry::Registry;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::RouterState;
use pvc_types::keys::{NodeKey, PRIMARY_NODE};

use crate::floating_ip::{self, FloatingIpConfig};
use crate::services::{LeaderSwitchOutcome, PrimaryServices};

const LEADER_SWITCH_ATTEMPTS: u32 = 5;
const LEADER_SWITCH_RETRY_DELAY: Duration = Duration::from_secs(2);

enum WorkerMsg {
    Transition(RouterState),
    Shutdown,
}

struct Inner {
    /// The router state this controller itself most recently wrote, so that the
    /// watch re-delivering our own write doesn't re-run the sequence that produced
    /// it (mirrors `NodeInstance.py` updating `self.router_state` before dispatching).
    last_written: Option<RouterState>,
}

pub struct PrimaryController {
    node_name: String,
    store: Arc<dyn StoreClient>,
    networks: Arc<Registry<NetworkObject>>,
    floating: FloatingIpConfig,
    services: Arc<dyn PrimaryServices>,
    enable_api: bool,
    inner: Mutex<Inner>,
    tx: Sender<WorkerMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PrimaryController {
    /// Registers the watch on this node's own `router_state` and starts the worker
    /// thread. Call once at startup for coordinator nodes with networking enabled.
    pub fn spawn(
        node_name: String,
        store: Arc<dyn StoreClient>,
        networks: Arc<Registry<NetworkObject>>,
        floating: FloatingIpConfig,
        services: Arc<dyn PrimaryServices>,
        enable_api: bool,
    ) -> Arc<Self> {
        let (tx, rx) = unbounded::<WorkerMsg>();

        let controller = Arc::new(PrimaryController {
            node_name,
            store: Arc::clone(&store),
            networks,
            floating,
            services,
            enable_api,
            inner: Mutex::new(Inner { last_written: None }),
            tx,
            worker: Mutex::new(None),
        });

        let worker_controller = Arc::clone(&controller);
        let handle = thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    WorkerMsg::Transition(state) => worker_controller.transition(state),
                    WorkerMsg::Shutdown => break,
                }
            }
        });
        *controller.worker.lock().unwrap() = Some(handle);

        let watch_controller = Arc::clone(&controller);
        let _ = store.watch_data(
            &NodeKey::router_state(&watch_controller.node_name),
            Box::new(move |event| {
                let Some(data) = event.data else { return };
                let Ok(text) = String::from_utf8(data) else { return };
                let Ok(state) = text.parse::<RouterState>() else { return };

                let mut inner = watch_controller.inner.lock().unwrap();
                if inner.last_written == Some(state) {
                    return;
                }
                inner.last_written = Some(state);
                drop(inner);

                let _ = watch_controller.tx.send(WorkerMsg::Transition(state));
            }),
        );

        controller
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn record_self_write(&self, state: RouterState) {
        self.inner.lock().unwrap().last_written = Some(state);
    }

    fn transition(&self, desired: RouterState) {
        if desired == RouterState::Primary {
            self.acquire();
        } else {
            self.release();
        }
    }

    /// Acquire sequence (secondary → takeover → primary), under `lock(/primary_node)`.
    fn acquire(&self) {
        info!("node {}: acquiring primary role", self.node_name);
        let _lock = match self.store.lock(PRIMARY_NODE) {
            Ok(lock) => lock,
            Err(err) => {
                warn!("node {}: could not acquire /primary_node lock: {}", self.node_name, err);
                return;
            }
        };

        let version = match self.store.read(PRIMARY_NODE) {
            Ok(Some((_, version))) => Some(version),
            Ok(None) => None,
            Err(err) => {
                warn!("node {}: failed to read /primary_node: {}", self.node_name, err);
                return;
            }
        };
        let claim = match version {
            Some(version) => TxnOp::compare_and_swap(PRIMARY_NODE, self.node_name.as_str(), version),
            None => TxnOp::write(PRIMARY_NODE, self.node_name.as_str()),
        };
        if let Err(err) = self.store.write_txn(vec![claim]) {
            warn!("node {}: failed to claim /primary_node: {}", self.node_name, err);
            return;
        }

        if let Err(err) = floating_ip::create_all(&self.floating) {
            warn!("node {}: floating address setup failed: {}", self.node_name, err);
        }

        for network in self.networks.values() {
            network.set_primary(true);
        }
        thread::sleep(Duration::from_secs(1));

        let mut switched = false;
        for attempt in 1..=LEADER_SWITCH_ATTEMPTS {
            match self.services.switch_leader(&self.node_name) {
                LeaderSwitchOutcome::Switched => {
                    info!("node {}: switched DNS leader to self", self.node_name);
                    switched = true;
                    break;
                }
                LeaderSwitchOutcome::AlreadyLeader => {
                    info!("node {}: already DNS leader", self.node_name);
                    switched = true;
                    break;
                }
                LeaderSwitchOutcome::Failed(reason) => {
                    warn!(
                        "node {}: leader switch attempt {}/{} failed: {}",
                        self.node_name, attempt, LEADER_SWITCH_ATTEMPTS, reason
                    );
                    thread::sleep(LEADER_SWITCH_RETRY_DELAY);
                }
            }
        }
        if !switched {
            warn!("node {}: leader switch did not succeed after {} tries", self.node_name, LEADER_SWITCH_ATTEMPTS);
        }
        thread::sleep(Duration::from_secs(1));

        if let Err(err) = self.services.start_dns_aggregator() {
            warn!("node {}: dns aggregator start failed: {}", self.node_name, err);
        }
        if let Err(err) = self.services.start_metadata_api() {
            warn!("node {}: metadata api start failed: {}", self.node_name, err);
        }
        if self.enable_api {
            if let Err(err) = self.services.start_user_api() {
                warn!("node {}: user api start failed: {}", self.node_name, err);
            }
        }

        self.record_self_write(RouterState::Primary);
        let _ = self.store.write_txn(vec![TxnOp::write(
            NodeKey::router_state(&self.node_name),
            RouterState::Primary.as_str(),
        )]);
        info!("node {}: now primary", self.node_name);
    }

    /// Release sequence (primary → relinquish → secondary). Runs unconditionally on
    /// any non-`primary` transition, matching `become_secondary`'s own idempotent
    /// teardown calls.
    fn release(&self) {
        info!("node {}: relinquishing primary role", self.node_name);
        self.record_self_write(RouterState::Relinquish);
        let _ = self.store.write_txn(vec![TxnOp::write(
            NodeKey::router_state(&self.node_name),
            RouterState::Relinquish.as_str(),
        )]);

        if self.enable_api {
            if let Err(err) = self.services.stop_user_api() {
                warn!("node {}: user api stop failed: {}", self.node_name, err);
            }
        }
        if let Err(err) = self.services.stop_metadata_api() {
            warn!("node {}: metadata api stop failed: {}", self.node_name, err);
        }
        if let Err(err) = self.services.stop_dns_aggregator() {
            warn!("node {}: dns aggregator stop failed: {}", self.node_name, err);
        }

        for network in self.networks.values() {
            network.set_primary(false);
        }

        floating_ip::remove_all(&self.floating);

        self.record_self_write(RouterState::Secondary);
        let _ = self.store.write_txn(vec![TxnOp::write(
            NodeKey::router_state(&self.node_name),
            RouterState::Secondary.as_str(),
        )]);
        info!("node {}: now secondary", self.node_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use pvc_store::{
        ChildWatchCallback, ChildrenEvent, ConnectionState, DataEvent, StoreLock, WatchCallback,
    };

    use crate::error::PrimaryResult;

    struct DummyLock;
    impl StoreLock for DummyLock {
        fn key(&self) -> &str {
            "/primary_node"
        }
    }

    struct RecordingStore {
        writes: StdMutex<Vec<(String, String)>>,
    }

    impl StoreClient for RecordingStore {
        fn read(&self, _key: &str) -> pvc_store::StoreResult<Option<(Vec<u8>, i32)>> {
            Ok(None)
        }
        fn children(&self, _key: &str) -> pvc_store::StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn write_txn(&self, ops: Vec<TxnOp>) -> pvc_store::StoreResult<()> {
            let mut writes = self.writes.lock().unwrap();
            for op in ops {
                if let TxnOp::Write { key, data, .. } = op {
                    writes.push((key, String::from_utf8_lossy(&data).to_string()));
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
            Ok(Box::new(DummyLock))
        }
        fn ephemeral_create(&self, _key: &str, _data: &[u8]) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    struct RecordingServices {
        calls: StdMutex<Vec<String>>,
    }

    impl PrimaryServices for RecordingServices {
        fn switch_leader(&self, _node: &str) -> LeaderSwitchOutcome {
            self.calls.lock().unwrap().push("switch_leader".to_string());
            LeaderSwitchOutcome::Switched
        }
        fn start_dns_aggregator(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("start_dns_aggregator".to_string());
            Ok(())
        }
        fn stop_dns_aggregator(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("stop_dns_aggregator".to_string());
            Ok(())
        }
        fn start_metadata_api(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("start_metadata_api".to_string());
            Ok(())
        }
        fn stop_metadata_api(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("stop_metadata_api".to_string());
            Ok(())
        }
        fn start_user_api(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("start_user_api".to_string());
            Ok(())
        }
        fn stop_user_api(&self) -> PrimaryResult<()> {
            self.calls.lock().unwrap().push("stop_user_api".to_string());
            Ok(())
        }
    }

    fn test_controller(enable_api: bool) -> (Arc<RecordingStore>, Arc<RecordingServices>, PrimaryController) {
        let store = Arc::new(RecordingStore { writes: StdMutex::new(Vec::new()) });
        let services = Arc::new(RecordingServices { calls: StdMutex::new(Vec::new()) });
        let networks: Arc<Registry<NetworkObject>> = Registry::new(store.clone(), "networks");
        let controller = PrimaryController {
            node_name: "node1".to_string(),
            store: store.clone(),
            networks,
            floating: FloatingIpConfig {
                vni_dev: "bond0.100".to_string(),
                vni_floating_ip: "10.0.0.1/24".to_string(),
                upstream_dev: "bond0".to_string(),
                upstream_floating_ip: "192.168.1.10/24".to_string(),
            },
            services: services.clone(),
            enable_api,
            inner: Mutex::new(Inner { last_written: None }),
            tx: unbounded().0,
            worker: Mutex::new(None),
        };
        (store, services, controller)
    }

    #[test]
    fn acquire_claims_primary_node_before_starting_services() {
        let (store, services, controller) = test_controller(true);
        controller.acquire();

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes[0], (PRIMARY_NODE.to_string(), "node1".to_string()));
        assert_eq!(writes.last().unwrap(), &(NodeKey::router_state("node1"), "primary".to_string()));

        let calls = services.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[
                "switch_leader".to_string(),
                "start_dns_aggregator".to_string(),
                "start_metadata_api".to_string(),
                "start_user_api".to_string(),
            ]
        );
    }

    #[test]
    fn acquire_skips_user_api_when_disabled() {
        let (_store, services, controller) = test_controller(false);
        controller.acquire();
        assert!(!services.calls.lock().unwrap().contains(&"start_user_api".to_string()));
    }

    #[test]
    fn release_stops_services_before_dropping_floating_ips() {
        let (store, services, controller) = test_controller(true);
        controller.release();

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes[0], (NodeKey::router_state("node1"), "relinquish".to_string()));
        assert_eq!(writes.last().unwrap(), &(NodeKey::router_state("node1"), "secondary".to_string()));

        let calls = services.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[
                "stop_user_api".to_string(),
                "stop_metadata_api".to_string(),
                "stop_dns_aggregator".to_string(),
            ]
        );
    }

    #[test]
    fn watch_callback_dedups_self_triggered_writes() {
        let (_store, _services, controller) = test_controller(true);
        controller.record_self_write(RouterState::Primary);
        assert_eq!(controller.inner.lock().unwrap().last_written, Some(RouterState::Primary));
    }
}
