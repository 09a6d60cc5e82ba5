//! `NodeObject`: the per-node entity behind `Coordinator`'s `N` registry member.
//! Every node in `/nodes` (self and peers alike) gets one, keeping a live
//! [`NodeSnapshot`] in sync via per-field watches so the fence supervisor and target
//! selector always see current data without re-reading the store on every decision.
//!
//! Only the node matching this process's own hostname drives anything beyond that
//! bookkeeping: its `domain_state` watch is the one that reacts to `flush`/`unflush`
//! (§4.8), ported from `NodeInstance.py`'s flush thread. A second `flush`/`unflush`
//! while one is running cancels the in-flight worker, but the store-watch callback
//! only hands the previous worker off to the newly spawned thread — the wait for it
//! to exit happens there, not on the callback's own thread.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use pvc_registry::{Registry, RegistryMember};
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::{DaemonMode, DaemonState, NodeDomainState, NodeSelector, RouterState, VmDesiredState};
use pvc_types::keys::{DomainKey, NodeKey};
use pvc_types::{NodeSnapshot, StaticNodeData};

use crate::selector::{eligible_candidates, resolve_selector, select_target};

const MIGRATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Process-wide settings `RegistryMember::construct`'s fixed signature has no room
/// for, mirroring `pvc_vm`'s `VmRuntimeConfig`/`init` pattern.
#[derive(Debug, Clone, Copy)]
pub struct NodeRuntimeConfig {
    pub cluster_default_selector: NodeSelector,
}

static RUNTIME_CONFIG: OnceLock<NodeRuntimeConfig> = OnceLock::new();
static SELF_REGISTRY: OnceLock<Weak<Registry<NodeObject>>> = OnceLock::new();

pub fn init(config: NodeRuntimeConfig) {
    let _ = RUNTIME_CONFIG.set(config);
}

fn config() -> NodeRuntimeConfig {
    RUNTIME_CONFIG.get().copied().unwrap_or(NodeRuntimeConfig {
        cluster_default_selector: NodeSelector::Mem,
    })
}

/// Lets a freshly constructed `NodeObject` reach its siblings for target selection.
/// Call once, right after constructing the registry, before `coordinator.start()`.
pub fn set_registry(registry: &Arc<Registry<NodeObject>>) {
    let _ = SELF_REGISTRY.set(Arc::downgrade(registry));
}

fn sibling_registry() -> Option<Arc<Registry<NodeObject>>> {
    SELF_REGISTRY.get().and_then(Weak::upgrade)
}

fn current_node() -> &'static str {
    proxmox_sys::nodename()
}

fn read_field<T, F: Fn(&str) -> Option<T>>(store: &dyn StoreClient, key: String, parse: F) -> Option<T> {
    store.read_string(&key).ok().flatten().and_then(|s| parse(&s))
}

fn load_snapshot(store: &dyn StoreClient, name: &str) -> NodeSnapshot {
    let mut snap = NodeSnapshot::unknown(name);
    if let Some(v) = read_field(store, NodeKey::daemon_mode(name), |s| DaemonMode::from_str(s).ok()) {
        snap.daemon_mode = v;
    }
    if let Some(v) = read_field(store, NodeKey::daemon_state(name), |s| DaemonState::from_str(s).ok()) {
        snap.daemon_state = v;
    }
    if let Some(v) = read_field(store, NodeKey::router_state(name), |s| RouterState::from_str(s).ok()) {
        snap.router_state = v;
    }
    if let Some(v) = read_field(store, NodeKey::domain_state(name), |s| NodeDomainState::from_str(s).ok()) {
        snap.domain_state = v;
    }
    if let Some(v) = read_field(store, NodeKey::memfree(name), |s| s.parse().ok()) {
        snap.memfree = v;
    }
    if let Some(v) = read_field(store, NodeKey::memused(name), |s| s.parse().ok()) {
        snap.memused = v;
    }
    if let Some(v) = read_field(store, NodeKey::memalloc(name), |s| s.parse().ok()) {
        snap.memalloc = v;
    }
    if let Some(v) = read_field(store, NodeKey::vcpualloc(name), |s| s.parse().ok()) {
        snap.vcpualloc = v;
    }
    if let Some(v) = read_field(store, NodeKey::cpuload(name), |s| s.parse().ok()) {
        snap.cpuload = v;
    }
    if let Some(v) = store.read_string(&NodeKey::running_domains(name)).ok().flatten() {
        snap.running_domains = v.split_whitespace().map(String::from).collect();
    }
    if let Some(v) = read_field(store, NodeKey::domains_count(name), |s| s.parse().ok()) {
        snap.domains_count = v;
    }
    if let Some(v) = read_field(store, NodeKey::keepalive(name), |s| s.parse().ok()) {
        snap.keepalive = v;
    }
    snap.ipmi_hostname = store.read_string(&NodeKey::ipmi_hostname(name)).ok().flatten();
    snap.ipmi_username = store.read_string(&NodeKey::ipmi_username(name)).ok().flatten();
    snap.ipmi_password = store.read_string(&NodeKey::ipmi_password(name)).ok().flatten();
    snap.static_data = read_field(store, NodeKey::static_data(name), |s| serde_json::from_str::<StaticNodeData>(s).ok());
    snap
}

struct FlushWorker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct NodeCore {
    name: String,
    store: Arc<dyn StoreClient>,
    inner: Mutex<NodeSnapshot>,
}

impl NodeCore {
    fn snapshot(&self) -> NodeSnapshot {
        self.inner.lock().unwrap().clone()
    }
}

/// Waits, polling, for `/domains/<uuid>/state` to return to `start`, or for
/// `cancel` to be raised. Returns `false` if canceled.
fn await_migration_settled(store: &dyn StoreClient, uuid: &str, cancel: &AtomicBool) -> bool {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        if let Ok(Some(state)) = store.read_string(&DomainKey::state(uuid)) {
            if state == VmDesiredState::Start.as_str() {
                return true;
            }
        }
        thread::sleep(MIGRATE_POLL_INTERVAL);
    }
}

/// `domain_state = flush`: drain `running_domains` onto other nodes, one at a time.
fn run_flush(core: Arc<NodeCore>, cancel: Arc<AtomicBool>) {
    let running = core
        .store
        .read_string(&NodeKey::running_domains(&core.name))
        .ok()
        .flatten()
        .unwrap_or_default();
    let uuids: Vec<String> = running.split_whitespace().map(String::from).collect();

    for uuid in &uuids {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let domain = match pvc_vm::snapshot_io::load(core.store.as_ref(), uuid) {
            Ok(d) => d,
            Err(err) => {
                warn!("flush: could not load domain {}: {}", uuid, err);
                continue;
            }
        };

        let Some(registry) = sibling_registry() else { return };
        let snapshots: Vec<_> = registry.values().iter().map(|n| n.snapshot()).collect();
        let selector = resolve_selector(domain.node_selector, config().cluster_default_selector);
        let candidates = eligible_candidates(&snapshots, &domain.node_limit, &core.name);

        match select_target(&candidates, selector) {
            Some(target) => {
                info!("flush: migrating {} to {}", uuid, target);
                let _ = core.store.write_txn(vec![
                    TxnOp::write(DomainKey::state(uuid), VmDesiredState::Migrate.as_str()),
                    TxnOp::write(DomainKey::node(uuid), target),
                    TxnOp::write(DomainKey::lastnode(uuid), core.name.clone()),
                ]);
                if !await_migration_settled(core.store.as_ref(), uuid, &cancel) {
                    return;
                }
            }
            None => {
                warn!("flush: no eligible target for {}; shutting down with autostart", uuid);
                let _ = core.store.write_txn(vec![
                    TxnOp::write(DomainKey::state(uuid), VmDesiredState::Shutdown.as_str()),
                    TxnOp::write(DomainKey::node_autostart(uuid), "true"),
                ]);
            }
        }
    }

    let _ = core.store.write_txn(vec![
        TxnOp::write(NodeKey::running_domains(&core.name), ""),
        TxnOp::write(NodeKey::domain_state(&core.name), NodeDomainState::Flushed.as_str()),
    ]);
}

/// `domain_state = unflush`: reclaim domains whose `lastnode` is us, then start any
/// that were left with `node_autostart` set while we were away.
fn run_unflush(core: Arc<NodeCore>, cancel: Arc<AtomicBool>) {
    let uuids = core.store.children("/domains").unwrap_or_default();

    for uuid in &uuids {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let domain = match pvc_vm::snapshot_io::load(core.store.as_ref(), uuid) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if domain.lastnode.as_deref() != Some(core.name.as_str()) {
            continue;
        }
        info!("unflush: reclaiming {}", uuid);
        let _ = core.store.write_txn(vec![
            TxnOp::write(DomainKey::state(uuid), VmDesiredState::Migrate.as_str()),
            TxnOp::write(DomainKey::node(uuid), core.name.clone()),
            TxnOp::write(DomainKey::lastnode(uuid), ""),
        ]);
        if !await_migration_settled(core.store.as_ref(), uuid, &cancel) {
            return;
        }
    }

    for uuid in &uuids {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let domain = match pvc_vm::snapshot_io::load(core.store.as_ref(), uuid) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if domain.node_autostart && domain.node == core.name {
            info!("unflush: autostarting {}", uuid);
            let _ = core.store.write_txn(vec![
                TxnOp::write(DomainKey::state(uuid), VmDesiredState::Start.as_str()),
                TxnOp::write(DomainKey::node_autostart(uuid), "false"),
            ]);
        }
    }

    let _ = core.store.write_txn(vec![TxnOp::write(
        NodeKey::domain_state(&core.name),
        NodeDomainState::Ready.as_str(),
    )]);
}

pub struct NodeObject {
    core: Arc<NodeCore>,
    flush_worker: Arc<Mutex<Option<FlushWorker>>>,
}

impl NodeObject {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.core.snapshot()
    }
}

fn cancel_and_join(slot: &Mutex<Option<FlushWorker>>) {
    if let Some(prev) = slot.lock().unwrap().take() {
        prev.cancel.store(true, Ordering::SeqCst);
        let _ = prev.handle.join();
    }
}

impl RegistryMember for NodeObject {
    fn construct(identity: &str, store: Arc<dyn StoreClient>) -> Self {
        let name = identity.to_string();
        let snapshot = load_snapshot(store.as_ref(), &name);

        let core = Arc::new(NodeCore {
            name: name.clone(),
            store: Arc::clone(&store),
            inner: Mutex::new(snapshot),
        });

        macro_rules! watch_field {
            ($key:expr, |$snap:ident, $val:ident| $body:expr) => {{
                let core = Arc::clone(&core);
                let name_for_reload = name.clone();
                let store_for_reload = Arc::clone(&store);
                let _ = store.watch_data(
                    &$key,
                    Box::new(move |event| {
                        let Some(data) = event.data else { return };
                        let Ok($val) = String::from_utf8(data) else { return };
                        let mut $snap = core.inner.lock().unwrap();
                        $body
                        let _ = (&name_for_reload, &store_for_reload);
                    }),
                );
            }};
        }

        watch_field!(NodeKey::daemon_mode(&name), |snap, val| {
            if let Ok(v) = DaemonMode::from_str(&val) {
                snap.daemon_mode = v;
            }
        });
        watch_field!(NodeKey::daemon_state(&name), |snap, val| {
            if let Ok(v) = DaemonState::from_str(&val) {
                snap.daemon_state = v;
            }
        });
        watch_field!(NodeKey::router_state(&name), |snap, val| {
            if let Ok(v) = RouterState::from_str(&val) {
                snap.router_state = v;
            }
        });
        watch_field!(NodeKey::domain_state(&name), |snap, val| {
            if let Ok(v) = NodeDomainState::from_str(&val) {
                snap.domain_state = v;
            }
        });
        watch_field!(NodeKey::memfree(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.memfree = v;
            }
        });
        watch_field!(NodeKey::memused(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.memused = v;
            }
        });
        watch_field!(NodeKey::memalloc(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.memalloc = v;
            }
        });
        watch_field!(NodeKey::vcpualloc(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.vcpualloc = v;
            }
        });
        watch_field!(NodeKey::cpuload(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.cpuload = v;
            }
        });
        watch_field!(NodeKey::running_domains(&name), |snap, val| {
            snap.running_domains = val.split_whitespace().map(String::from).collect();
        });
        watch_field!(NodeKey::domains_count(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.domains_count = v;
            }
        });
        watch_field!(NodeKey::keepalive(&name), |snap, val| {
            if let Ok(v) = val.parse() {
                snap.keepalive = v;
            }
        });
        watch_field!(NodeKey::ipmi_hostname(&name), |snap, val| {
            snap.ipmi_hostname = Some(val);
        });
        watch_field!(NodeKey::ipmi_username(&name), |snap, val| {
            snap.ipmi_username = Some(val);
        });
        watch_field!(NodeKey::ipmi_password(&name), |snap, val| {
            snap.ipmi_password = Some(val);
        });

        let flush_worker: Arc<Mutex<Option<FlushWorker>>> = Arc::new(Mutex::new(None));

        // The plain watch above keeps `snapshot.domain_state` current for every node;
        // only our own node also dispatches the flush/unflush worker on it.
        if name == current_node() {
            let core_for_watch = Arc::clone(&core);
            let flush_worker_for_watch = Arc::clone(&flush_worker);
            let _ = store.watch_data(
                &NodeKey::domain_state(&name),
                Box::new(move |event| {
                    let Some(data) = event.data else { return };
                    let Ok(val) = String::from_utf8(data) else { return };
                    let Ok(state) = NodeDomainState::from_str(&val) else { return };
                    if !matches!(state, NodeDomainState::Flush | NodeDomainState::Unflush) {
                        return;
                    }
                    // Hand the previous worker (if any) off to the freshly spawned thread
                    // rather than cancel-and-joining it here: `take()` under the lock is
                    // non-blocking, so this store-watch callback never waits on another
                    // worker's completion.
                    let prev = flush_worker_for_watch.lock().unwrap().take();
                    let core = Arc::clone(&core_for_watch);
                    let cancel = Arc::new(AtomicBool::new(false));
                    let cancel_for_thread = Arc::clone(&cancel);
                    let slot = Arc::clone(&flush_worker_for_watch);
                    let handle = thread::spawn(move || {
                        if let Some(prev) = prev {
                            prev.cancel.store(true, Ordering::SeqCst);
                            let _ = prev.handle.join();
                        }
                        if state == NodeDomainState::Flush {
                            run_flush(core, cancel_for_thread);
                        } else {
                            run_unflush(core, cancel_for_thread);
                        }
                    });
                    *slot.lock().unwrap() = Some(FlushWorker { cancel, handle });
                }),
            );
        }

        NodeObject { core, flush_worker }
    }

    fn teardown(&mut self) {
        cancel_and_join(&self.flush_worker);
    }
}
