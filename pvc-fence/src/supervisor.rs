//! The keepalive evaluation loop, ported from `NodeInstance.py`'s end-of-tick peer
//! scan: after the facts tick publishes this node's own keepalive, walk the known
//! peers and declare one dead, then fence it, once its keepalive is further out of
//! date than `keepalive_interval * fence_intervals` while it still claims `run`.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::warn;

use pvc_registry::Registry;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::DaemonState;
use pvc_types::keys::NodeKey;

use crate::fence::{self, FenceConfig};
use crate::node::NodeObject;

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn current_node() -> &'static str {
    proxmox_sys::nodename()
}

#[derive(Debug, Clone)]
pub struct FenceSupervisorConfig {
    pub keepalive_interval: Duration,
    pub fence_intervals: u64,
    pub fence: FenceConfig,
}

pub struct FenceSupervisor {
    tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FenceSupervisor {
    pub fn spawn(store: Arc<dyn StoreClient>, nodes: Arc<Registry<NodeObject>>, config: FenceSupervisorConfig) -> Arc<Self> {
        let (tx, rx) = unbounded::<()>();
        let handle = thread::spawn(move || loop {
            match rx.recv_timeout(config.keepalive_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => tick(&store, &nodes, &config),
            }
        });
        Arc::new(FenceSupervisor { tx, worker: Mutex::new(Some(handle)) })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn tick(store: &Arc<dyn StoreClient>, nodes: &Arc<Registry<NodeObject>>, config: &FenceSupervisorConfig) {
    let deadtime_window = config.keepalive_interval.as_secs() * config.fence_intervals;
    let me = current_node();

    for node in nodes.values() {
        let snap = node.snapshot();
        if snap.name == me || snap.daemon_state != DaemonState::Run {
            continue;
        }
        if now_epoch().saturating_sub(snap.keepalive) <= deadtime_window {
            continue;
        }

        warn!("node {} seems dead; starting fence", snap.name);
        let _ = store.write_txn(vec![TxnOp::write(NodeKey::daemon_state(&snap.name), DaemonState::Dead.as_str())]);

        let store = Arc::clone(store);
        let nodes = Arc::clone(nodes);
        let fence_config = config.fence.clone();
        let peer = snap.name.clone();
        thread::spawn(move || fence::fence_node(store.as_ref(), &nodes, &peer, &fence_config));
    }
}
