//! The fence task for one peer, ported from `fencing.py`'s `fenceNode`: three "saving
//! throw" polls before committing to a fence, the `/primary_node` handoff, the IPMI
//! reset, and the policy-gated relocation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use pvc_registry::Registry;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::{DaemonState, FencePolicy, NodeSelector, RouterState};
use pvc_types::keys::{NodeKey, PRIMARY_NODE};

use crate::ipmi::{self, IpmiCredentials};
use crate::node::NodeObject;
use crate::relocate;

const SAVING_THROWS: u32 = 3;
const SAVING_THROW_INTERVAL: Duration = Duration::from_secs(5);
const POST_FENCE_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct FenceConfig {
    pub successful_fence: FencePolicy,
    pub failed_fence: FencePolicy,
    pub suicide_intervals: u64,
    pub migration_target_selector: NodeSelector,
}

/// Polls `peer`'s `daemon_state` every [`SAVING_THROW_INTERVAL`] for
/// [`SAVING_THROWS`] iterations. Returns `false` (cancel the fence) the moment any
/// iteration sees a state other than `dead`.
fn survives_saving_throws(store: &dyn StoreClient, peer: &str) -> bool {
    for _ in 0..SAVING_THROWS {
        thread::sleep(SAVING_THROW_INTERVAL);
        let state = store.read_string(&NodeKey::daemon_state(peer)).ok().flatten();
        if state.as_deref() != Some(DaemonState::Dead.as_str()) {
            return false;
        }
    }
    true
}

fn read_ipmi_credentials(store: &dyn StoreClient, peer: &str) -> Option<IpmiCredentials> {
    let hostname = store.read_string(&NodeKey::ipmi_hostname(peer)).ok().flatten()?;
    if hostname.is_empty() {
        return None;
    }
    let username = store.read_string(&NodeKey::ipmi_username(peer)).ok().flatten().unwrap_or_default();
    let password = store.read_string(&NodeKey::ipmi_password(peer)).ok().flatten().unwrap_or_default();
    Some(IpmiCredentials { hostname, username, password })
}

/// Relinquishes `peer`'s primary role under the cluster lock if it still holds it,
/// per step 3: the fenced node can no longer do this for itself.
fn relinquish_primary_if_held(store: &dyn StoreClient, peer: &str) {
    let _guard = match store.lock(PRIMARY_NODE) {
        Ok(g) => g,
        Err(err) => {
            warn!("could not acquire primary-node lock to fence {}: {}", peer, err);
            return;
        }
    };
    if store.read_string(PRIMARY_NODE).ok().flatten().as_deref() == Some(peer) {
        let _ = store.write_txn(vec![
            TxnOp::write(PRIMARY_NODE, "none"),
            TxnOp::write(NodeKey::router_state(peer), RouterState::Secondary.as_str()),
        ]);
    }
}

/// Runs the full fence sequence for `peer`. Intended to be spawned on its own thread
/// by the [`crate::supervisor::FenceSupervisor`] so a slow IPMI call never blocks the
/// keepalive tick.
pub fn fence_node(store: &dyn StoreClient, nodes: &Arc<Registry<NodeObject>>, peer: &str, config: &FenceConfig) {
    if !survives_saving_throws(store, peer) {
        info!("node {} passed a saving throw; canceling fence", peer);
        return;
    }

    warn!("fencing node {} via IPMI reboot signal", peer);

    let creds = match read_ipmi_credentials(store, peer) {
        Some(c) => c,
        None => {
            warn!("no IPMI credentials recorded for {}; cannot fence", peer);
            return;
        }
    };

    relinquish_primary_if_held(store, peer);

    let reset_succeeded = ipmi::reboot(&creds);
    thread::sleep(POST_FENCE_SETTLE);

    let should_relocate = if reset_succeeded {
        config.successful_fence == FencePolicy::Migrate
    } else {
        config.failed_fence == FencePolicy::Migrate && config.suicide_intervals != 0
    };

    if should_relocate {
        relocate::relocate_domains(store, nodes, peer, config.migration_target_selector);
    }
}
