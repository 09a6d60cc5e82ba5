//! Relocating a fenced node's VMs, ported from `fencing.py`'s `migrateFromFencedNode`.
//! Unlike the original (which never actually flushed RBD locks — its own comment
//! admits it was `TO BE IMPLEMENTED once RBD pools are integrated properly`), this
//! calls into `pvc_vm::rbd::flush_locks`, which is real.

use std::sync::Arc;

use log::{info, warn};

use pvc_registry::Registry;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::{NodeDomainState, NodeSelector, VmDesiredState};
use pvc_types::keys::{DomainKey, NodeKey};

use crate::node::NodeObject;
use crate::selector::{eligible_candidates, resolve_selector, select_target};

/// Moves every domain in `fenced_node`'s `running_domains` to a freshly selected
/// target, flushing RBD locks first so the new owner can safely start it. Ends by
/// marking `fenced_node` `flushed` so its eventual return doesn't race these moves.
pub fn relocate_domains(
    store: &dyn StoreClient,
    nodes: &Arc<Registry<NodeObject>>,
    fenced_node: &str,
    cluster_default_selector: NodeSelector,
) {
    info!("relocating VMs from fenced node {}", fenced_node);

    let running = store
        .read_string(&NodeKey::running_domains(fenced_node))
        .ok()
        .flatten()
        .unwrap_or_default();
    let uuids: Vec<&str> = running.split_whitespace().collect();

    let snapshots: Vec<_> = nodes.values().iter().map(|n| n.snapshot()).collect();

    for uuid in uuids {
        let domain = match pvc_vm::snapshot_io::load(store, uuid) {
            Ok(d) => d,
            Err(err) => {
                warn!("could not load domain {} for relocation: {}", uuid, err);
                continue;
            }
        };

        let selector = resolve_selector(domain.node_selector, cluster_default_selector);
        let candidates = eligible_candidates(&snapshots, &domain.node_limit, fenced_node);
        let target = match select_target(&candidates, selector) {
            Some(t) => t,
            None => {
                warn!("no eligible target for {}; leaving stopped", uuid);
                let _ = store.write_txn(vec![TxnOp::write(DomainKey::state(uuid), VmDesiredState::Stop.as_str())]);
                continue;
            }
        };

        if let Err(err) = pvc_vm::rbd::flush_locks(&domain.xml, fenced_node) {
            warn!("rbd lock flush for {} failed: {}", uuid, err);
        }

        info!("moving {} to {}", uuid, target);
        let _ = store.write_txn(vec![
            TxnOp::write(DomainKey::state(uuid), VmDesiredState::Start.as_str()),
            TxnOp::write(DomainKey::node(uuid), target),
            TxnOp::write(DomainKey::lastnode(uuid), fenced_node),
        ]);
    }

    let _ = store.write_txn(vec![TxnOp::write(
        NodeKey::domain_state(fenced_node),
        NodeDomainState::Flushed.as_str(),
    )]);
}
