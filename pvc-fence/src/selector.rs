//! Migration/placement target selection. Ported from `common.py`'s `getNodes`/
//! `findTargetNode*` family, generalized to a single selector-parameterized function
//! and given the spec's lexicographic tie-break (the original just keeps the first
//! candidate it iterates over, which isn't deterministic against `/nodes`' children
//! order).

use pvc_types::enums::NodeSelector;
use pvc_types::NodeSnapshot;

/// `node_selector = none` defers to the cluster-wide default configured for migration.
pub fn resolve_selector(selector: NodeSelector, cluster_default: NodeSelector) -> NodeSelector {
    if selector == NodeSelector::None {
        cluster_default
    } else {
        selector
    }
}

/// Candidate set per §4.5.4: schedulable nodes, honoring an optional `node_limit`,
/// excluding the domain's current owner.
pub fn eligible_candidates<'a>(
    nodes: &'a [NodeSnapshot],
    node_limit: &[String],
    exclude: &str,
) -> Vec<&'a NodeSnapshot> {
    nodes
        .iter()
        .filter(|n| n.name != exclude)
        .filter(|n| node_limit.is_empty() || node_limit.iter().any(|l| l == &n.name))
        .filter(|n| n.is_schedulable())
        .collect()
}

fn best_by<'a, F>(candidates: &[&'a NodeSnapshot], larger_is_better: bool, metric: F) -> Option<&'a NodeSnapshot>
where
    F: Fn(&NodeSnapshot) -> f64,
{
    candidates.iter().copied().fold(None, |best, node| match best {
        None => Some(node),
        Some(current) => {
            let (m_node, m_cur) = (metric(node), metric(current));
            let strictly_better = if larger_is_better { m_node > m_cur } else { m_node < m_cur };
            let tied_but_earlier_name = m_node == m_cur && node.name < current.name;
            if strictly_better || tied_but_earlier_name {
                Some(node)
            } else {
                Some(current)
            }
        }
    })
}

/// Picks a target node name out of `candidates` per `selector`. `selector` must
/// already be resolved (see [`resolve_selector`]) — `NodeSelector::None` here always
/// returns `None`.
pub fn select_target(candidates: &[&NodeSnapshot], selector: NodeSelector) -> Option<String> {
    let chosen = match selector {
        NodeSelector::Mem => best_by(candidates, true, |n| n.alloc_free() as f64),
        NodeSelector::MemProv => best_by(candidates, false, |n| n.memalloc as f64),
        NodeSelector::Load => best_by(candidates, false, |n| n.cpuload),
        NodeSelector::Vcpus => best_by(candidates, false, |n| n.vcpualloc as f64),
        NodeSelector::Vms => best_by(candidates, false, |n| n.domains_count as f64),
        NodeSelector::None => None,
    };
    chosen.map(|n| n.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvc_types::enums::{DaemonState, NodeDomainState};

    fn node(name: &str) -> NodeSnapshot {
        let mut n = NodeSnapshot::unknown(name);
        n.daemon_state = DaemonState::Run;
        n.domain_state = NodeDomainState::Ready;
        n
    }

    #[test]
    fn mem_selector_prefers_most_alloc_free() {
        let mut a = node("a");
        a.memused = 1000;
        a.memfree = 1000;
        a.memalloc = 500;
        let mut b = node("b");
        b.memused = 1000;
        b.memfree = 1000;
        b.memalloc = 100;
        let candidates = [&a, &b];
        assert_eq!(select_target(&candidates, NodeSelector::Mem), Some("b".to_string()));
    }

    #[test]
    fn memprov_selector_prefers_least_allocated() {
        let mut a = node("a");
        a.memalloc = 2000;
        let mut b = node("b");
        b.memalloc = 500;
        let candidates = [&a, &b];
        assert_eq!(select_target(&candidates, NodeSelector::MemProv), Some("b".to_string()));
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut b = node("bravo");
        b.memalloc = 100;
        let mut a = node("alpha");
        a.memalloc = 100;
        let candidates = [&b, &a];
        assert_eq!(select_target(&candidates, NodeSelector::MemProv), Some("alpha".to_string()));
    }

    #[test]
    fn empty_candidate_set_yields_none() {
        let candidates: [&NodeSnapshot; 0] = [];
        assert_eq!(select_target(&candidates, NodeSelector::Load), None);
    }

    #[test]
    fn eligible_candidates_excludes_current_owner_and_unschedulable() {
        let a = node("a");
        let mut dead = node("dead");
        dead.daemon_state = DaemonState::Dead;
        let nodes = vec![a.clone(), dead, node("owner")];
        let candidates = eligible_candidates(&nodes, &[], "owner");
        let names: Vec<&str> = candidates.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn node_limit_restricts_candidate_set() {
        let nodes = vec![node("a"), node("b")];
        let limit = vec!["b".to_string()];
        let candidates = eligible_candidates(&nodes, &limit, "owner");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "b");
    }

    #[test]
    fn none_selector_resolves_to_cluster_default() {
        assert_eq!(resolve_selector(NodeSelector::None, NodeSelector::Load), NodeSelector::Load);
        assert_eq!(resolve_selector(NodeSelector::Vms, NodeSelector::Load), NodeSelector::Vms);
    }
}
