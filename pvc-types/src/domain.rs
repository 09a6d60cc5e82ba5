use crate::enums::{MigrationMethod, NodeSelector, VmDesiredState};

/// A snapshot of a `/domains/<uuid>` entity as reconstructed from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSnapshot {
    pub uuid: String,
    pub name: String,
    pub xml: String,
    pub state: VmDesiredState,
    pub node: String,
    pub lastnode: Option<String>,
    pub failed_reason: Option<String>,
    pub node_limit: Vec<String>,
    pub node_selector: NodeSelector,
    pub node_autostart: bool,
    pub migration_method: Option<MigrationMethod>,
    pub tags: Vec<String>,
}

impl DomainSnapshot {
    /// `node_limit`, if non-empty, must contain the current `node` value unless the
    /// VM is migrating.
    pub fn node_limit_satisfied(&self) -> bool {
        if self.node_limit.is_empty() {
            return true;
        }
        if matches!(self.state, VmDesiredState::Migrate | VmDesiredState::Unmigrate) {
            return true;
        }
        self.node_limit.iter().any(|n| n == &self.node)
    }

    /// Whether `node` is allowed to receive this VM given its `node_limit` CSV.
    pub fn permits_node(&self, node: &str) -> bool {
        self.node_limit.is_empty() || self.node_limit.iter().any(|n| n == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DomainSnapshot {
        DomainSnapshot {
            uuid: "11111111-1111-1111-1111-111111111111".into(),
            name: "test".into(),
            xml: String::new(),
            state: VmDesiredState::Start,
            node: "hv1".into(),
            lastnode: None,
            failed_reason: None,
            node_limit: Vec::new(),
            node_selector: NodeSelector::Mem,
            node_autostart: false,
            migration_method: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn empty_node_limit_permits_everything() {
        let d = base();
        assert!(d.permits_node("hv2"));
        assert!(d.node_limit_satisfied());
    }

    #[test]
    fn node_limit_excludes_other_nodes() {
        let mut d = base();
        d.node_limit = vec!["hv1".into(), "hv3".into()];
        assert!(d.permits_node("hv1"));
        assert!(!d.permits_node("hv2"));
        assert!(d.node_limit_satisfied());
    }

    #[test]
    fn node_limit_violation_allowed_during_migration() {
        let mut d = base();
        d.node_limit = vec!["hv3".into()];
        d.state = VmDesiredState::Migrate;
        assert!(d.node_limit_satisfied());
    }
}
