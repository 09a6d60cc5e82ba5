use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $variant:ident => $wire:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const FIELD: &'static str = stringify!($name);

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok($name::$variant), )+
                    other => Err(TypeError::InvalidField {
                        field: Self::FIELD,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Whether a node participates in coordinator duties (primary election, DNS/DHCP,
    /// floating IPs) or is hypervisor-only.
    DaemonMode {
        Coordinator => "coordinator",
        Hypervisor => "hypervisor",
    }
}

wire_enum! {
    /// Overall daemon health as seen by peers via `/nodes/<name>/daemon_state`.
    DaemonState {
        Init => "init",
        Run => "run",
        Dead => "dead",
        Stop => "stop",
    }
}

wire_enum! {
    /// Primary-role transition state, `/nodes/<name>/router_state`.
    RouterState {
        Primary => "primary",
        Secondary => "secondary",
        Client => "client",
        Takeover => "takeover",
        Relinquish => "relinquish",
    }
}

wire_enum! {
    /// Node-local VM-drain state, `/nodes/<name>/domain_state`. Named `NodeDomainState`
    /// (rather than the ambiguous "domain_state" of the wire schema) to keep it distinct
    /// from a VM's own `VmObservedState`.
    NodeDomainState {
        Ready => "ready",
        Flush => "flush",
        Flushed => "flushed",
        Unflush => "unflush",
    }
}

wire_enum! {
    /// Desired state of a VM, `/domains/<uuid>/state`.
    VmDesiredState {
        Start => "start",
        Restart => "restart",
        Shutdown => "shutdown",
        Stop => "stop",
        Disable => "disable",
        Migrate => "migrate",
        Unmigrate => "unmigrate",
        Provision => "provision",
        Fail => "fail",
        Import => "import",
        Restore => "restore",
    }
}

/// Observed libvirt domain state, collapsed from the full libvirt state machine to the
/// subset the action-selection table distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmObservedState {
    Running,
    Shutoff,
    Paused,
    Absent,
}

impl fmt::Display for VmObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmObservedState::Running => "running",
            VmObservedState::Shutoff => "shutoff",
            VmObservedState::Paused => "paused",
            VmObservedState::Absent => "absent",
        };
        f.write_str(s)
    }
}

wire_enum! {
    /// Migration/placement target-selection algorithm, `/domains/<uuid>/node_selector`.
    NodeSelector {
        Mem => "mem",
        MemProv => "memprov",
        Vcpus => "vcpus",
        Vms => "vms",
        Load => "load",
        None => "none",
    }
}

wire_enum! {
    /// `/domains/<uuid>/migration_method`.
    MigrationMethod {
        NoneExplicit => "none",
        Live => "live",
        ShutdownOnly => "shutdown",
    }
}

wire_enum! {
    /// `/networks/<vni>/type`.
    NetworkType {
        Managed => "managed",
        Bridged => "bridged",
    }
}

wire_enum! {
    /// Outcome of the successful/failed fence policy configuration knobs.
    FencePolicy {
        Migrate => "migrate",
        NoneExplicit => "none",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_wire_strings() {
        assert_eq!(DaemonState::Run.as_str(), "run");
        assert_eq!("run".parse::<DaemonState>().unwrap(), DaemonState::Run);
        assert!("bogus".parse::<DaemonState>().is_err());
    }

    #[test]
    fn router_state_covers_all_transitions() {
        for s in ["primary", "secondary", "client", "takeover", "relinquish"] {
            assert_eq!(s.parse::<RouterState>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn node_selector_parses_all_variants() {
        for s in ["mem", "memprov", "vcpus", "vms", "load", "none"] {
            assert!(s.parse::<NodeSelector>().is_ok());
        }
    }
}
