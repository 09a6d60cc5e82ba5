//! Pure action selection: `(desired, observed, node_is_me)` to exactly one action.
//! Kept free of I/O so the table can be exercised directly in unit tests.

use pvc_types::enums::{VmDesiredState, VmObservedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    /// Define the domain from its stored XML and create it; add to `running_domains`.
    DefineAndStart,
    /// Already running and already wanted here; just ensure `running_domains` lists it.
    NoopAlreadyRunning,
    /// A `migrate` request arrived while the domain was already running here (recovering
    /// from a migration that never actually left) — just reset `/state` to `start`.
    ResetStuckMigrate,
    /// Graceful shutdown followed immediately by a fresh start.
    GracefulRestart,
    /// Graceful shutdown, escalating to a forced stop on timeout.
    GracefulShutdown,
    /// Immediate forced stop (`destroy`).
    ForceStop,
    /// Graceful shutdown, leaving `/state = disable`.
    DisableShutdown,
    /// Outbound live migration to the node now named in `/node`.
    MigrateOutbound,
    /// Poll for the domain to appear via inbound migration.
    MigrateReceive,
    /// Swap `/node`/`/lastnode` and re-enter as a migrate.
    Unmigrate,
    /// Running here but assigned elsewhere: destroy locally, the workload has moved.
    DestroyForeign,
    NoAction,
}

pub fn select_action(
    desired: VmDesiredState,
    observed: VmObservedState,
    node_is_me: bool,
) -> VmAction {
    if desired == VmDesiredState::Unmigrate {
        return VmAction::Unmigrate;
    }

    if !node_is_me {
        return if observed == VmObservedState::Running {
            if desired == VmDesiredState::Migrate {
                VmAction::MigrateOutbound
            } else {
                VmAction::DestroyForeign
            }
        } else {
            VmAction::NoAction
        };
    }

    use VmDesiredState::*;
    use VmObservedState::*;
    match (desired, observed) {
        (Start, Absent) | (Start, Shutoff) => VmAction::DefineAndStart,
        (Start, Running) | (Start, Paused) => VmAction::NoopAlreadyRunning,
        (Restart, Running) => VmAction::GracefulRestart,
        (Shutdown, Running) => VmAction::GracefulShutdown,
        (Stop, Running) => VmAction::ForceStop,
        (Disable, Running) => VmAction::DisableShutdown,
        (Migrate, Absent) => VmAction::MigrateReceive,
        (Migrate, Running) => VmAction::ResetStuckMigrate,
        _ => VmAction::NoAction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvc_types::enums::{VmDesiredState as D, VmObservedState as O};

    #[test]
    fn start_from_absent_defines_and_starts() {
        assert_eq!(select_action(D::Start, O::Absent, true), VmAction::DefineAndStart);
        assert_eq!(select_action(D::Start, O::Shutoff, true), VmAction::DefineAndStart);
    }

    #[test]
    fn start_already_running_is_idempotent() {
        assert_eq!(select_action(D::Start, O::Running, true), VmAction::NoopAlreadyRunning);
    }

    #[test]
    fn restart_shutdown_stop_disable_require_running() {
        assert_eq!(select_action(D::Restart, O::Running, true), VmAction::GracefulRestart);
        assert_eq!(select_action(D::Shutdown, O::Running, true), VmAction::GracefulShutdown);
        assert_eq!(select_action(D::Stop, O::Running, true), VmAction::ForceStop);
        assert_eq!(select_action(D::Disable, O::Running, true), VmAction::DisableShutdown);
    }

    #[test]
    fn restart_when_not_running_is_a_noop() {
        assert_eq!(select_action(D::Restart, O::Shutoff, true), VmAction::NoAction);
    }

    #[test]
    fn migrate_absent_on_target_is_receive() {
        assert_eq!(select_action(D::Migrate, O::Absent, true), VmAction::MigrateReceive);
    }

    #[test]
    fn migrate_running_on_target_resets_stuck_state() {
        assert_eq!(select_action(D::Migrate, O::Running, true), VmAction::ResetStuckMigrate);
    }

    #[test]
    fn migrate_running_elsewhere_is_outbound() {
        assert_eq!(select_action(D::Migrate, O::Running, false), VmAction::MigrateOutbound);
    }

    #[test]
    fn any_other_desired_running_elsewhere_is_destroyed_locally() {
        assert_eq!(select_action(D::Stop, O::Running, false), VmAction::DestroyForeign);
        assert_eq!(select_action(D::Start, O::Running, false), VmAction::DestroyForeign);
    }

    #[test]
    fn not_running_and_not_mine_is_a_noop() {
        assert_eq!(select_action(D::Start, O::Absent, false), VmAction::NoAction);
    }

    #[test]
    fn unmigrate_always_wins_regardless_of_observed_state() {
        assert_eq!(select_action(D::Unmigrate, O::Running, true), VmAction::Unmigrate);
        assert_eq!(select_action(D::Unmigrate, O::Absent, false), VmAction::Unmigrate);
    }
}
