//! Outbound live-migration steps and the inbound receive polling loop, ported from
//! `DomainInstance.py`'s `migrate()`/`receive_migrate()` methods. The receive loop in
//! particular used to drive a retry count via a caught libvirt exception; here it is a
//! plain sum type the caller matches on instead of exception-as-control-flow.

use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys::{VIR_DOMAIN_RUNNING, VIR_MIGRATE_LIVE};

use pvc_types::enums::MigrationMethod;

use crate::error::VmError;
use crate::libvirt_conn::LibvirtConn;

const RECEIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What happened when attempting the outbound live-migration leg itself (step 2-3 of
/// the outbound sequence). Cold (shutdown-then-remote-start) fallback is decided by the
/// caller based on this outcome plus the `migration_fallback` config flag.
#[derive(Debug)]
pub enum OutboundOutcome {
    /// Live migration completed; the domain is now running on the target.
    Completed,
    /// Could not even open a connection to the target; the caller should abort and
    /// restore `/node` to this node.
    ConnectFailed(String),
    /// The migration attempt itself failed after a connection was established.
    MigrateFailed(String),
    /// `migration_method = none`: live migration was never attempted.
    Skipped,
}

/// Runs the outbound leg: opens `qemu+tcp://target_node/system` and invokes
/// `VIR_MIGRATE_LIVE`, unless `method` explicitly opts out of live migration.
pub fn migrate_out(
    local: &Connect,
    uuid: &str,
    target_node: &str,
    method: Option<MigrationMethod>,
) -> OutboundOutcome {
    if method == Some(MigrationMethod::NoneExplicit) {
        return OutboundOutcome::Skipped;
    }

    let domain = match Domain::lookup_by_uuid_string(local, uuid) {
        Ok(d) => d,
        Err(e) => return OutboundOutcome::MigrateFailed(e.to_string()),
    };

    let remote = match LibvirtConn::open_remote(target_node) {
        Ok(c) => c,
        Err(VmError::Connect { reason, .. }) => return OutboundOutcome::ConnectFailed(reason),
        Err(e) => return OutboundOutcome::ConnectFailed(e.to_string()),
    };

    info!("migrating domain {} to {} (live)", uuid, target_node);
    let result = domain.migrate(&remote, VIR_MIGRATE_LIVE, None, None, 0);
    let _ = remote.close();

    match result {
        Ok(_) => OutboundOutcome::Completed,
        Err(e) => OutboundOutcome::MigrateFailed(e.to_string()),
    }
}

/// Outcome of polling for an inbound migration's domain to appear, replacing the
/// original receive loop's exception-driven retry/timeout logic with an explicit sum
/// type the caller matches exhaustively.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    StillReceiving,
    Running,
    TimedOut,
    Disappeared,
}

/// One check of whether `uuid` has appeared and reached `RUNNING` on `local` yet.
/// Never reports a timeout itself; the caller tracks the deadline across calls.
fn poll_once(local: &Connect, uuid: &str) -> ReceiveOutcome {
    match Domain::lookup_by_uuid_string(local, uuid) {
        Ok(domain) => match domain.get_state() {
            Ok((state, _)) if state == VIR_DOMAIN_RUNNING => ReceiveOutcome::Running,
            Ok(_) => ReceiveOutcome::StillReceiving,
            Err(e) => {
                warn!("error polling receiving domain {}: {}", uuid, e);
                ReceiveOutcome::Disappeared
            }
        },
        // Not yet defined by the incoming migration stream; keep waiting.
        Err(_) => ReceiveOutcome::StillReceiving,
    }
}

/// Polls the local connection for `uuid` to appear and reach `RUNNING`, for up to
/// `timeout`. Sleeps [`RECEIVE_POLL_INTERVAL`] between checks; the busy flag held by
/// the caller is what keeps a second receive attempt from racing this one.
pub fn await_receive(local: &Connect, uuid: &str, timeout: Duration) -> ReceiveOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match poll_once(local, uuid) {
            ReceiveOutcome::StillReceiving => {}
            outcome => return outcome,
        }

        if Instant::now() >= deadline {
            return ReceiveOutcome::TimedOut;
        }
        thread::sleep(RECEIVE_POLL_INTERVAL);
    }
}
