//! `DomainObject`: the per-VM state machine. Ported from `DomainInstance.py`'s
//! `manage_vm_state`, restructured around a dedicated worker thread per domain instead
//! of Python's `ZooKeeper` callback-on-the-watch-thread approach — `/state`/`/node`
//! watches only ever enqueue a reconcile message, so a slow action (migration, a 90s
//! shutdown poll) never blocks delivery of the next watch event for an unrelated
//! entity.

use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};
use virt::domain::Domain as LibvirtDomain;
use virt::sys::{VIR_DOMAIN_BLOCKED, VIR_DOMAIN_PAUSED, VIR_DOMAIN_RUNNING, VIR_DOMAIN_SHUTOFF};

use pvc_registry::RegistryMember;
use pvc_store::{StoreClient, TxnOp};
use pvc_types::enums::{MigrationMethod, NodeSelector, VmDesiredState, VmObservedState};
use pvc_types::keys::{DomainKey, NodeKey};
use pvc_types::DomainSnapshot;

use crate::actions::{select_action, VmAction};
use crate::busy::BusyFlags;
use crate::libvirt_conn::LibvirtConn;
use crate::migration::{self, OutboundOutcome, ReceiveOutcome};
use crate::rbd;
use crate::snapshot_io;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SHUTDOWN_POLL_MAX: Duration = Duration::from_secs(90);

/// Process-wide settings read from the daemon config at startup, mirroring
/// `pvc_network`'s `NetworkRuntimeConfig`/`init` pattern: `RegistryMember::construct`'s
/// fixed signature leaves no room for a config parameter.
#[derive(Debug, Clone, Copy)]
pub struct VmRuntimeConfig {
    pub migration_fallback: bool,
    pub receive_timeout: Duration,
}

static RUNTIME_CONFIG: OnceLock<VmRuntimeConfig> = OnceLock::new();

pub fn init(config: VmRuntimeConfig) {
    let _ = RUNTIME_CONFIG.set(config);
}

fn config() -> VmRuntimeConfig {
    RUNTIME_CONFIG.get().copied().unwrap_or(VmRuntimeConfig {
        migration_fallback: true,
        receive_timeout: Duration::from_secs(90),
    })
}

fn current_node() -> &'static str {
    proxmox_sys::nodename()
}

/// Reads declared `<memory unit='KiB'>`/`<vcpu>` out of domain XML, for allocation
/// accounting (the facts tick's `memalloc`/`vcpualloc`, which reflect what is declared
/// rather than what libvirt currently reports in use).
fn declared_resources(xml: &str) -> (u64, u32) {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let (mut memory_kib, mut vcpus) = (0u64, 0u32);
    let (mut in_memory, mut in_vcpu) = (false, false);
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"memory" => in_memory = true,
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"vcpu" => in_vcpu = true,
            Ok(Event::Text(e)) if in_memory => {
                if let Ok(text) = e.unescape() {
                    memory_kib = text.trim().parse().unwrap_or(0);
                }
            }
            Ok(Event::Text(e)) if in_vcpu => {
                if let Ok(text) = e.unescape() {
                    vcpus = text.trim().parse().unwrap_or(0);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"memory" => in_memory = false,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"vcpu" => in_vcpu = false,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    (memory_kib / 1024, vcpus)
}

fn observe(conn: &LibvirtConn, uuid: &str) -> VmObservedState {
    let result = conn.with_local(|c| {
        let domain = LibvirtDomain::lookup_by_uuid_string(c, uuid)
            .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))?;
        domain
            .get_state()
            .map(|(state, _)| state)
            .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))
    });

    match result {
        Ok(VIR_DOMAIN_RUNNING) | Ok(VIR_DOMAIN_BLOCKED) => VmObservedState::Running,
        Ok(VIR_DOMAIN_PAUSED) => VmObservedState::Paused,
        Ok(VIR_DOMAIN_SHUTOFF) => VmObservedState::Shutoff,
        Ok(_) => VmObservedState::Shutoff,
        Err(_) => VmObservedState::Absent,
    }
}

struct Inner {
    snapshot: DomainSnapshot,
    declared_mib: u64,
    declared_vcpus: u32,
}

/// The business logic and shared state for one domain, held behind an `Arc` so both
/// the owning `DomainObject` and its worker thread can reach it without cloning the
/// state itself.
struct DomainCore {
    uuid: String,
    store: Arc<dyn StoreClient>,
    conn: LibvirtConn,
    busy: BusyFlags,
    inner: Mutex<Inner>,
}

impl DomainCore {
    fn snapshot(&self) -> DomainSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    fn declared_allocation(&self) -> (u64, u32) {
        let inner = self.inner.lock().unwrap();
        (inner.declared_mib, inner.declared_vcpus)
    }

    fn set_failed(&self, reason: &str) {
        warn!("domain {}: {}", self.uuid, reason);
        let _ = self.store.write_txn(vec![
            TxnOp::write(DomainKey::state(&self.uuid), VmDesiredState::Fail.as_str()),
            TxnOp::write(DomainKey::failed_reason(&self.uuid), reason),
        ]);
    }

    fn set_state(&self, state: VmDesiredState) {
        let _ = self
            .store
            .write_txn(vec![TxnOp::write(DomainKey::state(&self.uuid), state.as_str())]);
    }

    fn reconcile(&self) {
        let snapshot = match snapshot_io::load(self.store.as_ref(), &self.uuid) {
            Ok(s) => s,
            Err(err) => {
                warn!("domain {}: failed to load snapshot: {}", self.uuid, err);
                return;
            }
        };
        {
            let (mib, vcpus) = declared_resources(&snapshot.xml);
            let mut inner = self.inner.lock().unwrap();
            inner.snapshot = snapshot.clone();
            inner.declared_mib = mib;
            inner.declared_vcpus = vcpus;
        }

        let observed = observe(&self.conn, &self.uuid);
        let node_is_me = snapshot.node == current_node();
        let action = select_action(snapshot.state, observed, node_is_me);
        self.perform(action, &snapshot);
    }

    fn perform(&self, action: VmAction, snapshot: &DomainSnapshot) {
        match action {
            VmAction::NoAction | VmAction::NoopAlreadyRunning => {}
            VmAction::DefineAndStart => self.define_and_start(snapshot),
            VmAction::GracefulRestart => self.graceful_restart(snapshot),
            VmAction::GracefulShutdown => self.graceful_shutdown(false),
            VmAction::ForceStop => self.force_stop(),
            VmAction::DisableShutdown => self.graceful_shutdown(true),
            VmAction::MigrateOutbound => self.migrate_outbound(snapshot),
            VmAction::MigrateReceive => self.migrate_receive(),
            VmAction::ResetStuckMigrate => self.set_state(VmDesiredState::Start),
            VmAction::Unmigrate => self.unmigrate(snapshot),
            VmAction::DestroyForeign => self.destroy_foreign(),
        }
    }

    fn define_and_start(&self, snapshot: &DomainSnapshot) {
        let Some(_guard) = self.busy.enter(&self.busy.in_start) else {
            return;
        };
        if let Some(fenced_from) = snapshot.lastnode.as_deref().filter(|n| !n.is_empty()) {
            if let Err(err) = rbd::flush_locks(&snapshot.xml, fenced_from) {
                warn!("domain {}: rbd lock flush failed: {}", self.uuid, err);
            }
        }
        let xml = snapshot.xml.clone();
        let result = self.conn.with_local(|c| {
            LibvirtDomain::create_xml(c, &xml, 0)
                .map(|_| ())
                .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))
        });
        match result {
            Ok(()) => {
                info!("domain {}: started", self.uuid);
                self.add_to_running_domains();
            }
            Err(err) => self.set_failed(&format!("failed to start: {}", err)),
        }
    }

    fn add_to_running_domains(&self) {
        let node = current_node();
        let existing = self
            .store
            .read_string(&NodeKey::running_domains(node))
            .ok()
            .flatten()
            .unwrap_or_default();
        let mut list: Vec<&str> = existing.split_whitespace().collect();
        if !list.contains(&self.uuid.as_str()) {
            list.push(&self.uuid);
        }
        let _ = self
            .store
            .write_txn(vec![TxnOp::write(NodeKey::running_domains(node), list.join(" "))]);
    }

    fn remove_from_running_domains(&self) {
        let node = current_node();
        let existing = self
            .store
            .read_string(&NodeKey::running_domains(node))
            .ok()
            .flatten()
            .unwrap_or_default();
        let remaining: Vec<&str> = existing.split_whitespace().filter(|id| *id != self.uuid).collect();
        let _ = self
            .store
            .write_txn(vec![TxnOp::write(NodeKey::running_domains(node), remaining.join(" "))]);
    }

    fn graceful_shutdown(&self, disable: bool) {
        let Some(_guard) = self.busy.enter(&self.busy.in_shutdown) else {
            return;
        };
        let shutdown_result = self.conn.with_local(|c| {
            let domain = LibvirtDomain::lookup_by_uuid_string(c, &self.uuid)
                .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))?;
            domain
                .shutdown()
                .map(|_| ())
                .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))
        });
        if let Err(err) = shutdown_result {
            warn!("domain {}: shutdown call failed: {}", self.uuid, err);
        }

        let mut waited = Duration::ZERO;
        while waited < SHUTDOWN_POLL_MAX {
            if observe(&self.conn, &self.uuid) == VmObservedState::Shutoff {
                self.set_state(if disable { VmDesiredState::Disable } else { VmDesiredState::Stop });
                return;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
            waited += SHUTDOWN_POLL_INTERVAL;
        }
        warn!("domain {}: graceful shutdown timed out, escalating to stop", self.uuid);
        self.destroy_locally();
        if disable {
            self.set_state(VmDesiredState::Disable);
        }
    }

    fn destroy_locally(&self) {
        let result = self.conn.with_local(|c| {
            let domain = LibvirtDomain::lookup_by_uuid_string(c, &self.uuid)
                .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))?;
            domain
                .destroy()
                .map(|_| ())
                .map_err(|e| crate::error::VmError::Libvirt(e.to_string()))
        });
        if let Err(err) = result {
            warn!("domain {}: destroy failed: {}", self.uuid, err);
        }
    }

    fn force_stop(&self) {
        let Some(_guard) = self.busy.enter(&self.busy.in_stop) else {
            return;
        };
        self.destroy_locally();
        self.set_state(VmDesiredState::Stop);
    }

    /// `any` desired state, `RUNNING` here but `/node` assigned elsewhere: the
    /// workload has already moved on, so this side just tidies up.
    fn destroy_foreign(&self) {
        self.destroy_locally();
    }

    fn graceful_restart(&self, snapshot: &DomainSnapshot) {
        let Some(_guard) = self.busy.enter(&self.busy.in_restart) else {
            return;
        };
        self.graceful_shutdown(false);
        self.define_and_start(snapshot);
        self.set_state(VmDesiredState::Start);
    }

    fn migrate_outbound(&self, snapshot: &DomainSnapshot) {
        let Some(_guard) = self.busy.enter(&self.busy.in_migrate) else {
            return;
        };
        let target = snapshot.node.clone();
        let outcome = self
            .conn
            .with_local(|local| Ok(migration::migrate_out(local, &self.uuid, &target, snapshot.migration_method)))
            .unwrap_or_else(|_| OutboundOutcome::ConnectFailed("local connection unavailable".to_string()));

        match outcome {
            OutboundOutcome::Completed => {
                self.remove_from_running_domains();
                self.set_state(VmDesiredState::Start);
            }
            OutboundOutcome::Skipped => self.cold_migrate(snapshot),
            OutboundOutcome::ConnectFailed(reason) => {
                warn!("domain {}: could not reach {}: {}", self.uuid, target, reason);
                let _ = self.store.write_txn(vec![
                    TxnOp::write(DomainKey::node(&self.uuid), current_node()),
                    TxnOp::write(DomainKey::state(&self.uuid), VmDesiredState::Start.as_str()),
                ]);
            }
            OutboundOutcome::MigrateFailed(reason) => {
                warn!("domain {}: live migration failed: {}", self.uuid, reason);
                // An explicit `migration_method = live` opts out of the cold fallback;
                // anything else (including unset) defers to the global config flag.
                let fallback_allowed =
                    config().migration_fallback && snapshot.migration_method != Some(MigrationMethod::Live);
                if fallback_allowed {
                    self.cold_migrate(snapshot);
                } else {
                    self.set_failed(&format!("live migration failed: {}", reason));
                }
            }
        }
    }

    /// Step 3 of the outbound sequence when live migration isn't possible: shut down
    /// locally and let the target cold-start the VM, which is already named in
    /// `/node`.
    fn cold_migrate(&self, snapshot: &DomainSnapshot) {
        if let Some(from) = snapshot.lastnode.as_deref().filter(|n| !n.is_empty()) {
            if let Err(err) = rbd::flush_locks(&snapshot.xml, from) {
                warn!("domain {}: rbd lock flush before cold migrate failed: {}", self.uuid, err);
            }
        }
        self.graceful_shutdown(false);
        self.remove_from_running_domains();
        self.set_state(VmDesiredState::Start);
    }

    fn migrate_receive(&self) {
        let Some(_guard) = self.busy.enter(&self.busy.in_receive) else {
            return;
        };
        let outcome = self
            .conn
            .with_local(|local| Ok(migration::await_receive(local, &self.uuid, config().receive_timeout)));
        match outcome {
            Ok(ReceiveOutcome::Running) => {
                info!("domain {}: inbound migration complete", self.uuid);
                self.add_to_running_domains();
                self.set_state(VmDesiredState::Start);
            }
            Ok(ReceiveOutcome::TimedOut) => self.set_failed("receive timeout"),
            Ok(ReceiveOutcome::Disappeared) => self.set_failed("receive: domain disappeared"),
            Ok(ReceiveOutcome::StillReceiving) | Err(_) => {
                debug!("domain {}: still waiting to receive", self.uuid);
            }
        }
    }

    fn unmigrate(&self, snapshot: &DomainSnapshot) {
        let last = snapshot.lastnode.clone().unwrap_or_default();
        let _ = self.store.write_txn(vec![
            TxnOp::write(DomainKey::node(&self.uuid), last),
            TxnOp::write(DomainKey::lastnode(&self.uuid), ""),
            TxnOp::write(DomainKey::state(&self.uuid), VmDesiredState::Migrate.as_str()),
        ]);
    }
}

enum WorkerMsg {
    Reconcile,
    Shutdown,
}

pub struct DomainObject {
    core: Arc<DomainCore>,
    tx: Sender<WorkerMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DomainObject {
    pub fn snapshot(&self) -> DomainSnapshot {
        self.core.snapshot()
    }

    /// Declared memory (MiB) and vCPU count, for `pvc_facts::AllocationSource`.
    pub fn declared_allocation(&self) -> (u64, u32) {
        self.core.declared_allocation()
    }
}

fn empty_snapshot(uuid: &str) -> DomainSnapshot {
    DomainSnapshot {
        uuid: uuid.to_string(),
        name: uuid.to_string(),
        xml: String::new(),
        state: VmDesiredState::Stop,
        node: String::new(),
        lastnode: None,
        failed_reason: None,
        node_limit: Vec::new(),
        node_selector: NodeSelector::None,
        node_autostart: false,
        migration_method: None,
        tags: Vec::new(),
    }
}

impl RegistryMember for DomainObject {
    fn construct(identity: &str, store: Arc<dyn StoreClient>) -> Self {
        let uuid = identity.to_string();
        let snapshot = snapshot_io::load(store.as_ref(), &uuid).unwrap_or_else(|err| {
            warn!("domain {}: failed to load initial snapshot: {}", uuid, err);
            empty_snapshot(&uuid)
        });
        let (declared_mib, declared_vcpus) = declared_resources(&snapshot.xml);

        let core = Arc::new(DomainCore {
            uuid: uuid.clone(),
            store: Arc::clone(&store),
            conn: LibvirtConn::new(),
            busy: BusyFlags::default(),
            inner: Mutex::new(Inner { snapshot, declared_mib, declared_vcpus }),
        });

        let (tx, rx) = unbounded::<WorkerMsg>();
        let worker_core = Arc::clone(&core);
        let handle = thread::spawn(move || loop {
            match rx.recv() {
                Ok(WorkerMsg::Reconcile) => worker_core.reconcile(),
                Ok(WorkerMsg::Shutdown) | Err(_) => break,
            }
        });

        let state_tx = tx.clone();
        let _ = store.watch_data(
            &DomainKey::state(&uuid),
            Box::new(move |_event| {
                let _ = state_tx.send(WorkerMsg::Reconcile);
            }),
        );
        let node_tx = tx.clone();
        let _ = store.watch_data(
            &DomainKey::node(&uuid),
            Box::new(move |_event| {
                let _ = node_tx.send(WorkerMsg::Reconcile);
            }),
        );

        DomainObject {
            core,
            tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    fn teardown(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"
        <domain type='kvm'>
          <name>test-vm</name>
          <memory unit='KiB'>2097152</memory>
          <vcpu placement='static'>4</vcpu>
        </domain>
    "#;

    #[test]
    fn declared_resources_converts_kib_to_mib() {
        let (mib, vcpus) = declared_resources(SAMPLE_XML);
        assert_eq!(mib, 2048);
        assert_eq!(vcpus, 4);
    }

    #[test]
    fn declared_resources_defaults_to_zero_on_missing_fields() {
        let (mib, vcpus) = declared_resources("<domain><name>bare</name></domain>");
        assert_eq!(mib, 0);
        assert_eq!(vcpus, 0);
    }
}
