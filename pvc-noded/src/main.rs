//! Node daemon entry point: wires the config, the store connection, the three
//! reconciler registries, and the primary/fence/facts singletons together, matching
//! `pvcd.py`/`Daemon.py`'s startup sequence phase for phase.

mod bootstrap;
mod os_command;

use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use pvc_fence::{FenceConfig, FenceSupervisor, FenceSupervisorConfig, HardReboot, NodeObject, SuicideWatch};
use pvc_network::NetworkObject;
use pvc_primary::{FloatingIpConfig, PrimaryController, SystemdServices};
use pvc_registry::Coordinator;
use pvc_store::{StoreClient, TxnOp, ZkStoreClient};
use pvc_types::enums::{DaemonState, FencePolicy, NodeSelector};
use pvc_types::keys::{NodeKey, PRIMARY_NODE};
use pvc_vm::DomainObject;

const ZK_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_FLUSH_WAIT: Duration = Duration::from_secs(3);

fn current_node() -> &'static str {
    proxmox_sys::nodename()
}

/// Spawns a dedicated single-thread tokio runtime whose only job is to drive
/// `pvc_daemon`'s signal futures; the rest of the daemon is plain OS threads and
/// never needs an async executor of its own.
fn spawn_signal_handling() {
    thread::spawn(|| {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                warn!("failed to start the signal-handling runtime: {}", err);
                return;
            }
        };
        rt.block_on(async {
            if let Err(err) = pvc_daemon::catch_shutdown_signal(std::future::pending()) {
                warn!("failed to install shutdown signal handler: {}", err);
            }
            if let Err(err) = pvc_daemon::catch_reload_signal(std::future::pending()) {
                warn!("failed to install reload signal handler: {}", err);
            }
            std::future::pending::<()>().await;
        });
    });
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    spawn_signal_handling();

    let config = pvc_config::load().context("failed to load configuration")?;
    let node_name = current_node().to_string();
    info!("starting pvc node daemon on {}", node_name);

    bootstrap::apply_sysctls(&config.vni_dev)?;

    let store: Arc<dyn StoreClient> = Arc::new(
        ZkStoreClient::connect(&config.coordinators, ZK_SESSION_TIMEOUT)
            .context("failed to connect to the coordinator store")?,
    );

    bootstrap::ensure_node_registered(store.as_ref(), &node_name, &config)?;
    bootstrap::ensure_primary_claimed(store.as_ref(), &node_name)?;

    let cluster_default_selector = NodeSelector::from_str(&config.migration_target_selector)
        .context("invalid migration_target_selector in config")?;
    let successful_fence = FencePolicy::from_str(&config.successful_fence)
        .context("invalid successful_fence in config")?;
    let failed_fence =
        FencePolicy::from_str(&config.failed_fence).context("invalid failed_fence in config")?;

    pvc_network::init(pvc_network::NetworkRuntimeConfig {
        vni_dev: config.vni_dev.clone(),
        dnsmasq_dynamic_directory: config.dnsmasq_dynamic_directory(),
        dnsmasq_log_directory: config.dnsmasq_log_directory(),
        nft_dynamic_directory: config.nft_dynamic_directory(),
    });
    pvc_vm::init(pvc_vm::VmRuntimeConfig {
        migration_fallback: config.migration_fallback,
        receive_timeout: Duration::from_secs(config.migration_receive_timeout_secs),
    });
    pvc_fence::node::init(pvc_fence::node::NodeRuntimeConfig {
        cluster_default_selector,
    });

    let coordinator: Arc<Coordinator<NodeObject, NetworkObject, DomainObject>> =
        Arc::new(Coordinator::new(Arc::clone(&store)));
    pvc_fence::node::set_registry(coordinator.nodes());
    coordinator.start().context("failed to arm registry watches")?;

    store.write_txn(vec![TxnOp::write(
        NodeKey::daemon_state(&node_name),
        DaemonState::Run.as_str(),
    )])?;

    let floating = FloatingIpConfig {
        vni_dev: config.vni_dev.clone(),
        vni_floating_ip: config.vni_floating_ip.clone(),
        upstream_dev: config.upstream_dev.clone(),
        upstream_floating_ip: config.upstream_floating_ip.clone(),
    };
    let services = Arc::new(SystemdServices::new(&node_name));
    let primary = PrimaryController::spawn(
        node_name.clone(),
        Arc::clone(&store),
        Arc::clone(coordinator.networks()),
        floating,
        services,
        config.enable_api,
    );

    let suicide = SuicideWatch::spawn(
        Arc::clone(&store),
        Duration::from_secs(config.keepalive_interval),
        config.suicide_intervals,
        Arc::new(HardReboot),
    );

    let fence_supervisor = FenceSupervisor::spawn(
        Arc::clone(&store),
        Arc::clone(coordinator.nodes()),
        FenceSupervisorConfig {
            keepalive_interval: Duration::from_secs(config.keepalive_interval),
            fence_intervals: config.fence_intervals,
            fence: FenceConfig {
                successful_fence,
                failed_fence,
                suicide_intervals: config.suicide_intervals,
                migration_target_selector: cluster_default_selector,
            },
        },
    );

    let facts = pvc_facts::FactsCollector::new(node_name.clone())
        .context("failed to gather static host facts")?;
    let facts_store = Arc::clone(&store);
    let facts_domains = Arc::clone(coordinator.domains());
    let facts_suicide = Arc::clone(&suicide);
    let keepalive_interval = Duration::from_secs(config.keepalive_interval);
    thread::spawn(move || loop {
        if pvc_daemon::is_shutdown_requested() {
            break;
        }
        match facts.tick(facts_store.as_ref(), facts_domains.as_ref()) {
            Ok(()) => facts_suicide.record_success(),
            Err(err) => warn!("facts tick failed: {}", err),
        }
        thread::sleep(keepalive_interval);
    });

    while !pvc_daemon::is_shutdown_requested() {
        thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }

    info!("shutting down");
    let _ = store.write_txn(vec![TxnOp::write(
        NodeKey::daemon_state(&node_name),
        DaemonState::Stop.as_str(),
    )]);
    if store.read_string(PRIMARY_NODE).ok().flatten().as_deref() == Some(node_name.as_str()) {
        let _ = store.write_txn(vec![TxnOp::write(PRIMARY_NODE, "none")]);
    }

    fence_supervisor.shutdown();
    suicide.shutdown();
    primary.shutdown();
    thread::sleep(SHUTDOWN_FLUSH_WAIT);

    info!("pvc node daemon stopped");
    Ok(())
}
