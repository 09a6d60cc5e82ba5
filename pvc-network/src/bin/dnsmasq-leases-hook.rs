//! `dnsmasq --dhcp-script` target: writes dynamically-assigned DHCP leases back into
//! the store. Grounded on `node-daemon/pvcd/VXNetworkInstance.py`'s
//! `--dhcp-script=.../dnsmasq-zookeeper-leases.py` invocation; dnsmasq execs this
//! binary on every `add`/`old`/`del` lease event with `argv[1..]` = `action mac ip
//! [hostname]` and `DNSMASQ_INTERFACE` set to the bridge the lease was handed out on.

use std::env;

use anyhow::{bail, Context, Result};

use pvc_store::{StoreClient, TxnOp, ZkStoreClient};
use pvc_types::keys::NetworkKey;

const ZK_SESSION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

fn vni_from_interface(interface: &str) -> Result<u32> {
    interface
        .strip_prefix("br")
        .context("DNSMASQ_INTERFACE is not one of this daemon's bridge devices")?
        .parse()
        .context("DNSMASQ_INTERFACE does not end in a valid VNI")
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let (Some(action), Some(mac)) = (args.get(1), args.get(2)) else {
        bail!("usage: dnsmasq-leases-hook <add|old|del> <mac> [ip] [hostname]");
    };
    let interface = env::var("DNSMASQ_INTERFACE").context("DNSMASQ_INTERFACE not set")?;
    let vni = vni_from_interface(&interface)?;

    let config = pvc_config::load().context("failed to load configuration")?;
    let store = ZkStoreClient::connect(&config.coordinators, ZK_SESSION_TIMEOUT)
        .context("failed to connect to the coordinator store")?;

    let key = NetworkKey::dhcp_lease(vni, mac);
    match action.as_str() {
        "add" | "old" => {
            let ip = args.get(3).context("missing ip argument")?;
            store.write_txn(vec![TxnOp::write(key, ip.clone())])?;
        }
        "del" => {
            store.write_txn(vec![TxnOp::delete(key)])?;
        }
        other => bail!("unknown dnsmasq lease action {}", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vni_from_bridge_interface() {
        assert_eq!(vni_from_interface("br1001").unwrap(), 1001);
    }

    #[test]
    fn rejects_a_non_bridge_interface() {
        assert!(vni_from_interface("eth0").is_err());
    }
}
