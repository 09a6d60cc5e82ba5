//! Floating address add/remove, ported from `common.py`'s `createIPAddress`/
//! `removeIPAddress`. Each add is followed by a gratuitous announce: `arping` for an
//! IPv4 address, `ndisc6`'s `ndisc6 -q -r` neighbour advertisement for an IPv6 one.

use crate::error::PrimaryResult;
use crate::os_command::{run, run_background, run_best_effort};

/// The three floating addresses the acquire/release sequences manage, in the order
/// the spec's acquire sequence adds them (and release removes them in reverse).
#[derive(Debug, Clone)]
pub struct FloatingIpConfig {
    pub vni_dev: String,
    /// `ip/mask` on `vni_dev`, the cluster-wide floating management address.
    pub vni_floating_ip: String,
    pub upstream_dev: String,
    /// `ip/mask` on `upstream_dev`, the external management address.
    pub upstream_floating_ip: String,
}

struct FloatingAddress<'a> {
    ip: &'a str,
    mask: &'a str,
    dev: &'a str,
}

fn split_cidr(addr: &str) -> Option<(&str, &str)> {
    addr.split_once('/')
}

fn addresses(config: &FloatingIpConfig) -> PrimaryResult<Vec<FloatingAddress<'_>>> {
    let (vni_ip, vni_mask) = split_cidr(&config.vni_floating_ip).ok_or_else(|| {
        crate::error::PrimaryError::Command(format!("malformed vni_floating_ip {}", config.vni_floating_ip))
    })?;
    let (up_ip, up_mask) = split_cidr(&config.upstream_floating_ip).ok_or_else(|| {
        crate::error::PrimaryError::Command(format!(
            "malformed upstream_floating_ip {}",
            config.upstream_floating_ip
        ))
    })?;
    Ok(vec![
        FloatingAddress { ip: "169.254.169.254", mask: "32", dev: "lo" },
        FloatingAddress { ip: vni_ip, mask: vni_mask, dev: "brcluster" },
        FloatingAddress { ip: up_ip, mask: up_mask, dev: &config.upstream_dev },
    ])
}

fn announce(addr: &FloatingAddress) {
    if addr.ip.contains(':') {
        run_background(
            format!("gratuitous NA for {}", addr.ip),
            "ndisc6",
            vec!["-q".to_string(), "-r".to_string(), addr.ip.to_string(), addr.dev.to_string()],
        );
    } else {
        run_background(
            format!("gratuitous ARP for {}", addr.ip),
            "arping",
            vec![
                "-A".to_string(),
                "-c3".to_string(),
                "-I".to_string(),
                addr.dev.to_string(),
                "-P".to_string(),
                "-U".to_string(),
                "-S".to_string(),
                addr.ip.to_string(),
                addr.ip.to_string(),
            ],
        );
    }
}

fn add(addr: &FloatingAddress) -> PrimaryResult<()> {
    let cidr = format!("{}/{}", addr.ip, addr.mask);
    run("add floating address", "ip", &["address", "add", &cidr, "dev", addr.dev])?;
    announce(addr);
    Ok(())
}

fn remove(addr: &FloatingAddress) {
    let cidr = format!("{}/{}", addr.ip, addr.mask);
    run_best_effort("remove floating address", "ip", &["address", "delete", &cidr, "dev", addr.dev]);
}

/// Step 2 of the acquire sequence: metadata link-local, then the cluster floating IP,
/// then the upstream floating IP, each followed by its gratuitous announce.
pub fn create_all(config: &FloatingIpConfig) -> PrimaryResult<()> {
    for addr in addresses(config)? {
        add(&addr)?;
    }
    Ok(())
}

/// Step 4 of the release sequence: reverse order of `create_all`, best-effort since
/// the device or address may already be gone.
pub fn remove_all(config: &FloatingIpConfig) {
    match addresses(config) {
        Ok(mut addrs) => {
            addrs.reverse();
            for addr in &addrs {
                remove(addr);
            }
        }
        Err(err) => log::warn!("could not compute floating addresses to remove: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> FloatingIpConfig {
        FloatingIpConfig {
            vni_dev: "bond0.100".to_string(),
            vni_floating_ip: "10.0.0.1/24".to_string(),
            upstream_dev: "bond0".to_string(),
            upstream_floating_ip: "192.168.1.10/24".to_string(),
        }
    }

    #[test]
    fn addresses_are_ordered_metadata_then_cluster_then_upstream() {
        let addrs = addresses(&sample_config()).unwrap();
        assert_eq!(addrs[0].ip, "169.254.169.254");
        assert_eq!(addrs[0].dev, "lo");
        assert_eq!(addrs[1].ip, "10.0.0.1");
        assert_eq!(addrs[1].dev, "brcluster");
        assert_eq!(addrs[2].ip, "192.168.1.10");
        assert_eq!(addrs[2].dev, "bond0");
    }

    #[test]
    fn malformed_cidr_is_rejected() {
        let mut config = sample_config();
        config.vni_floating_ip = "10.0.0.1".to_string();
        assert!(addresses(&config).is_err());
    }
}
