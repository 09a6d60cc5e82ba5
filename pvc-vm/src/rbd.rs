//! RBD lock flush: the force-start prerequisite after a fence. The fenced node's
//! libvirt/qemu process may still hold an exclusive watch on the VM's RBD volumes;
//! starting the domain elsewhere without breaking those locks first would corrupt the
//! image. Shells out to the `rbd` CLI the same way `pvc-network` shells out to `ip`/
//! `nft`, since the `zookeeper`/`virt` dependency stack has no native Ceph binding.

use std::process::Command;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Deserialize;

use crate::error::{VmError, VmResult};

/// One `<disk>` backed by an RBD image, as `pool/image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbdDisk {
    pub pool: String,
    pub image: String,
}

impl RbdDisk {
    pub fn spec(&self) -> String {
        format!("{}/{}", self.pool, self.image)
    }
}

/// Scans a domain's libvirt XML for `<disk><source protocol="rbd" name="pool/image">`.
pub fn parse_rbd_disks(xml: &str) -> Vec<RbdDisk> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut disks = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.name().as_ref() == b"source" => {
                let mut protocol = None;
                let mut name = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"protocol" => protocol = attr.unescape_value().ok().map(|v| v.into_owned()),
                        b"name" => name = attr.unescape_value().ok().map(|v| v.into_owned()),
                        _ => {}
                    }
                }
                if protocol.as_deref() == Some("rbd") {
                    if let Some((pool, image)) = name.as_deref().and_then(|n| n.split_once('/')) {
                        disks.push(RbdDisk {
                            pool: pool.to_string(),
                            image: image.to_string(),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    disks
}

#[derive(Debug, Deserialize)]
struct RbdLockEntry {
    id: String,
    locker: String,
}

/// Lists and removes every lock on `disk` whose locker address mentions `fenced_node`.
fn flush_disk_locks(disk: &RbdDisk, fenced_node: &str) -> VmResult<()> {
    let spec = disk.spec();
    let output = Command::new("rbd")
        .args(["lock", "list", &spec, "--format", "json"])
        .output()
        .map_err(|e| VmError::Libvirt(format!("rbd lock list {}: {}", spec, e)))?;
    if !output.status.success() {
        return Err(VmError::Libvirt(format!(
            "rbd lock list {} failed: {}",
            spec,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let locks: Vec<RbdLockEntry> = serde_json::from_slice(&output.stdout).unwrap_or_default();
    for lock in locks {
        if !lock.locker.contains(fenced_node) {
            continue;
        }
        let _ = Command::new("rbd")
            .args(["lock", "remove", &spec, &lock.id, &lock.locker])
            .status();
    }
    Ok(())
}

/// Flushes locks on every RBD disk in `domain_xml` held by `fenced_node`.
pub fn flush_locks(domain_xml: &str, fenced_node: &str) -> VmResult<()> {
    let disks = parse_rbd_disks(domain_xml);
    if disks.is_empty() {
        return Ok(());
    }
    for disk in &disks {
        flush_disk_locks(disk, fenced_node)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rbd_disks_out_of_domain_xml() {
        let xml = r#"
            <domain>
              <devices>
                <disk type='network' device='disk'>
                  <source protocol='rbd' name='vms/vm1-disk0'>
                    <host name='10.0.0.1' port='6789'/>
                  </source>
                </disk>
                <disk type='file' device='cdrom'>
                  <source file='/var/lib/libvirt/images/seed.iso'/>
                </disk>
              </devices>
            </domain>
        "#;
        let disks = parse_rbd_disks(xml);
        assert_eq!(
            disks,
            vec![RbdDisk {
                pool: "vms".to_string(),
                image: "vm1-disk0".to_string(),
            }]
        );
    }

    #[test]
    fn ignores_non_rbd_disks() {
        let xml = "<domain><devices><disk><source file='/tmp/x.qcow2'/></disk></devices></domain>";
        assert!(parse_rbd_disks(xml).is_empty());
    }
}
