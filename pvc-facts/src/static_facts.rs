//! One-time host facts: CPU count, kernel release, OS name, architecture.
//!
//! Grounded on `node-daemon/pvcd/Daemon.py`'s `staticdata` list (`psutil.cpu_count()`
//! plus `uname -s -r -m`), replaced here with `proxmox-sys`'s procfs reader and `nix`'s
//! `uname` wrapper.

use anyhow::{Context, Result};
use pvc_types::StaticNodeData;

pub fn collect() -> Result<StaticNodeData> {
    let cpuinfo =
        proxmox_sys::linux::procfs::read_cpuinfo().context("failed to read /proc/cpuinfo")?;
    let uts = nix::sys::utsname::uname().context("uname() failed")?;

    Ok(StaticNodeData {
        cpu_count: cpuinfo.cpus as u32,
        kernel: uts.release().to_string_lossy().into_owned(),
        os: uts.sysname().to_string_lossy().into_owned(),
        arch: uts.machine().to_string_lossy().into_owned(),
    })
}
