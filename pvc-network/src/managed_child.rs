//! A running auxiliary subprocess (`dnsmasq`, `pdns`) as a first-class object with its
//! own spawn/reload/stop lifecycle, rather than a raw handle stashed on a field.
//!
//! Grounded on `proxmox-sys/src/email.rs`'s `Command::new(...).spawn()` +
//! anyhow-wrapped error convention for subprocess handling.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};
use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// A subprocess this node started and is responsible for stopping: started with a
/// log file redirect, stopped with SIGINT then SIGTERM, reaped on drop.
pub struct ManagedChild {
    name: String,
    child: Child,
}

impl ManagedChild {
    pub fn spawn(name: &str, program: &str, args: &[String], log_path: &Path) -> Result<Self> {
        let log_file = File::create(log_path)
            .with_context(|| format!("failed to create log file {}", log_path.display()))?;
        let stderr_file = log_file
            .try_clone()
            .context("failed to duplicate log file handle")?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .with_context(|| format!("failed to spawn {} ({})", name, program))?;

        info!("started {} as pid {}", name, child.id());
        Ok(ManagedChild {
            name: name.to_string(),
            child,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Sends SIGHUP, used to make `dnsmasq` reload `--dhcp-hostsdir` contents after a
    /// reservation is added or removed.
    pub fn reload(&self) -> Result<()> {
        self.signal(Signal::SIGHUP)
    }

    pub fn signal(&self, sig: Signal) -> Result<()> {
        signal::kill(Pid::from_raw(self.child.id() as i32), sig)
            .with_context(|| format!("failed to signal {} ({})", self.name, sig))
    }

    /// Sends SIGINT, waits briefly, then escalates to SIGTERM.
    pub fn stop(mut self) -> Result<()> {
        if let Err(err) = self.signal(Signal::SIGINT) {
            warn!("SIGINT to {} failed: {}", self.name, err);
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
        if let Err(err) = self.signal(Signal::SIGTERM) {
            warn!("SIGTERM to {} failed: {}", self.name, err);
        }
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
