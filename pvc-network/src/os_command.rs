//! Thin `Command::new` wrapper, grounded on `node-daemon/pvcd/common.py`'s
//! `run_os_command` (subprocess.run + return-code/stderr check) and on
//! `proxmox-sys/src/email.rs`'s anyhow-wrapped spawn convention.

use std::process::Command;

use anyhow::{bail, Context, Result};
use log::debug;

pub fn run(description: &str, program: &str, args: &[&str]) -> Result<()> {
    debug!("{}: {} {}", description, program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {} ({})", description, program))?;

    if !output.status.success() {
        bail!(
            "{} failed (status {}): {}",
            description,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Same as [`run`] but tolerates the command already having undone its own effect,
/// for idempotent teardown where commands run in reverse order against state that
/// may already be gone.
pub fn run_best_effort(description: &str, program: &str, args: &[&str]) {
    if let Err(err) = run(description, program, args) {
        log::debug!("{} (ignored, likely already torn down): {}", description, err);
    }
}
