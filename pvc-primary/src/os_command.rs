//! Thin `Command::new` wrapper, the same shape as `pvc_network::os_command` (itself
//! grounded on `node-daemon/pvcd/common.py`'s `run_os_command`), plus a fire-and-forget
//! variant for the gratuitous ARP/NA announce that follows each floating IP add.

use std::process::Command;
use std::thread;

use log::{debug, warn};

use crate::error::{PrimaryError, PrimaryResult};

pub fn run(description: &str, program: &str, args: &[&str]) -> PrimaryResult<()> {
    debug!("{}: {} {}", description, program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| PrimaryError::Command(format!("failed to execute {} ({}): {}", description, program, e)))?;

    if !output.status.success() {
        return Err(PrimaryError::Command(format!(
            "{} failed (status {}): {}",
            description,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

pub fn run_best_effort(description: &str, program: &str, args: &[&str]) {
    if let Err(err) = run(description, program, args) {
        warn!("{} (ignored): {}", description, err);
    }
}

/// Runs a command on a detached thread and discards the result, matching
/// `common.py`'s `run_os_command(..., background=True)` used for the gratuitous
/// ARP/NA announce so it never holds up the acquire sequence.
pub fn run_background(description: String, program: &'static str, args: Vec<String>) {
    thread::spawn(move || {
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_best_effort(&description, program, &arg_refs);
    });
}
