//! Thin `Command::new` wrapper, the same shape as `pvc_primary::os_command` (itself
//! grounded on `node-daemon/pvcd/common.py`'s `run_os_command`). `ipmitool` calls need
//! the captured stdout to decide whether the chassis is already powered on, so this
//! copy adds a capturing variant the other crates' copies don't need.

use std::process::Command;

use log::debug;

use crate::error::{FenceError, FenceResult};

pub fn run(description: &str, program: &str, args: &[&str]) -> FenceResult<()> {
    run_capturing(description, program, args).map(|_| ())
}

/// Runs `program`, returning trimmed stdout on success. A non-zero exit is an error
/// carrying stderr, matching `run`'s reporting.
pub fn run_capturing(description: &str, program: &str, args: &[&str]) -> FenceResult<String> {
    debug!("{}: {} {}", description, program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| FenceError::Command(format!("failed to execute {} ({}): {}", description, program, e)))?;

    if !output.status.success() {
        return Err(FenceError::Command(format!(
            "{} failed (status {}): {}",
            description,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
