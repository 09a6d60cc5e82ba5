//! Thin `Command::new` wrapper, the same shape `pvc-network`/`pvc-primary` each keep
//! their own copy of: run a subprocess, check its exit status, wrap failures in
//! `anyhow`.

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
