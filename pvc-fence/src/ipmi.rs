//! IPMI chassis reset, ported from `fencing.py`'s `rebootViaIPMI`: force a power
//! reset, check status, and nudge the chassis on if it came back powered off.

use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::os_command::run_capturing;

#[derive(Debug, Clone)]
pub struct IpmiCredentials {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl IpmiCredentials {
    fn args<'a>(&'a self, verb: &'a [&'a str]) -> Vec<&'a str> {
        let mut args = vec!["-I", "lanplus", "-H", &self.hostname, "-U", &self.username, "-P", &self.password];
        args.extend_from_slice(verb);
        args
    }
}

/// Issues `chassis power reset`, then `chassis power status`, powering the chassis on
/// if it isn't already, and returns whether the reset command itself succeeded.
pub fn reboot(creds: &IpmiCredentials) -> bool {
    let reset = run_capturing("IPMI chassis power reset", "ipmitool", &creds.args(&["chassis", "power", "reset"]));
    thread::sleep(Duration::from_millis(500));

    match run_capturing("IPMI chassis power status", "ipmitool", &creds.args(&["chassis", "power", "status"])) {
        Ok(status) if status != "Chassis Power is on" => {
            let _ = run_capturing("IPMI chassis power on", "ipmitool", &creds.args(&["chassis", "power", "on"]));
        }
        Err(err) => warn!("ipmi status check failed: {}", err),
        _ => {}
    }

    match reset {
        Ok(_) => {
            info!("successfully rebooted dead node via IPMI");
            true
        }
        Err(err) => {
            warn!("failed to reboot dead node via IPMI: {}", err);
            false
        }
    }
}
