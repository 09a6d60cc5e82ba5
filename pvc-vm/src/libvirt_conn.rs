//! Lazily-opened, cached libvirt connections per [`crate::domain::DomainObject`].
//! Grounded on the same `virt::connect::Connect` usage as `pvc-facts`'s
//! `LibvirtFacts`, generalized to also open a remote `qemu+tcp://` leg for the
//! outbound side of a migration.

use std::sync::Mutex;

use virt::connect::Connect;

use crate::error::{VmError, VmResult};

const LOCAL_URI: &str = "qemu:///system";

fn remote_uri(target_node: &str) -> String {
    format!("qemu+tcp://{target_node}/system")
}

/// Holds the local connection open for the lifetime of the domain object; remote
/// connections are opened fresh for each migration attempt and closed immediately
/// after, since they are only needed for the duration of one outbound leg.
pub struct LibvirtConn {
    local: Mutex<Option<Connect>>,
}

impl LibvirtConn {
    pub fn new() -> Self {
        LibvirtConn { local: Mutex::new(None) }
    }

    /// Runs `f` with a live local connection, opening one on first use and reusing it
    /// afterward. A connection that libvirt reports as dead is dropped and reopened.
    pub fn with_local<T>(&self, f: impl FnOnce(&Connect) -> VmResult<T>) -> VmResult<T> {
        let mut guard = self.local.lock().unwrap();
        if guard.is_none() {
            *guard = Some(open(LOCAL_URI)?);
        }
        let conn = guard.as_ref().unwrap();
        match f(conn) {
            Ok(v) => Ok(v),
            Err(err) => {
                if !conn.is_alive().unwrap_or(false) {
                    *guard = None;
                }
                Err(err)
            }
        }
    }

    pub fn open_remote(target_node: &str) -> VmResult<Connect> {
        open(&remote_uri(target_node))
    }
}

impl Default for LibvirtConn {
    fn default() -> Self {
        Self::new()
    }
}

fn open(uri: &str) -> VmResult<Connect> {
    Connect::open(uri).map_err(|e| VmError::Connect {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}
