//! The busy-flag set that gates re-entry into a domain's action handlers: only one
//! action may run at a time per domain.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct BusyFlags {
    pub in_start: AtomicBool,
    pub in_stop: AtomicBool,
    pub in_shutdown: AtomicBool,
    pub in_restart: AtomicBool,
    pub in_migrate: AtomicBool,
    pub in_receive: AtomicBool,
}

impl BusyFlags {
    pub fn any_busy(&self) -> bool {
        self.in_start.load(Ordering::SeqCst)
            || self.in_stop.load(Ordering::SeqCst)
            || self.in_shutdown.load(Ordering::SeqCst)
            || self.in_restart.load(Ordering::SeqCst)
            || self.in_migrate.load(Ordering::SeqCst)
            || self.in_receive.load(Ordering::SeqCst)
    }

    /// Claims `flag`, returning a guard that clears it on drop, or `None` if the
    /// domain is already busy with a different action.
    pub fn enter<'a>(&'a self, flag: &'a AtomicBool) -> Option<BusyGuard<'a>> {
        if self.any_busy() {
            return None;
        }
        flag.store(true, Ordering::SeqCst);
        Some(BusyGuard { flag })
    }
}

pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_while_busy() {
        let flags = BusyFlags::default();
        let guard = flags.enter(&flags.in_start);
        assert!(guard.is_some());
        assert!(flags.enter(&flags.in_stop).is_none());
    }

    #[test]
    fn dropping_the_guard_frees_the_domain_for_reentry() {
        let flags = BusyFlags::default();
        {
            let _guard = flags.enter(&flags.in_start).unwrap();
            assert!(flags.any_busy());
        }
        assert!(!flags.any_busy());
        assert!(flags.enter(&flags.in_migrate).is_some());
    }
}
