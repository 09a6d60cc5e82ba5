//! Self-fence ("suicide"): a node that cannot write its own keepalive for
//! `keepalive_interval * suicide_intervals` seconds while its store connection is
//! still live must hard-reboot itself rather than risk two nodes believing they hold
//! the primary role. Not present in the original Python daemon — that codebase relies
//! entirely on peers fencing a node that stops updating `/nodes/<name>/keepalive` —
//! but the spec calls for the node to protect against split-brain on its own,
//! independent of whether peers notice in time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::warn;

use pvc_store::{ConnectionState, StoreClient};

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// The actual hard-reboot mechanism, named only by this interface so tests can swap
/// in a recording double instead of actually rebooting the test runner.
pub trait SuicideAction: Send + Sync {
    fn trigger(&self);
}

/// `nix::sys::reboot::reboot(RB_AUTOBOOT)`: an immediate, unclean reboot. The kernel
/// does not return from a successful call.
pub struct HardReboot;

impl SuicideAction for HardReboot {
    fn trigger(&self) {
        warn!("keepalive stalled with a live store connection; hard-rebooting to avoid split-brain");
        if let Err(err) = nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT) {
            warn!("hard reboot request itself failed: {}", err);
        }
    }
}

pub struct SuicideWatch {
    last_success: Arc<AtomicU64>,
    tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SuicideWatch {
    /// `suicide_intervals = 0` disables the watchdog: the thread still runs (so
    /// shutdown stays uniform) but never trips.
    pub fn spawn(
        store: Arc<dyn StoreClient>,
        keepalive_interval: Duration,
        suicide_intervals: u64,
        action: Arc<dyn SuicideAction>,
    ) -> Arc<Self> {
        let last_success = Arc::new(AtomicU64::new(now_epoch()));
        let (tx, rx) = unbounded::<()>();

        let watch_last_success = Arc::clone(&last_success);
        let handle = thread::spawn(move || loop {
            match rx.recv_timeout(keepalive_interval) {
                Ok(()) => break,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if suicide_intervals == 0 {
                        continue;
                    }
                    let deadline = keepalive_interval.as_secs() * suicide_intervals;
                    let stalled = now_epoch().saturating_sub(watch_last_success.load(Ordering::SeqCst)) > deadline;
                    if stalled && store.connection_state() == ConnectionState::Connected {
                        action.trigger();
                    }
                }
            }
        });

        Arc::new(SuicideWatch {
            last_success,
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Called after every successful local keepalive write.
    pub fn record_success(&self) {
        self.last_success.store(now_epoch(), Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
