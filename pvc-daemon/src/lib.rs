//! Daemon lifecycle plumbing shared by every PVC node daemon: catching `SIGHUP`/`SIGINT`
//! and tracking shutdown/reload state for the rest of the process to observe.
//!
//! The node daemon itself (store connection, registries, reconciliation loops) lives in the
//! other `pvc-*` crates; this crate only knows about process lifetime.

mod state;
pub use state::fail_on_shutdown;
pub use state::shutdown_future;
pub use state::{catch_reload_signal, reload_signal_task};
pub use state::{catch_shutdown_signal, shutdown_signal_task};
pub use state::{is_reload_requested, is_shutdown_requested, request_reload, request_shutdown};
