//! Primary Role Controller: the single-writer election for the cluster's "primary"
//! coordinator, its floating IPs, and the primary-only service set.

pub mod error;
pub mod floating_ip;
pub mod metrics;
pub mod os_command;
pub mod router;
pub mod services;

pub use error::{PrimaryError, PrimaryResult};
pub use floating_ip::FloatingIpConfig;
pub use metrics::{ClusterMetrics, MetricsSource};
pub use router::PrimaryController;
pub use services::{LeaderSwitchOutcome, PrimaryServices, SystemdServices};
