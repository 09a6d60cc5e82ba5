//! Local Facts Collector: samples host memory/load and libvirt domain state on
//! a fixed interval and publishes it, plus the keepalive timestamp, to the store in a
//! single transaction.

pub mod collector;
pub mod error;
pub mod libvirt;
pub mod static_facts;

pub use collector::{AllocationSource, FactsCollector};
pub use error::{FactsError, FactsResult};
