//! Shared entity types, store key schema, and error taxonomy for the PVC node daemon.
//!
//! This crate has no I/O of its own: every other `pvc-*` crate depends on it for the
//! entity vocabulary (field enums, entity snapshots, key builders) so that wire strings
//! and key paths are defined exactly once.

pub mod domain;
pub mod enums;
pub mod error;
pub mod keys;
pub mod network;
pub mod node;

pub use domain::DomainSnapshot;
pub use error::TypeError;
pub use network::{DhcpReservation, FirewallRule, NetworkSnapshot};
pub use node::{NodeSnapshot, ObservedDomain, StaticNodeData};
