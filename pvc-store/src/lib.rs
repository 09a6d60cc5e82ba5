//! Store Client: the only component that talks to the cluster's replicated
//! configuration store directly. Every other `pvc-*` crate depends on the
//! [`StoreClient`] trait rather than on ZooKeeper itself, so that the store
//! connection, watch replay, and locking machinery have exactly one implementation.

pub mod client;
pub mod error;
pub mod zk;

pub use client::{
    ChildWatchCallback, ChildrenEvent, ConnectionState, DataEvent, StoreClient, StoreLock, TxnOp,
    WatchCallback,
};
pub use error::{StoreError, StoreResult};
pub use zk::ZkStoreClient;
