use crate::error::StoreResult;

/// One write within a `write_txn` batch.
#[derive(Debug, Clone)]
pub enum TxnOp {
    /// Create `key` with `data`, failing if it already exists.
    Create { key: String, data: Vec<u8> },
    /// Overwrite `key` with `data`. `expected_version` of `None` means "any version";
    /// `Some(v)` performs a compare-and-swap against version `v`.
    Write {
        key: String,
        data: Vec<u8>,
        expected_version: Option<i32>,
    },
    /// Delete `key`.
    Delete { key: String },
}

impl TxnOp {
    pub fn create(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        TxnOp::Create {
            key: key.into(),
            data: data.into(),
        }
    }

    pub fn write(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        TxnOp::Write {
            key: key.into(),
            data: data.into(),
            expected_version: None,
        }
    }

    pub fn compare_and_swap(key: impl Into<String>, data: impl Into<Vec<u8>>, version: i32) -> Self {
        TxnOp::Write {
            key: key.into(),
            data: data.into(),
            expected_version: Some(version),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }
}

/// A single delivery of a data watch: the current value (or `None` on deletion/
/// tombstone) and its version.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub key: String,
    pub data: Option<Vec<u8>>,
    pub version: i32,
    /// True the first time a watch fires after registration, so consumers that only
    /// care about changes can skip it.
    pub is_initial: bool,
}

/// A single delivery of a children watch: the new child-name set.
#[derive(Debug, Clone)]
pub struct ChildrenEvent {
    pub key: String,
    pub children: Vec<String>,
    pub is_initial: bool,
}

pub type WatchCallback = Box<dyn Fn(DataEvent) + Send + Sync + 'static>;
pub type ChildWatchCallback = Box<dyn Fn(ChildrenEvent) + Send + Sync + 'static>;

/// Connection state as surfaced to consumers that need to pause observed-state
/// emission while the store session is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Suspended,
    Lost,
}

/// An advisory, fair, held lock. Dropping it releases the lock.
pub trait StoreLock: Send {
    fn key(&self) -> &str;
}

/// The Store Client interface assumed by every other component.
///
/// Implementations must honor the watch-replay contract: a lost-then-regained
/// connection re-fires every still-registered watch with the then-current state,
/// so that a consumer rebuilding its view never needs to distinguish "nothing changed"
/// from "many changes were missed while disconnected".
pub trait StoreClient: Send + Sync {
    /// Reads `key`, returning `None` if it does not exist.
    fn read(&self, key: &str) -> StoreResult<Option<(Vec<u8>, i32)>>;

    /// Reads `key` as a UTF-8 string, for the common case where the stored value is
    /// short text (domain XML blobs are also UTF-8, just larger).
    fn read_string(&self, key: &str) -> StoreResult<Option<String>> {
        match self.read(key)? {
            Some((data, _)) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| crate::error::StoreError::InvalidUtf8 { key: key.to_string() }),
            None => Ok(None),
        }
    }

    /// Lists the immediate child names of `key`.
    fn children(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Applies `ops` as a single transaction.
    fn write_txn(&self, ops: Vec<TxnOp>) -> StoreResult<()>;

    /// Registers a data watch on `key`. The callback re-fires on every change and once
    /// more, with `is_initial = true`, immediately upon registration and after any
    /// reconnect.
    fn watch_data(&self, key: &str, cb: WatchCallback) -> StoreResult<()>;

    /// Registers a children watch on `key`, with the same re-fire semantics as
    /// [`watch_data`](StoreClient::watch_data).
    fn watch_children(&self, key: &str, cb: ChildWatchCallback) -> StoreResult<()>;

    /// Acquires a fair, advisory lock on `key`, blocking until it is held.
    fn lock(&self, key: &str) -> StoreResult<Box<dyn StoreLock>>;

    /// Creates an ephemeral node at `key`, tied to this session's lifetime.
    fn ephemeral_create(&self, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Current connection state, for components that must suspend emission while
    /// disconnected.
    fn connection_state(&self) -> ConnectionState;
}
