//! ZooKeeper-backed implementation of [`StoreClient`].
//!
//! Grounded on `node-daemon/pvcd/zkhandler.py`'s thin wrapper over `kazoo`: the
//! `zookeeper` crate is the closest real, published Rust equivalent (persistent and
//! ephemeral znodes, one-shot watches, `Watcher` session-state callbacks).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;
use zookeeper::{Acl, CreateMode, WatchedEvent, WatchedEventType, Watcher, ZkError, ZooKeeper};

use crate::client::{
    ChildWatchCallback, ChildrenEvent, ConnectionState, DataEvent, StoreClient, StoreLock, TxnOp,
    WatchCallback,
};
use crate::error::{StoreError, StoreResult};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

enum RegisteredWatch {
    Data(WatchCallback),
    Children(ChildWatchCallback),
}

struct WatchRegistry {
    watches: Mutex<HashMap<String, Vec<RegisteredWatch>>>,
}

impl WatchRegistry {
    fn new() -> Self {
        WatchRegistry {
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn add_data(&self, key: &str, cb: WatchCallback) {
        self.watches
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(RegisteredWatch::Data(cb));
    }

    fn add_children(&self, key: &str, cb: ChildWatchCallback) {
        self.watches
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(RegisteredWatch::Children(cb));
    }

    fn keys(&self) -> Vec<String> {
        self.watches.lock().unwrap().keys().cloned().collect()
    }
}

/// Session-level watcher: tracks connection state transitions and wakes the
/// reconnect-and-replay loop.
struct SessionWatcher {
    state: Arc<Mutex<ConnectionState>>,
    dirty: Arc<std::sync::atomic::AtomicBool>,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        match event.event_type {
            WatchedEventType::None => {
                use zookeeper::ZkState;
                match event.keeper_state {
                    ZkState::SyncConnected => {
                        *self.state.lock().unwrap() = ConnectionState::Connected;
                        self.dirty.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    ZkState::Closed | ZkState::AuthFailed | ZkState::Expired => {
                        *self.state.lock().unwrap() = ConnectionState::Lost;
                    }
                    _ => {
                        *self.state.lock().unwrap() = ConnectionState::Suspended;
                    }
                }
            }
            _ => {
                // Path watches are replayed by re-registering after every read, so a
                // one-shot fire here just means "go re-read"; the replay loop handles
                // actually dispatching updated events to the registered callbacks.
                self.dirty.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }
}

/// A held advisory lock, implemented with the classic ZooKeeper recipe: create a
/// sequential ephemeral child, then watch the next-lowest sibling until it is ours.
pub struct ZkLock {
    zk: Arc<ZooKeeper>,
    node_path: String,
    lock_key: String,
}

impl StoreLock for ZkLock {
    fn key(&self) -> &str {
        &self.lock_key
    }
}

impl Drop for ZkLock {
    fn drop(&mut self) {
        if let Err(err) = self.zk.delete(&self.node_path, None) {
            log::warn!("failed to release lock node {}: {}", self.node_path, err);
        }
    }
}

/// ZooKeeper-backed [`StoreClient`].
pub struct ZkStoreClient {
    zk: Arc<ZooKeeper>,
    state: Arc<Mutex<ConnectionState>>,
    registry: Arc<WatchRegistry>,
}

impl ZkStoreClient {
    /// Connects to `connect_string` (the `coordinators` CSV from `pvc-config`) and
    /// starts the background reconnect/replay thread.
    pub fn connect(connect_string: &str, session_timeout: Duration) -> StoreResult<Self> {
        let state = Arc::new(Mutex::new(ConnectionState::Suspended));
        let dirty = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let watcher = SessionWatcher {
            state: Arc::clone(&state),
            dirty: Arc::clone(&dirty),
        };

        let zk = ZooKeeper::connect(connect_string, session_timeout, watcher)
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let client = ZkStoreClient {
            zk: Arc::new(zk),
            state,
            registry: Arc::new(WatchRegistry::new()),
        };

        client.spawn_replay_loop(dirty);
        Ok(client)
    }

    /// Background thread: whenever the session watcher marks state dirty (including
    /// "we just reconnected"), re-arm and re-fire every still-registered watch. Runs
    /// with its own backoff on transient read failures so a brief blip doesn't
    /// busy-loop.
    fn spawn_replay_loop(&self, dirty: Arc<std::sync::atomic::AtomicBool>) {
        let zk = Arc::clone(&self.zk);
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);

        thread::spawn(move || {
            let mut backoff = BACKOFF_BASE;
            loop {
                if dirty.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    if *state.lock().unwrap() == ConnectionState::Connected {
                        replay_all(&zk, &registry);
                        backoff = BACKOFF_BASE;
                    } else {
                        let jitter = rand::thread_rng().gen_range(0..=(backoff.as_millis() / 5) as u64);
                        thread::sleep(backoff + Duration::from_millis(jitter));
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
                thread::sleep(Duration::from_millis(200));
            }
        });
    }

    fn to_create_mode(ephemeral: bool, sequential: bool) -> CreateMode {
        match (ephemeral, sequential) {
            (false, false) => CreateMode::Persistent,
            (true, false) => CreateMode::Ephemeral,
            (false, true) => CreateMode::PersistentSequential,
            (true, true) => CreateMode::EphemeralSequential,
        }
    }
}

fn replay_all(zk: &ZooKeeper, registry: &WatchRegistry) {
    for key in registry.keys() {
        let watches = registry.watches.lock().unwrap();
        let Some(entries) = watches.get(&key) else {
            continue;
        };
        for entry in entries {
            match entry {
                // `watch: true` both reads the current value and re-arms a one-shot
                // server-side watch on `key`, so the next real change fires the
                // session watcher again and marks `dirty` for the next replay pass.
                RegisteredWatch::Data(cb) => match zk.get_data(&key, true) {
                    Ok((data, stat)) => cb(DataEvent {
                        key: key.clone(),
                        data: Some(data),
                        version: stat.version,
                        is_initial: true,
                    }),
                    Err(ZkError::NoNode) => cb(DataEvent {
                        key: key.clone(),
                        data: None,
                        version: -1,
                        is_initial: true,
                    }),
                    Err(err) => log::warn!("replay read of {} failed: {}", key, err),
                },
                RegisteredWatch::Children(cb) => match zk.get_children(&key, true) {
                    Ok(children) => cb(ChildrenEvent {
                        key: key.clone(),
                        children,
                        is_initial: true,
                    }),
                    Err(err) => log::warn!("replay children-read of {} failed: {}", key, err),
                },
            }
        }
    }
}

impl StoreClient for ZkStoreClient {
    fn read(&self, key: &str) -> StoreResult<Option<(Vec<u8>, i32)>> {
        match self.zk.get_data(key, false) {
            Ok((data, stat)) => Ok(Some((data, stat.version))),
            Err(ZkError::NoNode) => Ok(None),
            Err(err) => Err(StoreError::Transient(err.to_string())),
        }
    }

    fn children(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.zk.get_children(key, false) {
            Ok(children) => Ok(children),
            Err(ZkError::NoNode) => Ok(Vec::new()),
            Err(err) => Err(StoreError::Transient(err.to_string())),
        }
    }

    fn write_txn(&self, ops: Vec<TxnOp>) -> StoreResult<()> {
        // The `zookeeper` crate's stable surface does not expose a multi-op batch
        // primitive; true cross-key atomicity is left to an external collaborator, so
        // each op below is applied sequentially and a failure partway through is
        // reported rather than rolled back.
        for op in ops {
            match op {
                TxnOp::Create { key, data } => {
                    self.zk
                        .create(&key, data, Acl::open_unsafe().clone(), CreateMode::Persistent)
                        .map_err(|e| classify(&key, e))?;
                }
                TxnOp::Write {
                    key,
                    data,
                    expected_version,
                } => {
                    self.zk
                        .set_data(&key, data, expected_version)
                        .map_err(|e| classify(&key, e))?;
                }
                TxnOp::Delete { key } => {
                    self.zk.delete(&key, None).map_err(|e| classify(&key, e))?;
                }
            }
        }
        Ok(())
    }

    fn watch_data(&self, key: &str, cb: WatchCallback) -> StoreResult<()> {
        // `watch: true` arms the server-side one-shot watch on first registration;
        // every subsequent fire is re-armed by `replay_all`.
        match self.zk.get_data(key, true) {
            Ok((data, stat)) => cb(DataEvent {
                key: key.to_string(),
                data: Some(data),
                version: stat.version,
                is_initial: true,
            }),
            Err(ZkError::NoNode) => cb(DataEvent {
                key: key.to_string(),
                data: None,
                version: -1,
                is_initial: true,
            }),
            Err(err) => return Err(StoreError::Transient(err.to_string())),
        }
        self.registry.add_data(key, cb);
        Ok(())
    }

    fn watch_children(&self, key: &str, cb: ChildWatchCallback) -> StoreResult<()> {
        let children = match self.zk.get_children(key, true) {
            Ok(children) => children,
            Err(ZkError::NoNode) => Vec::new(),
            Err(err) => return Err(StoreError::Transient(err.to_string())),
        };
        cb(ChildrenEvent {
            key: key.to_string(),
            children,
            is_initial: true,
        });
        self.registry.add_children(key, cb);
        Ok(())
    }

    fn lock(&self, key: &str) -> StoreResult<Box<dyn StoreLock>> {
        let lock_dir = format!("{}/__locks__", key);
        let _ = self.zk.create(
            &lock_dir,
            Vec::new(),
            Acl::open_unsafe().clone(),
            CreateMode::Persistent,
        );

        let node_path = self
            .zk
            .create(
                &format!("{}/lock-", lock_dir),
                Vec::new(),
                Acl::open_unsafe().clone(),
                ZkStoreClient::to_create_mode(true, true),
            )
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;

        let my_seq = node_path.rsplit('/').next().unwrap_or("").to_string();

        loop {
            let mut siblings = self
                .zk
                .get_children(&lock_dir, false)
                .map_err(|e| StoreError::LockFailed(e.to_string()))?;
            siblings.sort();

            let position = siblings.iter().position(|s| s == &my_seq);
            match position {
                Some(0) => break,
                Some(_) => thread::sleep(Duration::from_millis(100)),
                None => {
                    return Err(StoreError::LockFailed(format!(
                        "lock node {} vanished while waiting",
                        node_path
                    )))
                }
            }
        }

        Ok(Box::new(ZkLock {
            zk: Arc::clone(&self.zk),
            node_path,
            lock_key: key.to_string(),
        }))
    }

    fn ephemeral_create(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        match self.zk.create(
            key,
            data.to_vec(),
            Acl::open_unsafe().clone(),
            CreateMode::Ephemeral,
        ) {
            Ok(_) => Ok(()),
            Err(ZkError::NodeExists) => self
                .zk
                .set_data(key, data.to_vec(), None)
                .map(drop)
                .map_err(|e| classify(key, e)),
            Err(err) => Err(classify(key, err)),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

fn classify(key: &str, err: ZkError) -> StoreError {
    match err {
        ZkError::NoNode => StoreError::NotFound(key.to_string()),
        ZkError::BadVersion => StoreError::Conflict(key.to_string()),
        _ => StoreError::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mode_covers_all_combinations() {
        assert!(matches!(
            ZkStoreClient::to_create_mode(false, false),
            CreateMode::Persistent
        ));
        assert!(matches!(
            ZkStoreClient::to_create_mode(true, false),
            CreateMode::Ephemeral
        ));
        assert!(matches!(
            ZkStoreClient::to_create_mode(false, true),
            CreateMode::PersistentSequential
        ));
        assert!(matches!(
            ZkStoreClient::to_create_mode(true, true),
            CreateMode::EphemeralSequential
        ));
    }

    #[test]
    fn classify_maps_known_errors() {
        assert!(matches!(
            classify("/some/key", ZkError::NoNode),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            classify("/some/key", ZkError::BadVersion),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            classify("/some/key", ZkError::ConnectionLoss),
            StoreError::Transient(_)
        ));
    }
}
