//! A single child-watch-driven registry: identity → local object.
//!
//! Grounded on `node-daemon/pvcd/Daemon.py`'s `update_nodes`/`update_networks`/
//! `update_domains` `ChildrenWatch` callbacks: diff the new child list against the
//! previous one, construct objects for additions, tear down and drop objects for
//! removals. Object construction happens synchronously on the watch-delivery thread so
//! a second child-watch event can never observe a half-built object.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use pvc_store::StoreClient;

/// An entity managed by a [`Registry`]. Implementors own whatever per-field watches
/// or worker threads they need; `teardown` must stop them before the object is
/// dropped, since libvirt connections, subprocess handles, and watch callbacks should
/// not outlive the registry's bookkeeping about them.
pub trait RegistryMember: Send + Sync + 'static {
    fn construct(identity: &str, store: Arc<dyn StoreClient>) -> Self
    where
        Self: Sized;

    fn teardown(&mut self) {}
}

/// identity → constructed object, kept in sync with a store path's children.
pub struct Registry<T: RegistryMember> {
    store: Arc<dyn StoreClient>,
    label: &'static str,
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: RegistryMember> Registry<T> {
    pub fn new(store: Arc<dyn StoreClient>, label: &'static str) -> Arc<Self> {
        Arc::new(Registry {
            store,
            label,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the children watch on `base_key`. The registry reconciles its entry
    /// map on every delivery, including the initial one.
    pub fn watch(self: &Arc<Self>, base_key: &str) -> pvc_store::StoreResult<()> {
        let registry = Arc::clone(self);
        let base_key = base_key.to_string();
        self.store.watch_children(
            &base_key,
            Box::new(move |event| registry.reconcile(event.children)),
        )
    }

    fn reconcile(&self, mut new_identities: Vec<String>) {
        new_identities.sort();
        new_identities.dedup();

        let mut entries = self.entries.lock().unwrap();

        let added: Vec<&String> = new_identities
            .iter()
            .filter(|id| !entries.contains_key(*id))
            .collect();
        let removed: Vec<String> = entries
            .keys()
            .filter(|id| !new_identities.contains(id))
            .cloned()
            .collect();

        for identity in &removed {
            if let Some(mut entry) = entries.remove(identity).and_then(Arc::into_inner) {
                entry.teardown();
            }
            info!("{}: removed {}", self.label, identity);
        }

        for identity in added {
            let object = T::construct(identity, Arc::clone(&self.store));
            entries.insert(identity.clone(), Arc::new(object));
            info!("{}: added {}", self.label, identity);
        }

        debug!("{}: now tracking {} entries", self.label, entries.len());
    }

    pub fn get(&self, identity: &str) -> Option<Arc<T>> {
        self.entries.lock().unwrap().get(identity).cloned()
    }

    pub fn identities(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    use pvc_store::{
        ChildWatchCallback, ChildrenEvent, ConnectionState, DataEvent, StoreLock, TxnOp,
        WatchCallback,
    };

    struct NullStore;
    impl StoreClient for NullStore {
        fn read(&self, _key: &str) -> pvc_store::StoreResult<Option<(Vec<u8>, i32)>> {
            Ok(None)
        }
        fn children(&self, _key: &str) -> pvc_store::StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn write_txn(&self, _ops: Vec<TxnOp>) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn watch_data(&self, _key: &str, _cb: WatchCallback) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn watch_children(&self, _key: &str, _cb: ChildWatchCallback) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn lock(&self, _key: &str) -> pvc_store::StoreResult<Box<dyn StoreLock>> {
            unimplemented!()
        }
        fn ephemeral_create(&self, _key: &str, _data: &[u8]) -> pvc_store::StoreResult<()> {
            Ok(())
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);
    static TORN_DOWN: AtomicUsize = AtomicUsize::new(0);

    struct CountingMember {
        identity: String,
    }

    impl RegistryMember for CountingMember {
        fn construct(identity: &str, _store: StdArc<dyn StoreClient>) -> Self {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            CountingMember {
                identity: identity.to_string(),
            }
        }

        fn teardown(&mut self) {
            TORN_DOWN.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fresh_registry() -> StdArc<Registry<CountingMember>> {
        CONSTRUCTED.store(0, Ordering::SeqCst);
        TORN_DOWN.store(0, Ordering::SeqCst);
        Registry::new(StdArc::new(NullStore), "test")
    }

    #[test]
    fn reconcile_adds_new_identities() {
        let registry = fresh_registry();
        registry.reconcile(vec!["a".into(), "b".into()]);
        assert_eq!(registry.len(), 2);
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get("a").unwrap().identity, "a");
    }

    #[test]
    fn reconcile_tears_down_removed_identities() {
        let registry = fresh_registry();
        registry.reconcile(vec!["a".into(), "b".into()]);
        registry.reconcile(vec!["a".into()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(TORN_DOWN.load(Ordering::SeqCst), 1);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn reconcile_is_idempotent_on_unchanged_list() {
        let registry = fresh_registry();
        registry.reconcile(vec!["a".into()]);
        registry.reconcile(vec!["a".into()]);
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
    }
}
