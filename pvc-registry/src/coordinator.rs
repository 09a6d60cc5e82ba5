//! One struct owning the Node, Network, and Domain registries. Other components take
//! `Arc<Coordinator<N, W, D>>` and call `.nodes()`/`.networks()`/`.domains()` instead
//! of reaching into a neighbor's private map.

use std::sync::Arc;

use pvc_store::StoreClient;

use crate::registry::{Registry, RegistryMember};

pub struct Coordinator<N: RegistryMember, W: RegistryMember, D: RegistryMember> {
    store: Arc<dyn StoreClient>,
    nodes: Arc<Registry<N>>,
    networks: Arc<Registry<W>>,
    domains: Arc<Registry<D>>,
}

impl<N: RegistryMember, W: RegistryMember, D: RegistryMember> Coordinator<N, W, D> {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Coordinator {
            nodes: Registry::new(Arc::clone(&store), "nodes"),
            networks: Registry::new(Arc::clone(&store), "networks"),
            domains: Registry::new(Arc::clone(&store), "domains"),
            store,
        }
    }

    /// Arms all three child watches. Call once at startup, after the node's own
    /// `/nodes/<name>` entry has been created.
    pub fn start(&self) -> pvc_store::StoreResult<()> {
        self.nodes.watch("/nodes")?;
        self.networks.watch("/networks")?;
        self.domains.watch("/domains")?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    pub fn nodes(&self) -> &Arc<Registry<N>> {
        &self.nodes
    }

    pub fn networks(&self) -> &Arc<Registry<W>> {
        &self.networks
    }

    pub fn domains(&self) -> &Arc<Registry<D>> {
        &self.domains
    }
}
