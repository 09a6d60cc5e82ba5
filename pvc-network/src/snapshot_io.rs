//! Reads a `/networks/<vni>` entity out of the store into a [`NetworkSnapshot`].

use std::str::FromStr;

use pvc_store::StoreClient;
use pvc_types::enums::NetworkType;
use pvc_types::keys::NetworkKey;
use pvc_types::NetworkSnapshot;

use crate::error::NetworkResult;

pub fn load(store: &dyn StoreClient, vni: u32) -> NetworkResult<NetworkSnapshot> {
    let description = store
        .read_string(&NetworkKey::description(vni))?
        .unwrap_or_default();
    let net_type = store
        .read_string(&NetworkKey::net_type(vni))?
        .and_then(|s| NetworkType::from_str(&s).ok())
        .unwrap_or(NetworkType::Managed);
    let mtu = store
        .read_string(&NetworkKey::mtu(vni))?
        .and_then(|s| s.parse().ok());
    let domain = store.read_string(&NetworkKey::domain(vni))?;
    let ip4_network = store.read_string(&NetworkKey::ip4_network(vni))?;
    let ip4_gateway = store.read_string(&NetworkKey::ip4_gateway(vni))?;
    let ip6_network = store.read_string(&NetworkKey::ip6_network(vni))?;
    let ip6_gateway = store.read_string(&NetworkKey::ip6_gateway(vni))?;
    let dhcp4_flag = store
        .read_string(&NetworkKey::dhcp4_flag(vni))?
        .map(|s| s == "true" || s == "True" || s == "1")
        .unwrap_or(false);
    let dhcp4_start = store.read_string(&NetworkKey::dhcp4_start(vni))?;
    let dhcp4_end = store.read_string(&NetworkKey::dhcp4_end(vni))?;
    let name_servers = store
        .read_string(&NetworkKey::name_servers(vni))?
        .map(|s| s.split(',').map(str::trim).map(String::from).collect())
        .unwrap_or_default();

    Ok(NetworkSnapshot {
        vni,
        description,
        net_type,
        mtu,
        domain,
        ip4_network,
        ip4_gateway,
        ip6_network,
        ip6_gateway,
        dhcp4_flag,
        dhcp4_start,
        dhcp4_end,
        name_servers,
    })
}
