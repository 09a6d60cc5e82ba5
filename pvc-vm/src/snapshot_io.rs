//! Reads a `/domains/<uuid>` entity out of the store into a [`DomainSnapshot`].

use std::str::FromStr;

use pvc_store::StoreClient;
use pvc_types::enums::{MigrationMethod, NodeSelector, VmDesiredState};
use pvc_types::keys::DomainKey;
use pvc_types::DomainSnapshot;

use crate::error::VmResult;

pub fn load(store: &dyn StoreClient, uuid: &str) -> VmResult<DomainSnapshot> {
    let xml = store.read_string(&DomainKey::xml(uuid))?.unwrap_or_default();
    let name = quick_xml_name(&xml).unwrap_or_else(|| uuid.to_string());

    let state = store
        .read_string(&DomainKey::state(uuid))?
        .and_then(|s| VmDesiredState::from_str(&s).ok())
        .unwrap_or(VmDesiredState::Stop);
    let node = store.read_string(&DomainKey::node(uuid))?.unwrap_or_default();
    let lastnode = store.read_string(&DomainKey::lastnode(uuid))?.filter(|s| !s.is_empty());
    let failed_reason = store.read_string(&DomainKey::failed_reason(uuid))?;
    let node_limit = store
        .read_string(&DomainKey::node_limit(uuid))?
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    let node_selector = store
        .read_string(&DomainKey::node_selector(uuid))?
        .and_then(|s| NodeSelector::from_str(&s).ok())
        .unwrap_or(NodeSelector::None);
    let node_autostart = store
        .read_string(&DomainKey::node_autostart(uuid))?
        .map(|s| s == "true" || s == "True" || s == "1")
        .unwrap_or(false);
    let migration_method = store
        .read_string(&DomainKey::migration_method(uuid))?
        .and_then(|s| MigrationMethod::from_str(&s).ok());
    let tags = store
        .read_string(&DomainKey::tags(uuid))?
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();

    Ok(DomainSnapshot {
        uuid: uuid.to_string(),
        name,
        xml,
        state,
        node,
        lastnode,
        failed_reason,
        node_limit,
        node_selector,
        node_autostart,
        migration_method,
        tags,
    })
}

/// Best-effort `<name>` extraction from domain XML, for log messages; the UUID is
/// always the key of record.
fn quick_xml_name(xml: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_name = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"name" => in_name = true,
            Ok(Event::Text(e)) if in_name => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"name" => in_name = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}
