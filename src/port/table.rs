//! Port registry.
//!
//! Ports are registered by dense integer id and by name. The registry also
//! owns the two synthetic singletons. A retired id is not handed out again
//! until a grace number of dealloc epochs has passed, so in-flight contexts
//! still naming a freed id cannot land on an unrelated recycled port.

use super::{DropPort, FloodPort, Port, PortId, PortKind, TcpPort, UdpPort};
use super::{DROP_PORT_ID, FLOOD_PORT_ID};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Full dealloc epochs an id must rest before reuse.
const REUSE_GRACE_EPOCHS: u64 = 1;

type Registry = Arc<RwLock<HashMap<PortId, Arc<dyn Port>>>>;

pub struct PortTable {
    registry: Registry,
    names: RwLock<HashMap<String, PortId>>,
    next_id: Mutex<PortId>,
    retired: Mutex<Vec<(PortId, u64)>>,
    epoch: AtomicU64,
    drop: Arc<DropPort>,
    flood: Arc<FloodPort>,
    recv_timeout: Duration,
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    pub fn new() -> Self {
        Self::with_recv_timeout(Duration::from_millis(1))
    }

    pub fn with_recv_timeout(recv_timeout: Duration) -> Self {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        Self {
            flood: Arc::new(FloodPort::new(Arc::clone(&registry))),
            drop: Arc::new(DropPort::new()),
            registry,
            names: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
            retired: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
            recv_timeout,
        }
    }

    /// Constructs a port of `kind` from its transport args and registers it.
    pub fn alloc(&self, kind: PortKind, name: &str, args: &str) -> Result<Arc<dyn Port>> {
        if name == "drop" || name == "flood" || self.names.read().unwrap().contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let id = self.next_port_id();
        let port: Arc<dyn Port> = match kind {
            PortKind::Udp => Arc::new(UdpPort::new(id, name, args, self.recv_timeout)?),
            PortKind::Tcp => Arc::new(TcpPort::new(id, name, args, self.recv_timeout)?),
            PortKind::Drop | PortKind::Flood => {
                return Err(Error::Unsupported("allocating a synthetic port"));
            }
        };
        self.registry.write().unwrap().insert(id, Arc::clone(&port));
        self.names.write().unwrap().insert(name.to_string(), id);
        Ok(port)
    }

    /// Closes and removes a port, retiring its id.
    pub fn dealloc(&self, id: PortId) -> Result<()> {
        let port = self
            .registry
            .write()
            .unwrap()
            .remove(&id)
            .ok_or(Error::Unknown {
                what: "port",
                id: id.to_string(),
            })?;
        self.names.write().unwrap().remove(port.name());
        port.close();
        let freed_at = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.retired.lock().unwrap().push((id, freed_at));
        Ok(())
    }

    fn next_port_id(&self) -> PortId {
        let epoch = self.epoch.load(Ordering::Acquire);
        let mut retired = self.retired.lock().unwrap();
        if let Some(pos) = retired
            .iter()
            .position(|&(_, freed_at)| epoch.saturating_sub(freed_at) >= REUSE_GRACE_EPOCHS)
        {
            return retired.remove(pos).0;
        }
        drop(retired);
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }

    /// Looks a port up by id. Reserved ids resolve to the synthetics.
    pub fn get(&self, id: PortId) -> Option<Arc<dyn Port>> {
        match id {
            DROP_PORT_ID => Some(Arc::clone(&self.drop) as Arc<dyn Port>),
            FLOOD_PORT_ID => Some(Arc::clone(&self.flood) as Arc<dyn Port>),
            _ => self.registry.read().unwrap().get(&id).cloned(),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Port>> {
        match name {
            "drop" => Some(Arc::clone(&self.drop) as Arc<dyn Port>),
            "flood" => Some(Arc::clone(&self.flood) as Arc<dyn Port>),
            _ => {
                let id = *self.names.read().unwrap().get(name)?;
                self.get(id)
            }
        }
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drop_port(&self) -> &Arc<DropPort> {
        &self.drop
    }

    pub fn flood_port(&self) -> &Arc<FloodPort> {
        &self.flood
    }

    /// Floods `payload` to every live port except `ingress`.
    pub fn flood(&self, payload: &[u8], ingress: PortId) -> usize {
        self.flood.flood(payload, ingress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_args() -> &'static str {
        "127.0.0.1:0,127.0.0.1:9"
    }

    #[test]
    fn test_alloc_registers_by_id_and_name() {
        let table = PortTable::new();
        let port = table.alloc(PortKind::Udp, "p1", udp_args()).unwrap();
        assert_eq!(table.get(port.id()).unwrap().name(), "p1");
        assert_eq!(table.get_by_name("p1").unwrap().id(), port.id());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_name_fails() {
        let table = PortTable::new();
        table.alloc(PortKind::Udp, "p1", udp_args()).unwrap();
        assert!(matches!(
            table.alloc(PortKind::Udp, "p1", udp_args()),
            Err(Error::DuplicateName(_))
        ));
        assert!(table.alloc(PortKind::Udp, "drop", udp_args()).is_err());
    }

    #[test]
    fn test_synthetic_allocation_rejected() {
        let table = PortTable::new();
        assert!(matches!(
            table.alloc(PortKind::Drop, "x", ""),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_dealloc_unknown_fails() {
        let table = PortTable::new();
        assert!(matches!(
            table.dealloc(77),
            Err(Error::Unknown { what: "port", .. })
        ));
    }

    #[test]
    fn test_reserved_accessors() {
        let table = PortTable::new();
        assert_eq!(table.get(DROP_PORT_ID).unwrap().id(), DROP_PORT_ID);
        assert_eq!(table.get(FLOOD_PORT_ID).unwrap().id(), FLOOD_PORT_ID);
        assert_eq!(table.get_by_name("drop").unwrap().id(), DROP_PORT_ID);
        assert_eq!(table.get_by_name("flood").unwrap().id(), FLOOD_PORT_ID);
    }

    #[test]
    fn test_id_reuse_waits_for_grace() {
        let table = PortTable::new();
        let p1 = table.alloc(PortKind::Udp, "p1", udp_args()).unwrap();
        let first_id = p1.id();
        table.dealloc(first_id).unwrap();

        // The id was freed this epoch; it must still rest.
        let p2 = table.alloc(PortKind::Udp, "p2", udp_args()).unwrap();
        assert_ne!(p2.id(), first_id);

        table.dealloc(p2.id()).unwrap();
        // A full epoch has passed since the first id was freed.
        let p3 = table.alloc(PortKind::Udp, "p3", udp_args()).unwrap();
        assert_eq!(p3.id(), first_id);
    }

    #[test]
    fn test_name_released_on_dealloc() {
        let table = PortTable::new();
        let port = table.alloc(PortKind::Udp, "p1", udp_args()).unwrap();
        table.dealloc(port.id()).unwrap();
        assert!(table.get_by_name("p1").is_none());
        assert!(table.alloc(PortKind::Udp, "p1", udp_args()).is_ok());
    }
}
