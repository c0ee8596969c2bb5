//! The two synthetic ports.
//!
//! Drop discards and counts; flood copies to every live port except the one
//! the packet came in on. Both are constructed once by the port table and
//! have no transport underneath.

use super::{Frame, Port, PortCore, PortId, PortKind, DROP_PORT_ID, FLOOD_PORT_ID};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Registry = Arc<RwLock<HashMap<PortId, Arc<dyn Port>>>>;

/// Discards every frame sent to it. The frame count is the drop counter.
pub struct DropPort {
    core: PortCore,
}

impl DropPort {
    pub(super) fn new() -> Self {
        let core = PortCore::new(DROP_PORT_ID, "drop");
        core.set_link_up(true);
        Self { core }
    }
}

impl Port for DropPort {
    fn core(&self) -> &PortCore {
        &self.core
    }

    fn kind(&self) -> PortKind {
        PortKind::Drop
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.core.stats().record_tx_drop();
        Ok(frame.len())
    }

    fn recv(&self, _buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(None)
    }
}

/// Replicates frames to every admin-up, link-up port other than the
/// originator. The ingress exclusion is what keeps a flooded packet from
/// reflecting back out the port it arrived on.
pub struct FloodPort {
    core: PortCore,
    registry: Registry,
}

impl FloodPort {
    pub(super) fn new(registry: Registry) -> Self {
        let core = PortCore::new(FLOOD_PORT_ID, "flood");
        core.set_link_up(true);
        Self { core, registry }
    }

    /// Enqueues one shared copy of `payload` on every eligible port.
    /// Returns how many ports accepted it.
    pub fn flood(&self, payload: &[u8], ingress: PortId) -> usize {
        let shared: Arc<[u8]> = Arc::from(payload);
        let targets: Vec<Arc<dyn Port>> = self
            .registry
            .read()
            .unwrap()
            .values()
            .filter(|port| port.id() != ingress && port.is_up())
            .cloned()
            .collect();

        let mut accepted = 0;
        for port in targets {
            if port.enqueue(Frame::Shared(Arc::clone(&shared))).is_ok() {
                accepted += 1;
            }
        }
        self.core.stats().tx_pkts.add(accepted as u64);
        self.core
            .stats()
            .tx_bytes
            .add(payload.len() as u64 * accepted as u64);
        accepted
    }
}

impl Port for FloodPort {
    fn core(&self) -> &PortCore {
        &self.core
    }

    fn kind(&self) -> PortKind {
        PortKind::Flood
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn send(&self, frame: &[u8]) -> Result<usize> {
        // No originator to exclude on a direct send.
        self.flood(frame, FLOOD_PORT_ID);
        Ok(frame.len())
    }

    fn recv(&self, _buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(None)
    }
}
