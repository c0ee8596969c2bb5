//! The runtime: the one value that owns process-wide dataplane state.
//!
//! Everything the original design kept in ambient globals lives here
//! explicitly: the dataplane registry and the port table. Embedders build a
//! `Runtime` at startup, create ports and dataplanes through it, and drop it
//! to tear everything down.

use crate::app::Library;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::port::table::PortTable;
use crate::port::{Port, PortId, PortKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Sizing and bounds applied to everything the runtime builds. All of these
/// are configuration, not constants; the pipeline never assumes the
/// defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Buffers in each dataplane's pool.
    pub pool_capacity: usize,
    /// Packet bytes per buffer.
    pub buffer_size: usize,
    /// Scratch bytes per context.
    pub metadata_size: usize,
    /// Dispatch chain bound before a packet is declared looping.
    pub max_goto_depth: u8,
    /// Frames a port's transmit ring holds before drop-tail.
    pub tx_ring_depth: usize,
    /// Receive timeout; bounds worker cancellation latency.
    pub recv_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_capacity: 4096,
            buffer_size: 2048,
            metadata_size: 256,
            max_goto_depth: 16,
            tx_ring_depth: 1024,
            recv_timeout: Duration::from_millis(1),
        }
    }
}

pub struct Runtime {
    dataplanes: RwLock<HashMap<String, Arc<Dataplane>>>,
    ports: Arc<PortTable>,
    settings: Settings,
}

impl Runtime {
    pub fn new(settings: Settings) -> Self {
        Self {
            dataplanes: RwLock::new(HashMap::new()),
            ports: Arc::new(PortTable::with_recv_timeout(settings.recv_timeout)),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn port_table(&self) -> &Arc<PortTable> {
        &self.ports
    }

    // ========================================
    // Ports
    // ========================================

    pub fn create_port(&self, kind: PortKind, name: &str, args: &str) -> Result<Arc<dyn Port>> {
        self.ports.alloc(kind, name, args)
    }

    pub fn delete_port(&self, id: PortId) -> Result<()> {
        self.ports.dealloc(id)
    }

    pub fn get_port(&self, name: &str) -> Option<Arc<dyn Port>> {
        self.ports.get_by_name(name)
    }

    // ========================================
    // Dataplanes
    // ========================================

    /// Creates a dataplane bound to `library`. Names are unique across the
    /// runtime.
    pub fn create_dataplane(&self, name: &str, library: Library) -> Result<Arc<Dataplane>> {
        let mut dataplanes = self.dataplanes.write().unwrap();
        if dataplanes.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let dp = Dataplane::new(name, Arc::clone(&self.ports), &self.settings, library);
        dataplanes.insert(name.to_string(), Arc::clone(&dp));
        Ok(dp)
    }

    pub fn get_dataplane(&self, name: &str) -> Option<Arc<Dataplane>> {
        self.dataplanes.read().unwrap().get(name).cloned()
    }

    /// Removes a dataplane after making sure it has stopped and unloaded.
    /// A faulting hook leaves the dataplane registered so the caller can
    /// inspect it.
    pub fn delete_dataplane(&self, name: &str) -> Result<()> {
        let dp = self.get_dataplane(name).ok_or(Error::Unknown {
            what: "dataplane",
            id: name.to_string(),
        })?;
        dp.shutdown()?;
        self.dataplanes.write().unwrap().remove(name);
        Ok(())
    }

    pub fn dataplane_names(&self) -> Vec<String> {
        self.dataplanes.read().unwrap().keys().cloned().collect()
    }
}
