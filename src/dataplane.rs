//! A dataplane: tables, buffer pool, bound ports, and one application.
//!
//! The dataplane is the unit applications program against. Its lifecycle
//! follows the application's: load installs tables and flows, start spawns
//! the port workers, stop joins them, unload tears the application down.

use crate::app::{AppState, Application, Library};
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::port::table::PortTable;
use crate::port::PortId;
use crate::runtime::Settings;
use crate::table::{Table, TableId, TableKind};
use crate::telemetry::DataplaneStats;
use crate::worker::WorkerSet;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::info;

pub struct Dataplane {
    name: String,
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
    pool: Arc<Pool>,
    ports: RwLock<Vec<PortId>>,
    port_table: Arc<PortTable>,
    app: Mutex<Application>,
    stats: Arc<DataplaneStats>,
    workers: Mutex<Option<WorkerSet>>,
    // Handed to worker threads at start; dataplanes always live in an Arc.
    self_ref: Weak<Dataplane>,
    max_goto_depth: u8,
    tx_ring_depth: usize,
    buffer_size: usize,
}

impl Dataplane {
    pub fn new(
        name: &str,
        port_table: Arc<PortTable>,
        settings: &Settings,
        library: Library,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.to_string(),
            tables: RwLock::new(HashMap::new()),
            pool: Arc::new(Pool::new(
                settings.pool_capacity,
                settings.buffer_size,
                settings.metadata_size,
            )),
            ports: RwLock::new(Vec::new()),
            port_table,
            app: Mutex::new(Application::new(library)),
            stats: Arc::new(DataplaneStats::new()),
            workers: Mutex::new(None),
            self_ref: self_ref.clone(),
            max_goto_depth: settings.max_goto_depth,
            tx_ring_depth: settings.tx_ring_depth,
            buffer_size: settings.buffer_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn port_table(&self) -> &Arc<PortTable> {
        &self.port_table
    }

    pub fn stats(&self) -> &DataplaneStats {
        &self.stats
    }

    pub fn max_goto_depth(&self) -> u8 {
        self.max_goto_depth
    }

    pub(crate) fn tx_ring_depth(&self) -> usize {
        self.tx_ring_depth
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    // ========================================
    // Tables
    // ========================================

    /// Creates a table. Only exact matching is implemented; the other
    /// declared kinds are rejected, never approximated.
    pub fn create_table(
        &self,
        id: TableId,
        capacity: usize,
        key_width: usize,
        kind: TableKind,
    ) -> Result<Arc<Table>> {
        match kind {
            TableKind::Exact => {}
            TableKind::Prefix => return Err(Error::Unsupported("prefix match tables")),
            TableKind::Wildcard => return Err(Error::Unsupported("wildcard match tables")),
        }
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(&id) {
            return Err(Error::DuplicateName(format!("table {}", id)));
        }
        let table = Arc::new(Table::new(id, capacity, key_width));
        tables.insert(id, Arc::clone(&table));
        Ok(table)
    }

    pub fn table(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.read().unwrap().get(&id).cloned()
    }

    pub fn delete_table(&self, id: TableId) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::Unknown {
                what: "table",
                id: id.to_string(),
            })
    }

    // ========================================
    // Ports
    // ========================================

    /// Binds an existing port to this dataplane; its workers spawn at start.
    pub fn add_port(&self, id: PortId) -> Result<()> {
        if self.port_table.get(id).is_none() {
            return Err(Error::Unknown {
                what: "port",
                id: id.to_string(),
            });
        }
        let mut ports = self.ports.write().unwrap();
        if !ports.contains(&id) {
            ports.push(id);
        }
        Ok(())
    }

    pub fn remove_port(&self, id: PortId) {
        self.ports.write().unwrap().retain(|&p| p != id);
    }

    pub fn ports(&self) -> Vec<PortId> {
        self.ports.read().unwrap().clone()
    }

    // ========================================
    // Lifecycle
    // ========================================

    pub fn app_state(&self) -> AppState {
        self.app.lock().unwrap().state()
    }

    /// Runs the application's load hook.
    pub fn load(&self) -> Result<()> {
        self.app.lock().unwrap().load(self)
    }

    /// Spawns the port workers, then runs the start hook. If the hook
    /// faults, the workers are torn down again and the application stays
    /// READY, so a following stop is a no-op.
    pub fn start(&self) -> Result<()> {
        let dp = match self.self_ref.upgrade() {
            Some(dp) => dp,
            None => {
                return Err(Error::BadState {
                    op: "start",
                    state: "tearing down",
                })
            }
        };
        let mut app = self.app.lock().unwrap();
        if app.state() != AppState::Ready {
            return Err(Error::BadState {
                op: "start",
                state: app.state().name(),
            });
        }
        let process = app.library().process.clone();
        let workers = WorkerSet::spawn(&dp, process)?;
        if let Err(e) = app.start(self) {
            workers.stop();
            return Err(e);
        }
        *self.workers.lock().unwrap() = Some(workers);
        info!(dataplane = %self.name, "started");
        Ok(())
    }

    /// Joins the port workers, then runs the stop hook. Stopping a
    /// dataplane that never started is a no-op.
    pub fn stop(&self) -> Result<()> {
        if let Some(workers) = self.workers.lock().unwrap().take() {
            workers.stop();
            info!(dataplane = %self.name, "stopped");
        }
        self.app.lock().unwrap().stop(self)
    }

    /// Runs the unload hook. The dataplane must not be running.
    pub fn unload(&self) -> Result<()> {
        self.app.lock().unwrap().unload(self)
    }

    /// Stop plus unload, for teardown paths.
    pub fn shutdown(&self) -> Result<()> {
        self.stop()?;
        self.unload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dp() -> Arc<Dataplane> {
        Dataplane::new(
            "test",
            Arc::new(PortTable::new()),
            &Settings::default(),
            Library::inert(),
        )
    }

    #[test]
    fn test_create_table_exact_only() {
        let dp = test_dp();
        dp.create_table(0, 16, 2, TableKind::Exact).unwrap();
        assert!(matches!(
            dp.create_table(1, 16, 2, TableKind::Prefix),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            dp.create_table(1, 16, 2, TableKind::Wildcard),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_duplicate_table_id_fails() {
        let dp = test_dp();
        dp.create_table(0, 16, 2, TableKind::Exact).unwrap();
        assert!(matches!(
            dp.create_table(0, 16, 2, TableKind::Exact),
            Err(Error::DuplicateName(_))
        ));
    }

    #[test]
    fn test_table_lookup_by_id() {
        let dp = test_dp();
        dp.create_table(3, 16, 4, TableKind::Exact).unwrap();
        assert_eq!(dp.table(3).unwrap().key_width(), 4);
        assert!(dp.table(4).is_none());
        dp.delete_table(3).unwrap();
        assert!(dp.table(3).is_none());
        assert!(dp.delete_table(3).is_err());
    }

    #[test]
    fn test_add_unknown_port_fails() {
        let dp = test_dp();
        assert!(matches!(
            dp.add_port(12),
            Err(Error::Unknown { what: "port", .. })
        ));
    }

    #[test]
    fn test_add_port_is_idempotent() {
        let dp = test_dp();
        let port = dp
            .port_table()
            .alloc(
                crate::port::PortKind::Udp,
                "p1",
                "127.0.0.1:0,127.0.0.1:9",
            )
            .unwrap();
        dp.add_port(port.id()).unwrap();
        dp.add_port(port.id()).unwrap();
        assert_eq!(dp.ports().len(), 1);
        dp.remove_port(port.id());
        assert!(dp.ports().is_empty());
    }

    #[test]
    fn test_lifecycle_with_no_ports() {
        let dp = test_dp();
        dp.load().unwrap();
        dp.start().unwrap();
        assert_eq!(dp.app_state(), AppState::Running);
        dp.stop().unwrap();
        assert_eq!(dp.app_state(), AppState::Stopped);
        dp.unload().unwrap();
    }

    #[test]
    fn test_start_before_load_fails() {
        let dp = test_dp();
        assert!(matches!(dp.start(), Err(Error::BadState { .. })));
    }

    #[test]
    fn test_failed_start_hook_then_stop_noop() {
        let lib = Library::new(|_| 0, |_| 0, |_| 2, |_| 0, |_, _| 0);
        let dp = Dataplane::new(
            "test",
            Arc::new(PortTable::new()),
            &Settings::default(),
            lib,
        );
        dp.load().unwrap();
        assert!(matches!(dp.start(), Err(Error::AppFault(2))));
        assert_eq!(dp.app_state(), AppState::Ready);
        dp.stop().unwrap();
        assert_eq!(dp.app_state(), AppState::Ready);
    }
}
